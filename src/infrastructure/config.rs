use crate::infrastructure::error::InfraError;
use crate::infrastructure::save_endpoint::DEFAULT_SAVE_PATH;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use std::time::Duration;

const SETTINGS_JSON: &str = "settings.json";
const CALENDARS_JSON: &str = "calendars.json";
const DEFAULT_HOST_ORIGIN: &str = "https://www.when2meet.com";
const DEFAULT_AUTO_CONFIRM_DELAY_MS: u64 = 1_000;
const DEFAULT_COMMIT_SETTLE_DELAY_MS: u64 = 1_500;
const DEFAULT_BRIDGE_TIMEOUT_MS: u64 = 3_000;

pub const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:8080/oauth2/callback";
pub const DEFAULT_SCOPE: &str = "https://www.googleapis.com/auth/calendar.readonly";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmMode {
    /// Commit the preview after `autoConfirmDelayMs` without user action.
    #[default]
    Auto,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutofillSettings {
    #[serde(default)]
    pub confirm_mode: ConfirmMode,
    #[serde(default = "default_auto_confirm_delay_ms")]
    pub auto_confirm_delay_ms: u64,
    #[serde(default = "default_commit_settle_delay_ms")]
    pub commit_settle_delay_ms: u64,
    #[serde(default = "default_bridge_timeout_ms")]
    pub bridge_timeout_ms: u64,
    #[serde(default = "default_host_origin")]
    pub host_origin: String,
    #[serde(default = "default_save_path")]
    pub save_path: String,
}

fn default_auto_confirm_delay_ms() -> u64 {
    DEFAULT_AUTO_CONFIRM_DELAY_MS
}

fn default_commit_settle_delay_ms() -> u64 {
    DEFAULT_COMMIT_SETTLE_DELAY_MS
}

fn default_bridge_timeout_ms() -> u64 {
    DEFAULT_BRIDGE_TIMEOUT_MS
}

fn default_host_origin() -> String {
    DEFAULT_HOST_ORIGIN.to_string()
}

fn default_save_path() -> String {
    DEFAULT_SAVE_PATH.to_string()
}

impl Default for AutofillSettings {
    fn default() -> Self {
        Self {
            confirm_mode: ConfirmMode::default(),
            auto_confirm_delay_ms: DEFAULT_AUTO_CONFIRM_DELAY_MS,
            commit_settle_delay_ms: DEFAULT_COMMIT_SETTLE_DELAY_MS,
            bridge_timeout_ms: DEFAULT_BRIDGE_TIMEOUT_MS,
            host_origin: default_host_origin(),
            save_path: default_save_path(),
        }
    }
}

impl AutofillSettings {
    pub fn auto_confirm_delay(&self) -> Duration {
        Duration::from_millis(self.auto_confirm_delay_ms)
    }

    pub fn commit_settle_delay(&self) -> Duration {
        Duration::from_millis(self.commit_settle_delay_ms)
    }

    pub fn bridge_timeout(&self) -> Duration {
        Duration::from_millis(self.bridge_timeout_ms)
    }
}

/// OAuth client registration, read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthClientSettings {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            SETTINGS_JSON,
            serde_json::json!({
                "schema": 1,
                "confirmMode": "auto",
                "autoConfirmDelayMs": DEFAULT_AUTO_CONFIRM_DELAY_MS,
                "commitSettleDelayMs": DEFAULT_COMMIT_SETTLE_DELAY_MS,
                "bridgeTimeoutMs": DEFAULT_BRIDGE_TIMEOUT_MS,
                "hostOrigin": DEFAULT_HOST_ORIGIN,
                "savePath": DEFAULT_SAVE_PATH
            }),
        ),
        (
            CALENDARS_JSON,
            serde_json::json!({
                "schema": 1,
                "ignoredCalendarIds": []
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            write_config(&path, &value)?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

fn write_config(path: &Path, value: &serde_json::Value) -> Result<(), InfraError> {
    let formatted = serde_json::to_string_pretty(value)?;
    fs::write(path, format!("{formatted}\n"))?;
    Ok(())
}

pub fn load_settings(config_dir: &Path) -> Result<AutofillSettings, InfraError> {
    let path = config_dir.join(SETTINGS_JSON);
    let raw = read_config(&path)?;
    let settings: AutofillSettings = serde_json::from_value(raw).map_err(|error| {
        InfraError::InvalidConfig(format!("invalid settings in {}: {error}", path.display()))
    })?;
    if settings.bridge_timeout_ms == 0 {
        return Err(InfraError::InvalidConfig(
            "bridgeTimeoutMs must be greater than zero".to_string(),
        ));
    }
    if !settings.save_path.starts_with('/') {
        return Err(InfraError::InvalidConfig(format!(
            "savePath must be absolute: {}",
            settings.save_path
        )));
    }
    Ok(settings)
}

/// Calendar ids the user unchecked; everything else counts as selected.
pub fn read_ignored_calendars(config_dir: &Path) -> Result<BTreeSet<String>, InfraError> {
    let calendars = read_config(&config_dir.join(CALENDARS_JSON))?;
    Ok(calendars
        .get("ignoredCalendarIds")
        .and_then(serde_json::Value::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(serde_json::Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(ToOwned::to_owned)
                .collect()
        })
        .unwrap_or_default())
}

pub fn save_ignored_calendars(
    config_dir: &Path,
    ignored: &BTreeSet<String>,
) -> Result<(), InfraError> {
    let path = config_dir.join(CALENDARS_JSON);
    let mut calendars = read_config(&path)?;
    let object = calendars.as_object_mut().ok_or_else(|| {
        InfraError::InvalidConfig(format!("invalid object structure in {}", path.display()))
    })?;
    object.insert(
        "ignoredCalendarIds".to_string(),
        serde_json::Value::Array(
            ignored
                .iter()
                .map(|id| serde_json::Value::String(id.clone()))
                .collect(),
        ),
    );
    write_config(&path, &calendars)
}

pub fn load_oauth_settings_from_env() -> Result<OAuthClientSettings, InfraError> {
    load_oauth_settings_from_lookup(|key| std::env::var(key).ok())
}

pub fn load_oauth_settings_from_lookup<F>(lookup: F) -> Result<OAuthClientSettings, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let client_id = required_lookup_value(
        &lookup,
        &["SLOT_AUTOFILL_GOOGLE_CLIENT_ID", "GOOGLE_CLIENT_ID"],
        "google client id",
    )?;
    let client_secret = required_lookup_value(
        &lookup,
        &["SLOT_AUTOFILL_GOOGLE_CLIENT_SECRET", "GOOGLE_CLIENT_SECRET"],
        "google client secret",
    )?;
    let redirect_uri = optional_lookup_value(
        &lookup,
        &["SLOT_AUTOFILL_GOOGLE_REDIRECT_URI", "GOOGLE_REDIRECT_URI"],
    )
    .unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string());
    let scopes = optional_lookup_value(&lookup, &["SLOT_AUTOFILL_GOOGLE_SCOPES", "GOOGLE_SCOPES"])
        .map(|raw| parse_scope_list(&raw))
        .filter(|scopes| !scopes.is_empty())
        .unwrap_or_else(|| vec![DEFAULT_SCOPE.to_string()]);

    Ok(OAuthClientSettings {
        client_id,
        client_secret,
        redirect_uri,
        scopes,
    })
}

fn required_lookup_value<F>(
    lookup: &F,
    keys: &[&str],
    field_name: &str,
) -> Result<String, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    optional_lookup_value(lookup, keys).ok_or_else(|| {
        InfraError::InvalidConfig(format!(
            "missing {} (set one of: {})",
            field_name,
            keys.join(", ")
        ))
    })
}

fn optional_lookup_value<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    keys.iter()
        .filter_map(|key| lookup(key))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

fn parse_scope_list(raw: &str) -> Vec<String> {
    raw.split([',', ' ', '\n', '\t'])
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}
