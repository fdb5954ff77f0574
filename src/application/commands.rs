use crate::application::autofill::{AutofillController, RunOptions};
use crate::application::bootstrap::bootstrap_workspace;
use crate::application::calendar_feed::RemoteCalendarClient;
use crate::application::oauth::TokenBroker;
use crate::infrastructure::bridge::{IsolatedBridge, WindowChannel};
use crate::infrastructure::config::{
    AutofillSettings, read_ignored_calendars, save_ignored_calendars,
};
use crate::infrastructure::dom::{Notifier, SlotSurface};
use crate::infrastructure::error::{AutofillError, InfraError};
use crate::infrastructure::google_calendar_client::GoogleCalendarClient;
use crate::infrastructure::logging::{infra_error_label, log_command_execution};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use url::Url;

type Controller<T, C, S, N> = AutofillController<RemoteCalendarClient<T, C>, S, N>;

/// Everything the UI shell talks to for one page context.
pub struct AppState<T, C, S, N>
where
    T: TokenBroker,
    C: GoogleCalendarClient,
    S: SlotSurface,
    N: Notifier,
{
    config_dir: PathBuf,
    logs_dir: PathBuf,
    settings: AutofillSettings,
    token_broker: Arc<T>,
    calendars: Arc<RemoteCalendarClient<T, C>>,
    controller: Arc<Controller<T, C, S, N>>,
    log_guard: Mutex<()>,
}

impl<T, C, S, N> AppState<T, C, S, N>
where
    T: TokenBroker + 'static,
    C: GoogleCalendarClient + 'static,
    S: SlotSurface + 'static,
    N: Notifier + 'static,
{
    pub fn new(
        workspace_root: PathBuf,
        channel: WindowChannel,
        token_broker: Arc<T>,
        calendar_client: Arc<C>,
        surface: Arc<S>,
        notifier: Arc<N>,
    ) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let settings = bootstrap.settings;

        let calendars = Arc::new(RemoteCalendarClient::new(
            Arc::clone(&token_broker),
            calendar_client,
        ));
        let bridge = IsolatedBridge::new(channel).with_timeout(settings.bridge_timeout());
        let controller = Arc::new(
            AutofillController::new(bridge, Arc::clone(&calendars), surface, notifier)
                .with_options(RunOptions::from_settings(&settings)),
        );

        Ok(Self {
            config_dir: bootstrap.config_dir,
            logs_dir: bootstrap.logs_dir,
            settings,
            token_broker,
            calendars,
            controller,
            log_guard: Mutex::new(()),
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn settings(&self) -> &AutofillSettings {
        &self.settings
    }

    pub fn controller(&self) -> &Arc<Controller<T, C, S, N>> {
        &self.controller
    }

    pub fn log_info(&self, command: &str, message: &str) {
        self.append_log("info", command, message);
    }

    pub fn log_error(&self, command: &str, message: &str) {
        self.append_log("error", command, message);
    }

    fn append_log(&self, level: &str, command: &str, message: &str) {
        let Ok(_guard) = self.log_guard.lock() else {
            return;
        };
        let path = self.logs_dir.join("commands.log");
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "command": command,
            "message": message,
        });

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", payload);
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutofillRequest {
    pub calendar_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutofillResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AutofillResponse {
    fn previewing(slot_count: usize) -> Self {
        Self {
            success: true,
            slot_count: Some(slot_count),
            error: None,
        }
    }

    fn failed(error: &AutofillError) -> Self {
        Self {
            success: false,
            slot_count: None,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarChoice {
    pub id: String,
    pub display_name: String,
    pub color: String,
    pub checked: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CalendarSelection {
    pub id: String,
    pub checked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub signed_in: bool,
}

pub async fn run_autofill_impl<T, C, S, N>(
    state: &AppState<T, C, S, N>,
    request: AutofillRequest,
) -> AutofillResponse
where
    T: TokenBroker + 'static,
    C: GoogleCalendarClient + 'static,
    S: SlotSurface + 'static,
    N: Notifier + 'static,
{
    let started = Instant::now();
    let result = state.controller.start_run(&request.calendar_ids).await;
    match result {
        Ok(outcome) => {
            log_command_execution("run_autofill", started.elapsed(), None);
            state.log_info(
                "run_autofill",
                &format!("previewing run_id={} slots={}", outcome.run_id, outcome.slot_count),
            );
            AutofillResponse::previewing(outcome.slot_count)
        }
        Err(error) => {
            log_command_execution("run_autofill", started.elapsed(), Some(error.label()));
            state.log_error("run_autofill", &error.to_string());
            AutofillResponse::failed(&error)
        }
    }
}

pub async fn confirm_autofill_impl<T, C, S, N>(
    state: &AppState<T, C, S, N>,
) -> Result<usize, AutofillError>
where
    T: TokenBroker + 'static,
    C: GoogleCalendarClient + 'static,
    S: SlotSurface + 'static,
    N: Notifier + 'static,
{
    let started = Instant::now();
    let result = state.controller.confirm().await;
    log_command_execution(
        "confirm_autofill",
        started.elapsed(),
        result.as_ref().err().map(AutofillError::label),
    );
    if let Ok(slot_count) = &result {
        state.log_info("confirm_autofill", &format!("committed slots={slot_count}"));
    }
    result
}

pub fn cancel_autofill_impl<T, C, S, N>(state: &AppState<T, C, S, N>) -> Result<(), AutofillError>
where
    T: TokenBroker + 'static,
    C: GoogleCalendarClient + 'static,
    S: SlotSurface + 'static,
    N: Notifier + 'static,
{
    let started = Instant::now();
    let result = state.controller.cancel();
    log_command_execution(
        "cancel_autofill",
        started.elapsed(),
        result.as_ref().err().map(AutofillError::label),
    );
    result
}

/// Calendar list with the persisted deselection applied as unchecked boxes.
pub async fn load_calendar_choices_impl<T, C, S, N>(
    state: &AppState<T, C, S, N>,
) -> Result<Vec<CalendarChoice>, InfraError>
where
    T: TokenBroker + 'static,
    C: GoogleCalendarClient + 'static,
    S: SlotSurface + 'static,
    N: Notifier + 'static,
{
    let started = Instant::now();
    let result = async {
        let calendars = state.calendars.list_calendars().await?;
        let ignored = read_ignored_calendars(&state.config_dir)?;
        Ok::<_, InfraError>(
            calendars
                .into_iter()
                .map(|calendar| CalendarChoice {
                    checked: !ignored.contains(&calendar.id),
                    id: calendar.id,
                    display_name: calendar.display_name,
                    color: calendar.color,
                })
                .collect::<Vec<_>>(),
        )
    }
    .await;

    log_command_execution(
        "load_calendar_choices",
        started.elapsed(),
        result.as_ref().err().map(infra_error_label),
    );
    if let Err(error) = &result {
        state.log_error("load_calendar_choices", &error.to_string());
    }
    result
}

/// Persists every unchecked calendar as ignored; returns the ids left checked.
pub fn save_calendar_selection_impl<T, C, S, N>(
    state: &AppState<T, C, S, N>,
    selection: Vec<CalendarSelection>,
) -> Result<Vec<String>, InfraError>
where
    T: TokenBroker + 'static,
    C: GoogleCalendarClient + 'static,
    S: SlotSurface + 'static,
    N: Notifier + 'static,
{
    let (checked, unchecked): (Vec<_>, Vec<_>) =
        selection.into_iter().partition(|choice| choice.checked);
    let ignored: BTreeSet<String> = unchecked.into_iter().map(|choice| choice.id).collect();
    save_ignored_calendars(&state.config_dir, &ignored)?;
    state.log_info(
        "save_calendar_selection",
        &format!("ignored={}", ignored.len()),
    );
    Ok(checked.into_iter().map(|choice| choice.id).collect())
}

pub async fn session_status_impl<T, C, S, N>(
    state: &AppState<T, C, S, N>,
) -> Result<SessionResponse, InfraError>
where
    T: TokenBroker + 'static,
    C: GoogleCalendarClient + 'static,
    S: SlotSurface + 'static,
    N: Notifier + 'static,
{
    match state.token_broker.acquire_token(false).await {
        Ok(_) => Ok(SessionResponse { signed_in: true }),
        Err(InfraError::AuthenticationRequired) => Ok(SessionResponse { signed_in: false }),
        Err(error) => Err(error),
    }
}

pub async fn sign_in_impl<T, C, S, N>(
    state: &AppState<T, C, S, N>,
) -> Result<SessionResponse, InfraError>
where
    T: TokenBroker + 'static,
    C: GoogleCalendarClient + 'static,
    S: SlotSurface + 'static,
    N: Notifier + 'static,
{
    let started = Instant::now();
    let result = state.token_broker.acquire_token(true).await;
    log_command_execution(
        "sign_in",
        started.elapsed(),
        result.as_ref().err().map(infra_error_label),
    );
    match result {
        Ok(_) => {
            state.log_info("sign_in", "signed in");
            Ok(SessionResponse { signed_in: true })
        }
        Err(error) => {
            state.log_error("sign_in", &format!("Sign-in failed: {error}"));
            Err(error)
        }
    }
}

/// Releases the current token if there is one; signing out twice is not an error.
pub async fn sign_out_impl<T, C, S, N>(
    state: &AppState<T, C, S, N>,
) -> Result<SessionResponse, InfraError>
where
    T: TokenBroker + 'static,
    C: GoogleCalendarClient + 'static,
    S: SlotSurface + 'static,
    N: Notifier + 'static,
{
    let started = Instant::now();
    let result = match state.token_broker.acquire_token(false).await {
        Ok(token) => state.token_broker.release_token(&token).await,
        Err(InfraError::AuthenticationRequired) => Ok(()),
        Err(error) => Err(error),
    };
    log_command_execution(
        "sign_out",
        started.elapsed(),
        result.as_ref().err().map(infra_error_label),
    );
    result.map(|()| SessionResponse { signed_in: false })
}

pub fn is_scheduling_page_impl<T, C, S, N>(state: &AppState<T, C, S, N>, page_url: &str) -> bool
where
    T: TokenBroker + 'static,
    C: GoogleCalendarClient + 'static,
    S: SlotSurface + 'static,
    N: Notifier + 'static,
{
    is_scheduling_page(page_url, &state.settings.host_origin)
}

/// Whether `page_url` belongs to the configured scheduling host (any subdomain).
pub fn is_scheduling_page(page_url: &str, host_origin: &str) -> bool {
    let (Ok(page), Ok(origin)) = (Url::parse(page_url), Url::parse(host_origin)) else {
        return false;
    };
    let (Some(page_host), Some(origin_host)) = (page.host_str(), origin.host_str()) else {
        return false;
    };
    let domain = origin_host.strip_prefix("www.").unwrap_or(origin_host);
    page_host == domain || page_host.ends_with(&format!(".{domain}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{CalendarEntry, QueryRange};
    use crate::infrastructure::bridge::HostBridge;
    use crate::infrastructure::dom::{InMemorySlotSurface, RecordingNotifier};
    use crate::infrastructure::event_mapper::{CalendarEventDateTime, GoogleCalendarEvent};
    use crate::infrastructure::host_page::{
        AVAILABLE_AT_SLOT, HostPage, InMemoryHostPage, PEOPLE_IDS, TIME_OF_SLOT,
    };
    use crate::test_support::{RecordingSaveEndpoint, TempWorkspace, wait_until};
    use async_trait::async_trait;
    use serde_json::json;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct FakeBroker {
        token: Mutex<Option<String>>,
        interactive_token: Option<String>,
        released: AtomicUsize,
    }

    impl FakeBroker {
        fn signed_in() -> Self {
            Self {
                token: Mutex::new(Some("token-1".to_string())),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl TokenBroker for FakeBroker {
        async fn acquire_token(&self, interactive: bool) -> Result<String, InfraError> {
            let mut token = self.token.lock().expect("token mutex poisoned");
            if let Some(token) = token.clone() {
                return Ok(token);
            }
            match (&self.interactive_token, interactive) {
                (Some(granted), true) => {
                    *token = Some(granted.clone());
                    Ok(granted.clone())
                }
                _ => Err(InfraError::AuthenticationRequired),
            }
        }

        async fn release_token(&self, _access_token: &str) -> Result<(), InfraError> {
            self.released.fetch_add(1, Ordering::SeqCst);
            *self.token.lock().expect("token mutex poisoned") = None;
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct FakeCalendar;

    #[async_trait]
    impl GoogleCalendarClient for FakeCalendar {
        async fn list_calendars(&self, _access_token: &str) -> Result<Vec<CalendarEntry>, InfraError> {
            Ok(["primary", "holidays"]
                .into_iter()
                .map(|id| CalendarEntry {
                    id: id.to_string(),
                    display_name: id.to_uppercase(),
                    color: "#4285f4".to_string(),
                    enabled: true,
                })
                .collect())
        }

        async fn list_events(
            &self,
            _access_token: &str,
            calendar_id: &str,
            _range: QueryRange,
        ) -> Result<Vec<GoogleCalendarEvent>, InfraError> {
            if calendar_id != "primary" {
                return Ok(Vec::new());
            }
            Ok(vec![GoogleCalendarEvent {
                id: Some("busy".to_string()),
                summary: Some("Lunch".to_string()),
                status: None,
                start: CalendarEventDateTime {
                    date_time: Some("1970-01-01T00:30:00Z".to_string()),
                    ..CalendarEventDateTime::default()
                },
                end: CalendarEventDateTime {
                    date_time: Some("1970-01-01T00:45:00Z".to_string()),
                    ..CalendarEventDateTime::default()
                },
            }])
        }
    }

    struct Fixture {
        _workspace: TempWorkspace,
        page: Arc<InMemoryHostPage>,
        endpoint: Arc<RecordingSaveEndpoint>,
        broker: Arc<FakeBroker>,
        state: AppState<FakeBroker, FakeCalendar, InMemorySlotSurface, RecordingNotifier>,
    }

    fn fixture(broker: FakeBroker) -> Fixture {
        let workspace = TempWorkspace::new("command");
        let config_dir = workspace.path().join("config");
        fs::create_dir_all(&config_dir).expect("config dir");
        fs::write(
            config_dir.join("settings.json"),
            r#"{"schema":1,"confirmMode":"manual","commitSettleDelayMs":5,"bridgeTimeoutMs":200}"#,
        )
        .expect("write settings");

        let page = Arc::new(
            InMemoryHostPage::default()
                .with_global(TIME_OF_SLOT, json!([0, 900, 1800]))
                .with_global(AVAILABLE_AT_SLOT, json!([[], [], []]))
                .with_global(PEOPLE_IDS, json!([3, 17]))
                .with_location("https://www.when2meet.com/?35081112-5cGlg"),
        );
        let endpoint = Arc::new(RecordingSaveEndpoint::default());
        let channel = WindowChannel::new();
        HostBridge::new(Arc::clone(&page), Arc::clone(&endpoint)).listen(&channel);

        let broker = Arc::new(broker);
        let state = AppState::new(
            workspace.path().to_path_buf(),
            channel,
            Arc::clone(&broker),
            Arc::new(FakeCalendar),
            Arc::new(InMemorySlotSurface::with_grid(&[0, 900, 1800])),
            Arc::new(RecordingNotifier::default()),
        )
        .expect("app state");

        Fixture {
            _workspace: workspace,
            page,
            endpoint,
            broker,
            state,
        }
    }

    #[tokio::test]
    async fn autofill_flow_commits_free_slots() {
        let fixture = fixture(FakeBroker::signed_in());

        let response = run_autofill_impl(
            &fixture.state,
            AutofillRequest {
                calendar_ids: vec!["primary".to_string(), "holidays".to_string()],
            },
        )
        .await;
        assert_eq!(response, AutofillResponse::previewing(2));
        assert_eq!(
            serde_json::to_value(&response).expect("serialize"),
            json!({"success": true, "slotCount": 2})
        );

        assert_eq!(confirm_autofill_impl(&fixture.state).await, Ok(2));
        wait_until(|| fixture.endpoint.requests().len() == 1).await;
        let request = &fixture.endpoint.requests()[0];
        assert_eq!(request.person, "17");
        assert_eq!(request.event, "35081112");
        assert_eq!(request.availability, "110");

        let log = fs::read_to_string(fixture.state.logs_dir.join("commands.log")).expect("log");
        assert!(log.contains("\"command\":\"confirm_autofill\""));
        assert_eq!(
            fixture.page.global(AVAILABLE_AT_SLOT),
            Some(json!([[17], [17], []]))
        );
    }

    #[tokio::test]
    async fn empty_selection_reports_error_shape() {
        let fixture = fixture(FakeBroker::signed_in());
        let response = run_autofill_impl(&fixture.state, AutofillRequest { calendar_ids: vec![] }).await;
        assert_eq!(
            serde_json::to_value(&response).expect("serialize"),
            json!({"success": false, "error": "Select at least one calendar."})
        );
    }

    #[tokio::test]
    async fn signed_out_run_reports_fetch_failure() {
        let fixture = fixture(FakeBroker::default());
        let response = run_autofill_impl(
            &fixture.state,
            AutofillRequest {
                calendar_ids: vec!["primary".to_string()],
            },
        )
        .await;
        assert!(!response.success);
        assert_eq!(
            response.error.as_deref(),
            Some("Failed to fetch calendar events: authentication required")
        );
        assert_eq!(cancel_autofill_impl(&fixture.state), Err(AutofillError::NoActivePreview));
    }

    #[tokio::test]
    async fn calendar_choices_apply_saved_selection() {
        let fixture = fixture(FakeBroker::signed_in());

        let choices = load_calendar_choices_impl(&fixture.state).await.expect("choices");
        assert!(choices.iter().all(|choice| choice.checked));

        let active = save_calendar_selection_impl(
            &fixture.state,
            vec![
                CalendarSelection {
                    id: "primary".to_string(),
                    checked: true,
                },
                CalendarSelection {
                    id: "holidays".to_string(),
                    checked: false,
                },
            ],
        )
        .expect("save selection");
        assert_eq!(active, vec!["primary".to_string()]);

        let choices = load_calendar_choices_impl(&fixture.state).await.expect("choices");
        let checked: Vec<_> = choices
            .iter()
            .map(|choice| (choice.id.as_str(), choice.checked))
            .collect();
        assert_eq!(checked, vec![("primary", true), ("holidays", false)]);
        assert_eq!(choices[1].display_name, "HOLIDAYS");
    }

    #[tokio::test]
    async fn sign_in_and_out_toggle_session() {
        let fixture = fixture(FakeBroker {
            interactive_token: Some("granted".to_string()),
            ..FakeBroker::default()
        });

        assert_eq!(
            session_status_impl(&fixture.state).await.expect("status"),
            SessionResponse { signed_in: false }
        );
        assert_eq!(
            sign_in_impl(&fixture.state).await.expect("sign in"),
            SessionResponse { signed_in: true }
        );
        assert_eq!(
            sign_out_impl(&fixture.state).await.expect("sign out"),
            SessionResponse { signed_in: false }
        );
        assert_eq!(fixture.broker.released.load(Ordering::SeqCst), 1);

        // Already signed out.
        sign_out_impl(&fixture.state).await.expect("second sign out");
        assert_eq!(fixture.broker.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn scheduling_page_detection() {
        let origin = "https://www.when2meet.com";
        assert!(is_scheduling_page("https://www.when2meet.com/?35081112-5cGlg", origin));
        assert!(is_scheduling_page("https://when2meet.com/?1", origin));
        assert!(!is_scheduling_page("https://example.com/when2meet.com", origin));
        assert!(!is_scheduling_page("not a url", origin));
    }

    #[tokio::test]
    async fn scheduling_page_uses_configured_host() {
        let fixture = fixture(FakeBroker::signed_in());
        assert!(is_scheduling_page_impl(
            &fixture.state,
            "https://www.when2meet.com/?35081112-5cGlg"
        ));
        assert!(!is_scheduling_page_impl(&fixture.state, "https://calendar.google.com/"));
    }
}
