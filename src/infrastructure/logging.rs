use crate::infrastructure::error::{AutofillError, InfraError};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Installs the global subscriber. `RUST_LOG` overrides the default `info` filter.
///
/// Fails when a subscriber is already installed.
pub fn init_logging(format: LogFormat) -> Result<(), InfraError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter);

    let installed = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|error| InfraError::InvalidConfig(format!("logging init failed: {error}")))
}

/// Log the outcome of a UI shell command with structured fields.
///
/// `error_label` is `None` on success; callers pass [`AutofillError::label`] or a fixed tag.
#[inline]
pub fn log_command_execution(command: &str, elapsed: Duration, error_label: Option<&str>) {
    let duration_ms = elapsed.as_millis() as u64;

    match error_label {
        None => info!(command, duration_ms, "command_execution_success"),
        Some(error) => warn!(command, duration_ms, error, "command_execution_failure"),
    }
}

/// Stable label for infrastructure faults, mirroring [`AutofillError::label`].
#[inline]
pub fn infra_error_label(error: &InfraError) -> &'static str {
    match error {
        InfraError::Io(_) => "io",
        InfraError::Json(_) => "json",
        InfraError::InvalidConfig(_) => "invalid_config",
        InfraError::OAuth(_) => "oauth",
        InfraError::Credential(_) => "credential",
        InfraError::Http(_) => "http",
        InfraError::AuthenticationRequired => "authentication_required",
    }
}

/// Logs a run failure at the level its kind deserves; control outcomes stay at `info`.
pub fn log_run_failure(error: &AutofillError) {
    match error {
        AutofillError::Cancelled | AutofillError::NoFreeSlots | AutofillError::CommitInFlight => {
            info!(error = error.label(), message = %error, "autofill_run_ended")
        }
        _ => warn!(error = error.label(), message = %error, "autofill_run_failed"),
    }
}
