use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("OAuth error: {0}")]
    OAuth(String),
    #[error("Credential store error: {0}")]
    Credential(String),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("authentication required")]
    AuthenticationRequired,
}

/// Failure taxonomy of one autofill run and of the host-side commit.
///
/// `Display` is the user-facing text reported to the UI shell.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AutofillError {
    #[error("Timeout reading page data. Try refreshing the page.")]
    BridgeTimeout,
    #[error("{0}")]
    HostRead(String),
    #[error(
        "Could not read the scheduling grid time slots. Please make sure you have entered your name to see the grid."
    )]
    NoGridData,
    #[error("Failed to fetch calendar events: {0}")]
    RemoteFetchFailure(String),
    #[error("No free slots found. Your calendar is fully booked for this time range!")]
    NoFreeSlots,
    #[error("Missing required IDs - cannot save ({0})")]
    MissingIdentity(String),
    #[error("Save failed: {0}")]
    SaveFailure(String),
    #[error("Autofill cancelled.")]
    Cancelled,
    #[error("No autofill preview is active.")]
    NoActivePreview,
    #[error("Select at least one calendar.")]
    NoCalendarsSelected,
    #[error("Still saving the previous selection. Try again in a moment.")]
    CommitInFlight,
}

impl AutofillError {
    /// Stable label for structured logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::BridgeTimeout => "bridge_timeout",
            Self::HostRead(_) => "host_read",
            Self::NoGridData => "no_grid_data",
            Self::RemoteFetchFailure(_) => "remote_fetch_failure",
            Self::NoFreeSlots => "no_free_slots",
            Self::MissingIdentity(_) => "missing_identity",
            Self::SaveFailure(_) => "save_failure",
            Self::Cancelled => "cancelled",
            Self::NoActivePreview => "no_active_preview",
            Self::NoCalendarsSelected => "no_calendars_selected",
            Self::CommitInFlight => "commit_in_flight",
        }
    }
}

impl From<InfraError> for AutofillError {
    fn from(error: InfraError) -> Self {
        Self::RemoteFetchFailure(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_failures_carry_the_remote_message() {
        let error = AutofillError::from(InfraError::Http("quota exceeded".to_string()));
        assert_eq!(
            error.to_string(),
            "Failed to fetch calendar events: HTTP error: quota exceeded"
        );
        assert_eq!(error.label(), "remote_fetch_failure");
    }

    #[test]
    fn fully_booked_message_differs_from_fetch_failure() {
        let booked = AutofillError::NoFreeSlots.to_string();
        let fetch = AutofillError::RemoteFetchFailure("x".to_string()).to_string();
        assert!(booked.contains("fully booked"));
        assert_ne!(booked, fetch);
    }
}
