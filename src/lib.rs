//! Fills a group-scheduling grid with the free time found in a user's calendars.
//!
//! The engine reads the page's slot table through a message bridge, subtracts busy
//! intervals fetched from the calendar service, previews the result on the grid and,
//! once confirmed, writes the availability back to the host page and its save endpoint.

pub mod application;
pub mod domain;
pub mod infrastructure;

#[cfg(test)]
mod test_support;

pub use application::autofill::{AutofillController, AutofillOutcome, RunOptions};
pub use application::commands::{
    AppState, AutofillRequest, AutofillResponse, CalendarChoice, CalendarSelection,
    SessionResponse, cancel_autofill_impl, confirm_autofill_impl, is_scheduling_page,
    is_scheduling_page_impl, load_calendar_choices_impl, run_autofill_impl,
    save_calendar_selection_impl, session_status_impl, sign_in_impl, sign_out_impl,
};
pub use domain::availability::compute_free_slots;
pub use domain::models::{BusyInterval, RunPhase, Slot, Timestamp};
pub use infrastructure::bridge::{HostBridge, IsolatedBridge, WindowChannel};
pub use infrastructure::error::{AutofillError, InfraError};
pub use infrastructure::logging::{LogFormat, init_logging};
