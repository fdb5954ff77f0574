//! One autofill run per page context: read the grid, fetch busy time, preview the free slots,
//! then commit them through synthetic clicks and a direct write to the host page.

use crate::application::calendar_feed::BusyIntervalSource;
use crate::application::synthetic_input::replay_clicks;
use crate::domain::availability::compute_free_slots;
use crate::domain::models::{PreviewSelection, QueryRange, RunPhase, Timestamp};
use crate::infrastructure::bridge::IsolatedBridge;
use crate::infrastructure::config::{AutofillSettings, ConfirmMode};
use crate::infrastructure::dom::{
    Notifier, PREVIEW_MARKER_CLASS, SlotSurface, find_slot_element,
};
use crate::infrastructure::error::AutofillError;
use crate::infrastructure::logging::log_run_failure;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

const NO_ELEMENTS_MESSAGE: &str = "No slot elements found to select";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub confirm_mode: ConfirmMode,
    pub auto_confirm_delay: Duration,
    pub commit_settle_delay: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from_settings(&AutofillSettings::default())
    }
}

impl RunOptions {
    pub fn from_settings(settings: &AutofillSettings) -> Self {
        Self {
            confirm_mode: settings.confirm_mode,
            auto_confirm_delay: settings.auto_confirm_delay(),
            commit_settle_delay: settings.commit_settle_delay(),
        }
    }
}

/// What a run reports once its preview is on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutofillOutcome {
    pub run_id: u64,
    pub slot_count: usize,
}

#[derive(Debug)]
struct RunState {
    active_run: Option<u64>,
    phase: RunPhase,
    preview: Option<PreviewSelection>,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            active_run: None,
            phase: RunPhase::Idle,
            preview: None,
        }
    }
}

pub struct AutofillController<B, S, N>
where
    B: BusyIntervalSource,
    S: SlotSurface,
    N: Notifier,
{
    bridge: IsolatedBridge,
    busy_source: Arc<B>,
    surface: Arc<S>,
    notifier: Arc<N>,
    options: RunOptions,
    state: Mutex<RunState>,
    next_run_id: AtomicU64,
}

impl<B, S, N> AutofillController<B, S, N>
where
    B: BusyIntervalSource + 'static,
    S: SlotSurface + 'static,
    N: Notifier + 'static,
{
    pub fn new(bridge: IsolatedBridge, busy_source: Arc<B>, surface: Arc<S>, notifier: Arc<N>) -> Self {
        Self {
            bridge,
            busy_source,
            surface,
            notifier,
            options: RunOptions::default(),
            state: Mutex::new(RunState::default()),
            next_run_id: AtomicU64::new(1),
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn phase(&self) -> RunPhase {
        self.lock_state().phase
    }

    pub fn preview(&self) -> Option<PreviewSelection> {
        self.lock_state().preview.clone()
    }

    /// Runs up to the preview. Any run still active is cancelled first.
    ///
    /// In [`ConfirmMode::Auto`] a commit is scheduled after the auto-confirm delay.
    pub async fn start_run(
        self: &Arc<Self>,
        calendar_ids: &[String],
    ) -> Result<AutofillOutcome, AutofillError> {
        if calendar_ids.is_empty() {
            return Err(AutofillError::NoCalendarsSelected);
        }

        let run_id = self.begin_run().inspect_err(log_run_failure)?;
        info!(run_id, calendars = calendar_ids.len(), "autofill_run_started");

        let outcome = match self.fetch_and_preview(run_id, calendar_ids).await {
            Ok(outcome) => outcome,
            Err(error) => {
                let error = self.settle_failure(run_id, error);
                log_run_failure(&error);
                return Err(error);
            }
        };

        self.notifier
            .toast(&format!("Auto-selecting {} free slots...", outcome.slot_count));
        if self.options.confirm_mode == ConfirmMode::Auto {
            self.schedule_auto_confirm(run_id);
        }
        Ok(outcome)
    }

    /// Commits the active preview and returns how many slots were written.
    pub async fn confirm(&self) -> Result<usize, AutofillError> {
        self.commit(None).await
    }

    /// Drops the preview or abandons a run that is still fetching. No host or network effect.
    pub fn cancel(&self) -> Result<(), AutofillError> {
        {
            let mut state = self.lock_state();
            if !state.phase.is_active() {
                return Err(AutofillError::NoActivePreview);
            }
            self.clear_preview_locked(&mut state);
            state.phase = RunPhase::Cancelled;
        }
        info!("autofill_run_cancelled");
        self.notifier.toast(&AutofillError::Cancelled.to_string());
        Ok(())
    }

    fn lock_state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes over the page context. A commit in flight cannot be undone, so it is never superseded.
    fn begin_run(&self) -> Result<u64, AutofillError> {
        let mut state = self.lock_state();
        if state.phase == RunPhase::Committing {
            return Err(AutofillError::CommitInFlight);
        }
        let run_id = self.next_run_id.fetch_add(1, Ordering::Relaxed);
        if state.phase.is_active() {
            debug!(
                superseded = ?state.active_run,
                phase = state.phase.as_str(),
                "superseding active run"
            );
            self.clear_preview_locked(&mut state);
        }
        state.active_run = Some(run_id);
        state.phase = RunPhase::FetchingGrid;
        Ok(run_id)
    }

    /// Removes every marker and forgets the preview and the active run id.
    fn clear_preview_locked(&self, state: &mut RunState) {
        self.surface.remove_class_everywhere(PREVIEW_MARKER_CLASS);
        state.preview = None;
        state.active_run = None;
    }

    /// Moves `run_id` to `phase`, or reports that it was superseded.
    fn advance(&self, run_id: u64, phase: RunPhase) -> Result<(), AutofillError> {
        let mut state = self.lock_state();
        if state.active_run != Some(run_id) {
            return Err(AutofillError::Cancelled);
        }
        state.phase = phase;
        Ok(())
    }

    fn settle_failure(&self, run_id: u64, error: AutofillError) -> AutofillError {
        let mut state = self.lock_state();
        if state.active_run != Some(run_id) {
            return AutofillError::Cancelled;
        }
        state.active_run = None;
        state.phase = RunPhase::Idle;
        state.preview = None;
        error
    }

    async fn fetch_and_preview(
        &self,
        run_id: u64,
        calendar_ids: &[String],
    ) -> Result<AutofillOutcome, AutofillError> {
        let slots = self.bridge.read_slots().await?;
        let range = QueryRange::covering(&slots).ok_or(AutofillError::NoGridData)?;
        self.advance(run_id, RunPhase::FetchingBusy)?;
        debug!(run_id, slots = slots.len(), start = %range.start, end = %range.end, "grid read");

        let busy = self
            .busy_source
            .busy_intervals(calendar_ids, range)
            .await
            .map_err(AutofillError::from)?;
        self.advance(run_id, RunPhase::Computing)?;

        let free = compute_free_slots(&slots, &busy);
        debug!(run_id, busy = busy.len(), free = free.len(), "availability computed");
        if free.is_empty() {
            return Err(AutofillError::NoFreeSlots);
        }

        let selection = PreviewSelection::new(free);
        let slot_count = selection.len();
        let mut state = self.lock_state();
        if state.active_run != Some(run_id) {
            return Err(AutofillError::Cancelled);
        }
        let marked = self.mark_preview(selection.timestamps());
        state.preview = Some(selection);
        state.phase = RunPhase::Previewing;
        drop(state);

        info!(run_id, slot_count, marked, "autofill_preview_shown");
        Ok(AutofillOutcome { run_id, slot_count })
    }

    fn mark_preview(&self, timestamps: &[Timestamp]) -> usize {
        let mut marked = 0;
        for &timestamp in timestamps {
            if let Some(element) = find_slot_element(self.surface.as_ref(), timestamp) {
                self.surface.add_class(&element.element_id, PREVIEW_MARKER_CLASS);
                marked += 1;
            }
        }
        marked
    }

    fn schedule_auto_confirm(self: &Arc<Self>, run_id: u64) {
        let controller = Arc::clone(self);
        let delay = self.options.auto_confirm_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match controller.commit(Some(run_id)).await {
                Ok(_) => {}
                Err(AutofillError::NoActivePreview) => {
                    debug!(run_id, "auto-confirm skipped, preview no longer active");
                }
                Err(error) => log_run_failure(&error),
            }
        });
    }

    /// Takes the preview and performs the dual commit. `expected_run` pins the commit to one run.
    async fn commit(&self, expected_run: Option<u64>) -> Result<usize, AutofillError> {
        let (run_id, selection) = {
            let mut state = self.lock_state();
            if state.phase != RunPhase::Previewing {
                return Err(AutofillError::NoActivePreview);
            }
            let Some(run_id) = state.active_run else {
                return Err(AutofillError::NoActivePreview);
            };
            if expected_run.is_some_and(|expected| expected != run_id) {
                return Err(AutofillError::NoActivePreview);
            }
            let selection = state.preview.take().ok_or(AutofillError::NoActivePreview)?;
            state.phase = RunPhase::Committing;
            (run_id, selection)
        };

        self.surface.remove_class_everywhere(PREVIEW_MARKER_CLASS);
        let replay = replay_clicks(self.surface.as_ref(), selection.timestamps());
        if !replay.found_any() {
            self.notifier.toast(NO_ELEMENTS_MESSAGE);
        }
        debug!(
            run_id,
            clicked = replay.clicked.len(),
            missing = replay.missing.len(),
            "synthetic input replayed"
        );

        tokio::time::sleep(self.options.commit_settle_delay).await;

        let timestamps = selection.to_set();
        let dispatched = self.bridge.commit_availability(&timestamps);

        let mut state = self.lock_state();
        let still_current = state.active_run == Some(run_id);
        if let Err(error) = dispatched {
            if still_current {
                state.active_run = None;
                state.phase = RunPhase::Idle;
            }
            warn!(run_id, error = %error, "availability write not dispatched");
            return Err(AutofillError::SaveFailure(error.to_string()));
        }
        if still_current {
            state.active_run = None;
            state.phase = RunPhase::Committed;
        }
        drop(state);

        let slot_count = timestamps.len();
        self.notifier
            .toast(&format!("Marked {slot_count} slots as available!"));
        info!(run_id, slot_count, "autofill_committed");
        Ok(slot_count)
    }
}
