//! Free/busy classification of grid slots.

use crate::domain::models::{BusyInterval, Slot, Timestamp, SLOT_DURATION_SECONDS};
use chrono::{DateTime, TimeZone, Utc};

/// Returns the timestamps of slots that no busy interval overlaps, in input order.
///
/// Overlap is half-open on both sides: an interval that ends exactly when a slot
/// starts, or starts exactly when it ends, leaves the slot free.
pub fn compute_free_slots(slots: &[Slot], busy_intervals: &[BusyInterval]) -> Vec<Timestamp> {
    slots
        .iter()
        .filter(|slot| !is_slot_busy(slot, busy_intervals))
        .map(|slot| slot.timestamp)
        .collect()
}

pub fn is_slot_busy(slot: &Slot, busy_intervals: &[BusyInterval]) -> bool {
    let Some((slot_start, slot_end)) = slot_bounds(slot) else {
        return false;
    };
    busy_intervals
        .iter()
        .any(|interval| interval.start < slot_end && interval.end > slot_start)
}

fn slot_bounds(slot: &Slot) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let start = Utc.timestamp_opt(slot.timestamp, 0).single()?;
    let end = Utc
        .timestamp_opt(slot.timestamp.checked_add(SLOT_DURATION_SECONDS)?, 0)
        .single()?;
    Some((start, end))
}
