use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Seconds since the Unix epoch, as used by the host page's slot table.
pub type Timestamp = i64;

/// Every grid slot spans the same fixed 15 minutes.
pub const SLOT_DURATION_SECONDS: i64 = 15 * 60;

pub const DEFAULT_EVENT_SUMMARY: &str = "(No title)";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Slot {
    pub index: usize,
    pub timestamp: Timestamp,
}

impl Slot {
    pub fn new(index: usize, timestamp: Timestamp) -> Self {
        Self { index, timestamp }
    }

    pub fn start_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.timestamp, 0).single()
    }

    pub fn end_at(&self) -> Option<DateTime<Utc>> {
        self.start_at()?
            .checked_add_signed(Duration::seconds(SLOT_DURATION_SECONDS))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BusyInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub summary: String,
}

impl BusyInterval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, summary: impl Into<String>) -> Self {
        Self {
            start,
            end,
            summary: summary.into(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.end < self.start {
            return Err("busy_interval.end must be >= busy_interval.start".to_string());
        }
        Ok(())
    }
}

/// Reply of the host context to a grid read, in wire shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GridSnapshot {
    pub slots: Vec<Slot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GridSnapshot {
    pub fn from_slots(slots: Vec<Slot>) -> Self {
        Self { slots, error: None }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            slots: Vec::new(),
            error: Some(message.into()),
        }
    }
}

/// Absolute window `[start, end)` queried from the remote calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl QueryRange {
    /// `[min(ts), max(ts) + slot duration)` over the grid; `None` for an empty grid.
    pub fn covering(slots: &[Slot]) -> Option<Self> {
        let min = slots.iter().map(|slot| slot.timestamp).min()?;
        let max = slots.iter().map(|slot| slot.timestamp).max()?;
        let start = Utc.timestamp_opt(min, 0).single()?;
        let end = Utc
            .timestamp_opt(max.checked_add(SLOT_DURATION_SECONDS)?, 0)
            .single()?;
        Some(Self { start, end })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEntry {
    pub id: String,
    pub display_name: String,
    pub color: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    FetchingGrid,
    FetchingBusy,
    Computing,
    Previewing,
    Committing,
    Committed,
    Cancelled,
}

impl RunPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::FetchingGrid => "fetching_grid",
            Self::FetchingBusy => "fetching_busy",
            Self::Computing => "computing",
            Self::Previewing => "previewing",
            Self::Committing => "committing",
            Self::Committed => "committed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Phases in which a new run must cancel the current one first.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::FetchingGrid | Self::FetchingBusy | Self::Computing | Self::Previewing
        )
    }
}

/// Free-slot timestamps chosen during one run, in grid order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreviewSelection {
    timestamps: Vec<Timestamp>,
}

impl PreviewSelection {
    pub fn new(timestamps: Vec<Timestamp>) -> Self {
        Self { timestamps }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[Timestamp] {
        &self.timestamps
    }

    pub fn contains(&self, timestamp: Timestamp) -> bool {
        self.timestamps.contains(&timestamp)
    }

    pub fn into_timestamps(self) -> Vec<Timestamp> {
        self.timestamps
    }

    pub fn to_set(&self) -> BTreeSet<Timestamp> {
        self.timestamps.iter().copied().collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OAuthToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub token_type: String,
    pub scope: Option<String>,
}

impl OAuthToken {
    pub fn is_valid_at(&self, now: DateTime<Utc>, leeway_seconds: i64) -> bool {
        self.expires_at > now + Duration::seconds(leeway_seconds)
            && !self.access_token.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    #[test]
    fn slot_spans_fifteen_minutes() {
        let slot = Slot::new(0, 1_771_200_000);
        let start = slot.start_at().expect("start");
        let end = slot.end_at().expect("end");
        assert_eq!((end - start).num_seconds(), 900);
    }

    #[test]
    fn query_range_covers_last_slot() {
        let slots = vec![
            Slot::new(0, 1_771_232_400),
            Slot::new(1, 1_771_233_300),
            Slot::new(2, 1_771_234_200),
        ];
        let range = QueryRange::covering(&slots).expect("range");
        assert_eq!(range.start, fixed_time("2026-02-16T09:00:00Z"));
        assert_eq!(range.end, fixed_time("2026-02-16T09:45:00Z"));
    }

    #[test]
    fn out_of_range_timestamps_have_no_bounds() {
        assert!(QueryRange::covering(&[Slot::new(0, 0), Slot::new(1, i64::MAX)]).is_none());
        assert!(Slot::new(0, i64::MAX).end_at().is_none());
        assert!(Slot::new(0, i64::MAX - 100).end_at().is_none());
    }

    #[test]
    fn query_range_of_empty_grid_is_none() {
        assert!(QueryRange::covering(&[]).is_none());
    }

    #[test]
    fn busy_interval_validate_rejects_reverse_range() {
        let interval = BusyInterval::new(
            fixed_time("2026-02-16T10:00:00Z"),
            fixed_time("2026-02-16T09:00:00Z"),
            "Standup",
        );
        assert!(interval.validate().is_err());
    }

    #[test]
    fn grid_snapshot_omits_error_when_absent() {
        let encoded = serde_json::to_value(GridSnapshot::from_slots(vec![Slot::new(0, 900)]))
            .expect("encode snapshot");
        assert_eq!(
            encoded,
            serde_json::json!({ "slots": [{ "index": 0, "timestamp": 900 }] })
        );
    }

    #[test]
    fn only_pre_commit_phases_are_active() {
        assert!(RunPhase::Previewing.is_active());
        assert!(RunPhase::FetchingBusy.is_active());
        assert!(!RunPhase::Committing.is_active());
        assert!(!RunPhase::Idle.is_active());
    }

    #[test]
    fn token_validity_respects_leeway() {
        let now = fixed_time("2026-02-16T09:00:00Z");
        let token = OAuthToken {
            access_token: "token".to_string(),
            refresh_token: None,
            expires_at: now + Duration::seconds(30),
            token_type: "Bearer".to_string(),
            scope: None,
        };
        assert!(token.is_valid_at(now, 0));
        assert!(!token.is_valid_at(now, 60));
    }
}
