use crate::domain::models::{BusyInterval, CalendarEntry, DEFAULT_EVENT_SUMMARY};
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Utc};

const DEFAULT_CALENDAR_COLOR: &str = "#4285f4";

/// Start or end of a Google event: timed events carry `dateTime`, all-day ones `date`.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct CalendarEventDateTime {
    #[serde(rename = "dateTime", default, skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(rename = "timeZone", default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct GoogleCalendarEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub start: CalendarEventDateTime,
    #[serde(default)]
    pub end: CalendarEventDateTime,
}

impl GoogleCalendarEvent {
    pub fn is_cancelled(&self) -> bool {
        self.status
            .as_deref()
            .map(|status| status.eq_ignore_ascii_case("cancelled"))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CalendarListItem {
    pub id: String,
    pub summary: Option<String>,
    #[serde(rename = "backgroundColor")]
    pub background_color: Option<String>,
    pub selected: Option<bool>,
}

/// Maps a timed, non-cancelled event to a busy interval; other events yield `None`.
pub fn to_busy_interval(event: &GoogleCalendarEvent) -> Result<Option<BusyInterval>, InfraError> {
    if event.is_cancelled() {
        return Ok(None);
    }
    let (Some(start), Some(end)) = (
        event.start.date_time.as_deref(),
        event.end.date_time.as_deref(),
    ) else {
        return Ok(None);
    };

    let start = parse_rfc3339_utc(start, "start.dateTime")?;
    let end = parse_rfc3339_utc(end, "end.dateTime")?;
    let summary = event
        .summary
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_EVENT_SUMMARY);

    Ok(Some(BusyInterval::new(start, end, summary)))
}

pub fn to_calendar_entry(item: CalendarListItem) -> Option<CalendarEntry> {
    let id = item.id.trim();
    if id.is_empty() {
        return None;
    }
    let display_name = item
        .summary
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(id)
        .to_string();
    let color = item
        .background_color
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_CALENDAR_COLOR)
        .to_string();

    Some(CalendarEntry {
        id: id.to_string(),
        display_name,
        color,
        enabled: item.selected != Some(false),
    })
}

fn parse_rfc3339_utc(value: &str, field_name: &str) -> Result<DateTime<Utc>, InfraError> {
    DateTime::parse_from_rfc3339(value)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| {
            InfraError::Http(format!(
                "invalid calendar event {field_name} '{value}': {error}"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timed_event(start: &str, end: &str) -> GoogleCalendarEvent {
        GoogleCalendarEvent {
            id: Some("evt-1".to_string()),
            summary: Some("Standup".to_string()),
            status: Some("confirmed".to_string()),
            start: CalendarEventDateTime {
                date_time: Some(start.to_string()),
                ..CalendarEventDateTime::default()
            },
            end: CalendarEventDateTime {
                date_time: Some(end.to_string()),
                ..CalendarEventDateTime::default()
            },
        }
    }

    #[test]
    fn timed_event_maps_to_utc_interval() {
        let event = timed_event("2026-02-16T10:00:00+09:00", "2026-02-16T10:30:00+09:00");
        let interval = to_busy_interval(&event)
            .expect("valid event")
            .expect("timed event");
        assert_eq!(interval.start.to_rfc3339(), "2026-02-16T01:00:00+00:00");
        assert_eq!(interval.end.to_rfc3339(), "2026-02-16T01:30:00+00:00");
        assert_eq!(interval.summary, "Standup");
    }

    #[test]
    fn all_day_and_cancelled_events_are_skipped() {
        let all_day: GoogleCalendarEvent = serde_json::from_value(serde_json::json!({
            "id": "holiday",
            "start": { "date": "2026-02-16" },
            "end": { "date": "2026-02-17" }
        }))
        .expect("decode all-day event");
        assert_eq!(to_busy_interval(&all_day).expect("no error"), None);

        let mut cancelled = timed_event("2026-02-16T10:00:00Z", "2026-02-16T11:00:00Z");
        cancelled.status = Some("cancelled".to_string());
        assert_eq!(to_busy_interval(&cancelled).expect("no error"), None);
    }

    #[test]
    fn untitled_event_gets_placeholder_summary() {
        let mut event = timed_event("2026-02-16T10:00:00Z", "2026-02-16T11:00:00Z");
        event.summary = None;
        let interval = to_busy_interval(&event).expect("valid").expect("timed");
        assert_eq!(interval.summary, "(No title)");
    }

    #[test]
    fn invalid_datetime_is_an_error() {
        let event = timed_event("yesterday", "2026-02-16T11:00:00Z");
        assert!(to_busy_interval(&event).is_err());
    }

    #[test]
    fn calendar_entry_defaults() {
        let entry = to_calendar_entry(CalendarListItem {
            id: "team@group.calendar.google.com".to_string(),
            summary: None,
            background_color: None,
            selected: None,
        })
        .expect("non-empty id");
        assert_eq!(entry.display_name, "team@group.calendar.google.com");
        assert_eq!(entry.color, "#4285f4");
        assert!(entry.enabled);

        let hidden = to_calendar_entry(CalendarListItem {
            id: "hidden".to_string(),
            summary: Some("Hidden".to_string()),
            background_color: Some("#000000".to_string()),
            selected: Some(false),
        })
        .expect("non-empty id");
        assert!(!hidden.enabled);

        assert!(
            to_calendar_entry(CalendarListItem {
                id: "  ".to_string(),
                summary: None,
                background_color: None,
                selected: None,
            })
            .is_none()
        );
    }
}
