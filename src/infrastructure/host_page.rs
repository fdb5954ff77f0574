//! Narrow adapter over the host page's own globals.
//!
//! The page's variables are undocumented and may be missing at any time (page still
//! loading, wrong page, script replaced). Every accessor here treats "undefined" and
//! "not the shape we expect" as ordinary `None` outcomes.

use crate::domain::models::{Slot, Timestamp};
use crate::infrastructure::error::AutofillError;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use url::Url;

pub const TIME_OF_SLOT: &str = "TimeOfSlot";
pub const AVAILABLE_AT_SLOT: &str = "AvailableAtSlot";
pub const USER_ID: &str = "UserID";
pub const PEOPLE_IDS: &str = "PeopleIDs";
pub const GROUP_ID: &str = "GroupID";
pub const EVENT_ID: &str = "EventID";

/// Access to the host-page script context.
pub trait HostPage: Send + Sync {
    /// Current value of a page global, `None` when it is undefined.
    fn global(&self, name: &str) -> Option<Value>;

    /// Runs `edit` against a page global in place. Returns `false` when undefined.
    fn edit_global(&self, name: &str, edit: &mut dyn FnMut(&mut Value)) -> bool;

    /// `window.location.href` of the page.
    fn location(&self) -> Option<String>;
}

/// Live view of the page's slot table (`TimeOfSlot`) in table order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotTable {
    timestamps: Vec<Timestamp>,
}

impl SlotTable {
    /// Reads both parallel tables; `None` unless both are defined and decodable.
    pub fn read<P>(page: &P) -> Option<Self>
    where
        P: HostPage + ?Sized,
    {
        let times = page.global(TIME_OF_SLOT)?;
        let availability = page.global(AVAILABLE_AT_SLOT)?;
        if !availability.is_array() {
            return None;
        }
        let timestamps = times
            .as_array()?
            .iter()
            .map(decode_timestamp)
            .collect::<Option<Vec<_>>>()?;
        Some(Self { timestamps })
    }

    pub fn from_timestamps(timestamps: Vec<Timestamp>) -> Self {
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

    pub fn slots(&self) -> Vec<Slot> {
        self.timestamps
            .iter()
            .enumerate()
            .map(|(index, timestamp)| Slot::new(index, *timestamp))
            .collect()
    }

    pub fn index_by_timestamp(&self) -> HashMap<Timestamp, usize> {
        self.timestamps
            .iter()
            .enumerate()
            .map(|(index, timestamp)| (*timestamp, index))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIdentity {
    pub person_id: String,
    pub event_id: String,
}

/// Resolves who is saving and for which event, trying each source in order.
pub fn resolve_identity<P>(page: &P) -> Result<HostIdentity, AutofillError>
where
    P: HostPage + ?Sized,
{
    let person_id = resolve_person_id(page);
    let event_id = resolve_event_id(page);
    match (person_id, event_id) {
        (Some(person_id), Some(event_id)) => Ok(HostIdentity {
            person_id,
            event_id,
        }),
        (None, Some(_)) => Err(AutofillError::MissingIdentity("person id".to_string())),
        (Some(_), None) => Err(AutofillError::MissingIdentity("event id".to_string())),
        (None, None) => Err(AutofillError::MissingIdentity(
            "person id and event id".to_string(),
        )),
    }
}

pub fn resolve_person_id<P>(page: &P) -> Option<String>
where
    P: HostPage + ?Sized,
{
    if let Some(user_id) = page.global(USER_ID).as_ref().and_then(decode_id) {
        return Some(user_id);
    }
    page.global(PEOPLE_IDS)
        .as_ref()
        .and_then(Value::as_array)
        .and_then(|people| people.last())
        .and_then(decode_id)
}

pub fn resolve_event_id<P>(page: &P) -> Option<String>
where
    P: HostPage + ?Sized,
{
    [GROUP_ID, EVENT_ID]
        .into_iter()
        .find_map(|name| page.global(name).as_ref().and_then(decode_id))
        .or_else(|| page.location().as_deref().and_then(event_token_from_url))
}

/// Numeric event token from a page URL: the query (`?35081112-5cGlg`) first, then the path.
pub fn event_token_from_url(location: &str) -> Option<String> {
    let url = Url::parse(location).ok()?;
    if let Some(token) = url.query().and_then(leading_digits) {
        return Some(token);
    }
    url.path_segments()?.find_map(leading_digits)
}

/// Adds `person_id` to each requested slot's availability list without replacing anything.
///
/// Entries that are not lists, or already list the person, are left as they are.
/// Returns how many slots were updated.
pub fn append_person_availability<P>(
    page: &P,
    indices: &[usize],
    person_id: &str,
) -> usize
where
    P: HostPage + ?Sized,
{
    let wanted: HashSet<usize> = indices.iter().copied().collect();
    let mut updated = 0;
    page.edit_global(AVAILABLE_AT_SLOT, &mut |table| {
        let Some(rows) = table.as_array_mut() else {
            return;
        };
        for (index, row) in rows.iter_mut().enumerate() {
            if !wanted.contains(&index) {
                continue;
            }
            let Some(people) = row.as_array_mut() else {
                continue;
            };
            let already_listed = people
                .iter()
                .filter_map(decode_id)
                .any(|existing| existing == person_id);
            if !already_listed {
                people.push(person_value(person_id));
                updated += 1;
            }
        }
    });
    updated
}

fn person_value(person_id: &str) -> Value {
    person_id
        .parse::<i64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::String(person_id.to_string()))
}

fn leading_digits(value: &str) -> Option<String> {
    let digits: String = value.chars().take_while(char::is_ascii_digit).collect();
    (!digits.is_empty()).then_some(digits)
}

fn decode_timestamp(value: &Value) -> Option<Timestamp> {
    match value {
        Value::Number(number) => number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|value| value.is_finite() && value.fract() == 0.0)
                .map(|value| value as i64)
        }),
        Value::String(raw) => raw.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Page ids follow the page's own truthiness: `0`, `""` and `null` mean "not set".
fn decode_id(value: &Value) -> Option<String> {
    match value {
        Value::Number(number) => {
            let integral = number.as_i64().or_else(|| {
                number
                    .as_f64()
                    .filter(|value| value.is_finite() && value.fract() == 0.0)
                    .map(|value| value as i64)
            })?;
            (integral != 0).then(|| integral.to_string())
        }
        Value::String(raw) => {
            let trimmed = raw.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        _ => None,
    }
}

/// Host page backed by a plain map of globals, used by embedders and tests.
#[derive(Debug, Default)]
pub struct InMemoryHostPage {
    globals: Mutex<HashMap<String, Value>>,
    location: Mutex<Option<String>>,
}

impl InMemoryHostPage {
    pub fn with_global(self, name: &str, value: Value) -> Self {
        self.set_global(name, value);
        self
    }

    pub fn with_location(self, location: &str) -> Self {
        if let Ok(mut guard) = self.location.lock() {
            *guard = Some(location.to_string());
        }
        self
    }

    pub fn set_global(&self, name: &str, value: Value) {
        if let Ok(mut globals) = self.globals.lock() {
            globals.insert(name.to_string(), value);
        }
    }

    pub fn remove_global(&self, name: &str) {
        if let Ok(mut globals) = self.globals.lock() {
            globals.remove(name);
        }
    }
}

impl HostPage for InMemoryHostPage {
    fn global(&self, name: &str) -> Option<Value> {
        self.globals.lock().ok()?.get(name).cloned()
    }

    fn edit_global(&self, name: &str, edit: &mut dyn FnMut(&mut Value)) -> bool {
        let Ok(mut globals) = self.globals.lock() else {
            return false;
        };
        match globals.get_mut(name) {
            Some(value) => {
                edit(value);
                true
            }
            None => false,
        }
    }

    fn location(&self) -> Option<String> {
        self.location.lock().ok()?.clone()
    }
}
