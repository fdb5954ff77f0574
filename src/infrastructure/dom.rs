//! DOM-side surfaces of the isolated script context: slot elements and toasts.

use crate::domain::models::Timestamp;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

/// Marker class applied to previewed slot elements.
pub const PREVIEW_MARKER_CLASS: &str = "w2m-gcal-preview-available";

/// Element id convention of the host grid for the current user's slots.
pub fn slot_element_id(timestamp: Timestamp) -> String {
    format!("YouTime{timestamp}")
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn center(&self) -> (f64, f64) {
        (self.left + self.width / 2.0, self.top + self.height / 2.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlotElement {
    pub element_id: String,
    pub rect: Rect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerEventKind {
    MouseDown,
    MouseUp,
    Click,
}

impl PointerEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MouseDown => "mousedown",
            Self::MouseUp => "mouseup",
            Self::Click => "click",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    pub kind: PointerEventKind,
    pub client_x: f64,
    pub client_y: f64,
    pub bubbles: bool,
    pub cancelable: bool,
}

/// The grid's slot elements as seen from the isolated script.
pub trait SlotSurface: Send + Sync {
    fn element_by_id(&self, element_id: &str) -> Option<SlotElement>;

    /// First element carrying `data-time="{timestamp}"`.
    fn element_by_data_time(&self, timestamp: Timestamp) -> Option<SlotElement>;

    fn add_class(&self, element_id: &str, class: &str);

    /// Removes `class` from every element that has it; returns how many were touched.
    fn remove_class_everywhere(&self, class: &str) -> usize;

    fn dispatch(&self, element_id: &str, event: &PointerEvent);
}

/// Looks a slot up by id first, then by data attribute.
pub fn find_slot_element<S>(surface: &S, timestamp: Timestamp) -> Option<SlotElement>
where
    S: SlotSurface + ?Sized,
{
    surface
        .element_by_id(&slot_element_id(timestamp))
        .or_else(|| surface.element_by_data_time(timestamp))
}

pub trait Notifier: Send + Sync {
    fn toast(&self, message: &str);
}

#[derive(Debug, Default)]
struct SurfaceState {
    elements: HashMap<String, SlotElement>,
    data_times: HashMap<Timestamp, String>,
    classes: HashMap<String, BTreeSet<String>>,
    dispatched: Vec<(String, PointerEvent)>,
}

/// Slot surface kept in memory; records every dispatched event.
#[derive(Debug, Default)]
pub struct InMemorySlotSurface {
    state: Mutex<SurfaceState>,
}

impl InMemorySlotSurface {
    /// Lays out one `YouTime{ts}` element per timestamp in a single column.
    pub fn with_grid(timestamps: &[Timestamp]) -> Self {
        let surface = Self::default();
        for (row, timestamp) in timestamps.iter().enumerate() {
            surface.insert(
                SlotElement {
                    element_id: slot_element_id(*timestamp),
                    rect: Rect {
                        left: 100.0,
                        top: 200.0 + row as f64 * 10.0,
                        width: 40.0,
                        height: 10.0,
                    },
                },
                None,
            );
        }
        surface
    }

    pub fn insert(&self, element: SlotElement, data_time: Option<Timestamp>) {
        if let Ok(mut state) = self.state.lock() {
            if let Some(timestamp) = data_time {
                state
                    .data_times
                    .insert(timestamp, element.element_id.clone());
            }
            state.elements.insert(element.element_id.clone(), element);
        }
    }

    pub fn elements_with_class(&self, class: &str) -> BTreeSet<String> {
        let Ok(state) = self.state.lock() else {
            return BTreeSet::new();
        };
        state
            .classes
            .iter()
            .filter(|(_, classes)| classes.contains(class))
            .map(|(element_id, _)| element_id.clone())
            .collect()
    }

    pub fn dispatched(&self) -> Vec<(String, PointerEvent)> {
        self.state
            .lock()
            .map(|state| state.dispatched.clone())
            .unwrap_or_default()
    }
}

impl SlotSurface for InMemorySlotSurface {
    fn element_by_id(&self, element_id: &str) -> Option<SlotElement> {
        self.state.lock().ok()?.elements.get(element_id).cloned()
    }

    fn element_by_data_time(&self, timestamp: Timestamp) -> Option<SlotElement> {
        let state = self.state.lock().ok()?;
        let element_id = state.data_times.get(&timestamp)?;
        state.elements.get(element_id).cloned()
    }

    fn add_class(&self, element_id: &str, class: &str) {
        if let Ok(mut state) = self.state.lock() {
            if state.elements.contains_key(element_id) {
                state
                    .classes
                    .entry(element_id.to_string())
                    .or_default()
                    .insert(class.to_string());
            }
        }
    }

    fn remove_class_everywhere(&self, class: &str) -> usize {
        let Ok(mut state) = self.state.lock() else {
            return 0;
        };
        state
            .classes
            .values_mut()
            .map(|classes| classes.remove(class))
            .filter(|removed| *removed)
            .count()
    }

    fn dispatch(&self, element_id: &str, event: &PointerEvent) {
        if let Ok(mut state) = self.state.lock() {
            state.dispatched.push((element_id.to_string(), *event));
        }
    }
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }
}

impl Notifier for RecordingNotifier {
    fn toast(&self, message: &str) {
        tracing::info!(message, "toast");
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(message.to_string());
        }
    }
}
