//! Replays the pointer sequence a user would produce when clicking a slot, so the host grid's
//! own handlers paint the selection.

use crate::domain::models::Timestamp;
use crate::infrastructure::dom::{
    PointerEvent, PointerEventKind, Rect, SlotSurface, find_slot_element,
};

const CLICK_SEQUENCE: [PointerEventKind; 3] = [
    PointerEventKind::MouseDown,
    PointerEventKind::MouseUp,
    PointerEventKind::Click,
];

/// mousedown, mouseup, click at the centre of `rect`; all bubbling and cancelable.
pub fn click_sequence(rect: &Rect) -> [PointerEvent; 3] {
    let (client_x, client_y) = rect.center();
    CLICK_SEQUENCE.map(|kind| PointerEvent {
        kind,
        client_x,
        client_y,
        bubbles: true,
        cancelable: true,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub clicked: Vec<Timestamp>,
    pub missing: Vec<Timestamp>,
}

impl ReplayReport {
    pub fn found_any(&self) -> bool {
        !self.clicked.is_empty()
    }
}

pub fn replay_clicks<S>(surface: &S, timestamps: &[Timestamp]) -> ReplayReport
where
    S: SlotSurface + ?Sized,
{
    let mut report = ReplayReport::default();
    for &timestamp in timestamps {
        let Some(element) = find_slot_element(surface, timestamp) else {
            report.missing.push(timestamp);
            continue;
        };
        for event in click_sequence(&element.rect) {
            surface.dispatch(&element.element_id, &event);
        }
        report.clicked.push(timestamp);
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::dom::InMemorySlotSurface;

    #[test]
    fn sequence_targets_center_in_order() {
        let events = click_sequence(&Rect {
            left: 10.0,
            top: 20.0,
            width: 30.0,
            height: 12.0,
        });
        let kinds: Vec<_> = events.iter().map(|event| event.kind.as_str()).collect();
        assert_eq!(kinds, vec!["mousedown", "mouseup", "click"]);
        for event in events {
            assert_eq!((event.client_x, event.client_y), (25.0, 26.0));
            assert!(event.bubbles && event.cancelable);
        }
    }

    #[test]
    fn replay_skips_missing_elements() {
        let surface = InMemorySlotSurface::with_grid(&[0, 900]);
        let report = replay_clicks(&surface, &[0, 1800, 900]);

        assert_eq!(report.clicked, vec![0, 900]);
        assert_eq!(report.missing, vec![1800]);
        assert!(report.found_any());

        let dispatched = surface.dispatched();
        assert_eq!(dispatched.len(), 6);
        assert!(dispatched[..3].iter().all(|(id, _)| id == "YouTime0"));
        assert!(dispatched[3..].iter().all(|(id, _)| id == "YouTime900"));
    }

    #[test]
    fn replay_on_empty_surface_finds_nothing() {
        let surface = InMemorySlotSurface::default();
        let report = replay_clicks(&surface, &[0]);
        assert!(!report.found_any());
        assert!(surface.dispatched().is_empty());
    }
}
