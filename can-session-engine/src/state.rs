//! Bus state tracking
//!
//! Keeps the last-known payload per CAN id and reports which readings of a new
//! frame changed it. Every frame carries the full bus state, so the next state
//! is rebuilt from the frame alone: ids missing from the frame are dropped.

use crate::types::{ChangeEvent, DecodedFrame, DATA_LEN};
use std::collections::{HashMap, HashSet};

/// Last observed data bytes per CAN id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusState {
    readings: HashMap<u16, [u8; DATA_LEN]>,
}

impl BusState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: u16) -> Option<&[u8; DATA_LEN]> {
        self.readings.get(&id)
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn clear(&mut self) {
        self.readings.clear();
    }

    /// Diff a decoded frame against this state
    ///
    /// Returns the change events in reading order together with the state the
    /// frame describes. `self` is left untouched so a caller can discard the
    /// result.
    ///
    /// If an id repeats within the frame its last occurrence wins, and at most
    /// one event is emitted for it, at the position of its first occurrence.
    pub fn diff(&self, frame: &DecodedFrame) -> (Vec<ChangeEvent>, BusState) {
        let mut next = BusState {
            readings: HashMap::with_capacity(frame.readings.len()),
        };
        for reading in &frame.readings {
            next.readings.insert(reading.id, reading.data);
        }

        let mut seen = HashSet::with_capacity(next.readings.len());
        let mut changes = Vec::new();
        for reading in &frame.readings {
            if !seen.insert(reading.id) {
                continue;
            }
            let data = &next.readings[&reading.id];
            if self.readings.get(&reading.id) != Some(data) {
                changes.push(ChangeEvent {
                    time: frame.timestamp,
                    id: reading.id,
                    data: *data,
                });
            }
        }

        log::trace!(
            "Diffed {} readings: {} changed, {} ids tracked",
            frame.readings.len(),
            changes.len(),
            next.len()
        );

        (changes, next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Reading;

    fn frame(timestamp: u32, readings: &[(u16, u8)]) -> DecodedFrame {
        DecodedFrame {
            timestamp,
            readings: readings
                .iter()
                .map(|&(id, fill)| Reading::new(id, [fill; DATA_LEN]))
                .collect(),
            len: 5 + readings.len() * 10,
        }
    }

    #[test]
    fn test_first_frame_reports_everything() {
        let (changes, next) = BusState::new().diff(&frame(100, &[(1, 0xAA), (2, 0xBB)]));
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].id, 1);
        assert_eq!(changes[0].time, 100);
        assert_eq!(next.get(2), Some(&[0xBB; DATA_LEN]));
    }

    #[test]
    fn test_change_order_follows_source_order() {
        let (_, state) = BusState::new().diff(&frame(0, &[(10, 1), (20, 1), (30, 1)]));
        let (changes, _) = state.diff(&frame(50, &[(10, 1), (20, 2), (30, 2)]));

        let ids: Vec<u16> = changes.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![20, 30]);

        let (_, state) = BusState::new().diff(&frame(0, &[(30, 1), (10, 1)]));
        let (changes, _) = state.diff(&frame(50, &[(30, 9), (10, 9)]));
        let ids: Vec<u16> = changes.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![30, 10]);
    }

    #[test]
    fn test_diff_is_idempotent() {
        let prior = BusState::new().diff(&frame(0, &[(1, 1), (2, 2)])).1;
        let incoming = frame(10, &[(2, 3), (4, 4), (4, 5), (1, 1)]);

        let (_, next) = prior.diff(&incoming);
        let (again, same) = next.diff(&incoming);

        assert!(again.is_empty());
        assert_eq!(same, next);
    }

    #[test]
    fn test_missing_ids_are_dropped() {
        let (_, state) = BusState::new().diff(&frame(0, &[(1, 1), (2, 2)]));
        let (changes, next) = state.diff(&frame(10, &[(1, 1)]));

        assert!(changes.is_empty());
        assert_eq!(next.len(), 1);
        assert!(next.get(2).is_none());

        // id 2 reappearing with its old value counts as new
        let (changes, _) = next.diff(&frame(20, &[(1, 1), (2, 2)]));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].id, 2);
    }

    #[test]
    fn test_duplicate_id_last_occurrence_wins() {
        let (changes, next) = BusState::new().diff(&frame(0, &[(7, 1), (8, 2), (7, 3)]));

        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].id, 7);
        assert_eq!(changes[0].data, [3; DATA_LEN]);
        assert_eq!(changes[1].id, 8);
        assert_eq!(next.get(7), Some(&[3; DATA_LEN]));
    }

    #[test]
    fn test_diff_does_not_mutate_prior_state() {
        let (_, prior) = BusState::new().diff(&frame(0, &[(1, 1)]));
        let snapshot = prior.clone();
        let _ = prior.diff(&frame(10, &[(1, 2), (3, 3)]));
        assert_eq!(prior, snapshot);
    }
}
