//! Time since the last event of each kind, excluding the current event.

use serde::{Deserialize, Serialize};

use crate::model::{Event, EventKind, Hours};

const KIND_COUNT: usize = EventKind::ALL.len();

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecencySnapshot {
    since_last: [Option<Hours>; KIND_COUNT],
}

impl RecencySnapshot {
    pub fn time_since_last(&self, kind: EventKind) -> Option<Hours> {
        self.since_last[kind.index()]
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecencyTracker {
    last_seen: [Option<Hours>; KIND_COUNT],
}

impl RecencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, event: &Event) -> RecencySnapshot {
        let snapshot = self.snapshot_at(event.timestamp);
        self.last_seen[event.kind.index()] = Some(event.timestamp);
        snapshot
    }

    pub fn snapshot_at(&self, at: Hours) -> RecencySnapshot {
        RecencySnapshot {
            since_last: self.last_seen.map(|seen| seen.map(|t| at - t)),
        }
    }
}

pub fn recency_features(events: &[Event]) -> Vec<RecencySnapshot> {
    let mut tracker = RecencyTracker::new();
    events.iter().map(|e| tracker.observe(e)).collect()
}
