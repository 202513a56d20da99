//! Forward spending labels for every offer reception.
//!
//! Window boundaries `t + h` rarely coincide with a real event, so zero-amount
//! checkpoints are merged into each customer's timeline at `t + h`. A trailing
//! rolling sum of width `h`, open on the left and closed on the right, read at
//! the checkpoint gives the spending in `(t, t + h]`. Labels whose window runs
//! past the last observed timestamp of the dataset are censored.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::model::{Event, EventKind, Hours};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetRow {
    pub customer_id: String,
    pub timestamp: Hours,
    /// One value per horizon, aligned with [`TargetTable::horizons`]; `None` is censored.
    pub spending_next: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetTable {
    pub horizons: Vec<Hours>,
    /// Sorted by `(customer_id, timestamp)`.
    pub rows: Vec<TargetRow>,
}

impl TargetTable {
    pub fn get(&self, customer_id: &str, timestamp: Hours) -> Option<&TargetRow> {
        self.rows
            .binary_search_by(|row| {
                row.customer_id
                    .as_str()
                    .cmp(customer_id)
                    .then(row.timestamp.cmp(&timestamp))
            })
            .ok()
            .map(|idx| &self.rows[idx])
    }

    pub fn column_names(&self) -> Vec<String> {
        self.horizons.iter().map(|h| target_column(*h)).collect()
    }

    /// Censored label count per horizon.
    pub fn censored_counts(&self) -> Vec<u64> {
        (0..self.horizons.len())
            .map(|i| {
                self.rows
                    .iter()
                    .filter(|row| row.spending_next[i].is_none())
                    .count() as u64
            })
            .collect()
    }
}

pub fn target_column(horizon: Hours) -> String {
    format!("spending_next_{horizon}h")
}

/// Labels for one customer's `seq`-ordered events; one row per distinct
/// reception timestamp.
pub fn customer_targets(
    customer_id: &str,
    events: &[Event],
    horizons: &[Hours],
    max_timestamp: Hours,
) -> Vec<TargetRow> {
    let received: BTreeSet<Hours> = events
        .iter()
        .filter(|e| e.kind == EventKind::OfferReceived)
        .map(|e| e.timestamp)
        .collect();
    if received.is_empty() {
        return Vec::new();
    }

    let mut timeline: BTreeMap<Hours, f64> = BTreeMap::new();
    for event in events {
        let amount = if event.kind == EventKind::Transaction {
            event.amount
        } else {
            0.0
        };
        *timeline.entry(event.timestamp).or_insert(0.0) += amount;
    }
    let anchors: BTreeSet<Hours> = events
        .iter()
        .filter(|e| matches!(e.kind, EventKind::OfferReceived | EventKind::Transaction))
        .map(|e| e.timestamp)
        .collect();

    let mut columns: Vec<HashMap<Hours, f64>> = Vec::with_capacity(horizons.len());
    for &horizon in horizons {
        let mut merged = timeline.clone();
        for anchor in &anchors {
            merged.entry(anchor.saturating_add(horizon)).or_insert(0.0);
        }
        let rolling = trailing_sums(&merged, horizon);
        columns.push(
            anchors
                .iter()
                .filter_map(|anchor| {
                    rolling
                        .get(&anchor.saturating_add(horizon))
                        .map(|sum| (*anchor, *sum))
                })
                .collect(),
        );
    }

    received
        .into_iter()
        .map(|t| TargetRow {
            customer_id: customer_id.to_string(),
            timestamp: t,
            spending_next: horizons
                .iter()
                .zip(&columns)
                .map(|(&horizon, column)| match t.checked_add(horizon) {
                    Some(end) if end <= max_timestamp => column.get(&t).copied(),
                    _ => None,
                })
                .collect(),
        })
        .collect()
}

/// Sum over `(ts - width, ts]` at every timeline point.
fn trailing_sums(timeline: &BTreeMap<Hours, f64>, width: Hours) -> HashMap<Hours, f64> {
    let points: Vec<(Hours, f64)> = timeline.iter().map(|(t, a)| (*t, *a)).collect();
    let mut sums = HashMap::with_capacity(points.len());
    let mut left = 0;
    let mut window = 0.0;
    for (idx, &(ts, amount)) in points.iter().enumerate() {
        window += amount;
        while left <= idx && points[left].0 <= ts.saturating_sub(width) {
            window -= points[left].1;
            left += 1;
        }
        sums.insert(ts, window);
    }
    sums
}
