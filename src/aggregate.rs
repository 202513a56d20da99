//! Expanding per-customer aggregates that never include the event they describe.

use serde::{Deserialize, Serialize};

use crate::model::{Event, EventKind, Hours};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExpandingSnapshot {
    pub cum_spending: f64,
    pub cum_reward: f64,
    pub transactions_count: u32,
    pub offers_received_count: u32,
    pub offers_viewed_count: u32,
    pub offers_completed_count: u32,
    pub time_since_first_event: Hours,
}

impl ExpandingSnapshot {
    pub fn average_transaction_value(&self) -> Option<f64> {
        ratio(self.cum_spending, self.transactions_count)
    }

    pub fn offer_usage_ratio(&self) -> Option<f64> {
        ratio(
            self.offers_completed_count as f64,
            self.offers_received_count,
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExpandingAggregator {
    cum_spending: f64,
    cum_reward: f64,
    transactions_count: u32,
    offers_received_count: u32,
    offers_viewed_count: u32,
    offers_completed_count: u32,
    first_event_time: Option<Hours>,
}

impl ExpandingAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emits the totals of every earlier event, then folds `event` in.
    pub fn observe(&mut self, event: &Event) -> ExpandingSnapshot {
        if self.first_event_time.is_none() {
            self.first_event_time = Some(event.timestamp);
        }
        let snapshot = self.snapshot_at(event.timestamp);
        self.fold(event);
        snapshot
    }

    /// Current totals with the time since first event measured to `at`.
    /// Before any event has been seen the elapsed time is zero.
    pub fn snapshot_at(&self, at: Hours) -> ExpandingSnapshot {
        ExpandingSnapshot {
            cum_spending: self.cum_spending,
            cum_reward: self.cum_reward,
            transactions_count: self.transactions_count,
            offers_received_count: self.offers_received_count,
            offers_viewed_count: self.offers_viewed_count,
            offers_completed_count: self.offers_completed_count,
            time_since_first_event: self.first_event_time.map_or(0, |first| at - first),
        }
    }

    fn fold(&mut self, event: &Event) {
        self.cum_reward += event.reward;
        match event.kind {
            EventKind::Transaction => {
                self.cum_spending += event.amount;
                self.transactions_count += 1;
            }
            EventKind::OfferReceived => self.offers_received_count += 1,
            EventKind::OfferViewed => self.offers_viewed_count += 1,
            EventKind::OfferCompleted => self.offers_completed_count += 1,
        }
    }
}

/// One snapshot per event, in `seq` order.
pub fn expanding_aggregates(events: &[Event]) -> Vec<ExpandingSnapshot> {
    let mut aggregator = ExpandingAggregator::new();
    events.iter().map(|e| aggregator.observe(e)).collect()
}

fn ratio(numerator: f64, denominator: u32) -> Option<f64> {
    if denominator == 0 {
        None
    } else {
        Some(numerator / denominator as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history() -> Vec<Event> {
        vec![
            Event::offer("c", 1, 2, EventKind::OfferReceived, "o"),
            Event::transaction("c", 2, 5, 10.0),
            Event::offer("c", 3, 5, EventKind::OfferCompleted, "o").with_reward(3.0),
            Event::transaction("c", 4, 9, 4.0),
            Event::offer("c", 5, 12, EventKind::OfferViewed, "o"),
        ]
    }

    #[test]
    fn first_event_sees_empty_history() {
        let snaps = expanding_aggregates(&history());
        let first = snaps[0];
        assert_eq!(first.cum_spending, 0.0);
        assert_eq!(first.transactions_count, 0);
        assert_eq!(first.offers_received_count, 0);
        assert_eq!(first.time_since_first_event, 0);
        assert_eq!(first.average_transaction_value(), None);
        assert_eq!(first.offer_usage_ratio(), None);
    }

    #[test]
    fn current_event_is_excluded_from_its_own_totals() {
        let snaps = expanding_aggregates(&history());

        // seq 2 is the first transaction; it must not count itself.
        assert_eq!(snaps[1].transactions_count, 0);
        assert_eq!(snaps[1].cum_spending, 0.0);
        assert_eq!(snaps[1].offers_received_count, 1);

        // seq 3 shares a timestamp with seq 2 but comes later, so seq 2 counts.
        assert_eq!(snaps[2].transactions_count, 1);
        assert_eq!(snaps[2].cum_spending, 10.0);
        assert_eq!(snaps[2].offers_completed_count, 0);
        assert_eq!(snaps[2].cum_reward, 0.0);

        let last = snaps[4];
        assert_eq!(last.cum_spending, 14.0);
        assert_eq!(last.cum_reward, 3.0);
        assert_eq!(last.transactions_count, 2);
        assert_eq!(last.offers_completed_count, 1);
        assert_eq!(last.offers_viewed_count, 0);
        assert_eq!(last.time_since_first_event, 10);
        assert_eq!(last.average_transaction_value(), Some(7.0));
        assert_eq!(last.offer_usage_ratio(), Some(1.0));
    }

    #[test]
    fn snapshot_at_includes_every_folded_event() {
        let mut aggregator = ExpandingAggregator::new();
        for event in history() {
            aggregator.observe(&event);
        }
        let snap = aggregator.snapshot_at(20);
        assert_eq!(snap.offers_viewed_count, 1);
        assert_eq!(snap.time_since_first_event, 18);
    }
}
