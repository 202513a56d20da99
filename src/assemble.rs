//! Joins the per-event component outputs with offer and profile attributes into flat rows.

use serde::{Deserialize, Serialize};

use crate::activation::activation_flags;
use crate::aggregate::{expanding_aggregates, ExpandingSnapshot};
use crate::event_log::CustomerTimeline;
use crate::model::{CustomerProfile, Event, EventKind, OfferDefinition, OfferType};
use crate::recency::{recency_features, RecencySnapshot};
use crate::reference::OfferCatalog;
use crate::schema::{FeatureSchema, FeatureSource};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub event: Event,
    pub history: ExpandingSnapshot,
    pub recency: RecencySnapshot,
    /// One flag per catalog offer, in catalog order.
    pub active: Vec<bool>,
    /// The event's own offer, absent on transactions.
    pub offer: Option<OfferDefinition>,
    pub profile: CustomerProfile,
}

impl FeatureRow {
    pub fn offer_type(&self) -> Option<OfferType> {
        self.offer.as_ref().map(|o| o.offer_type)
    }

    pub fn value(&self, source: FeatureSource) -> Option<f64> {
        let offer = self.offer.as_ref();
        match source {
            FeatureSource::Seq => Some(self.event.seq as f64),
            FeatureSource::Timestamp => Some(self.event.timestamp as f64),
            FeatureSource::Amount => Some(self.event.amount),
            FeatureSource::Reward => Some(self.event.reward),
            FeatureSource::CumSpending => Some(self.history.cum_spending),
            FeatureSource::CumReward => Some(self.history.cum_reward),
            FeatureSource::TransactionsCount => Some(self.history.transactions_count as f64),
            FeatureSource::OffersReceivedCount => Some(self.history.offers_received_count as f64),
            FeatureSource::OffersViewedCount => Some(self.history.offers_viewed_count as f64),
            FeatureSource::OffersCompletedCount => {
                Some(self.history.offers_completed_count as f64)
            }
            FeatureSource::TimeSinceFirstEvent => Some(self.history.time_since_first_event as f64),
            FeatureSource::AverageTransactionValue => self.history.average_transaction_value(),
            FeatureSource::OfferUsageRatio => self.history.offer_usage_ratio(),
            FeatureSource::TimeSinceLast(kind) => {
                self.recency.time_since_last(kind).map(|h| h as f64)
            }
            FeatureSource::Active(idx) => {
                Some(flag(self.active.get(idx).copied().unwrap_or(false)))
            }
            FeatureSource::OfferDifficulty => offer.map(|o| o.difficulty),
            FeatureSource::OfferReward => offer.map(|o| o.reward),
            FeatureSource::OfferDuration => offer.map(|o| o.duration_hours as f64),
            FeatureSource::OfferEmail => offer.map(|o| flag(o.channels.email)),
            FeatureSource::OfferMobile => offer.map(|o| flag(o.channels.mobile)),
            FeatureSource::OfferSocial => offer.map(|o| flag(o.channels.social)),
            FeatureSource::OfferWeb => offer.map(|o| flag(o.channels.web)),
            FeatureSource::OfferType(t) => Some(flag(self.offer_type() == Some(t))),
            FeatureSource::Age => Some(self.profile.age as f64),
            FeatureSource::Income => self.profile.income,
            FeatureSource::EnrollmentTime => Some(self.profile.enrollment_time as f64),
            FeatureSource::Gender(g) => Some(flag(self.profile.gender == Some(g))),
        }
    }

    /// Projects the row onto the schema's column order.
    pub fn values(&self, schema: &FeatureSchema) -> Vec<Option<f64>> {
        schema
            .descriptors
            .iter()
            .map(|d| self.value(d.source))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    pub schema: FeatureSchema,
    /// Sorted by `(customer_id, seq)`.
    pub rows: Vec<FeatureRow>,
}

impl FeatureTable {
    pub fn get(&self, customer_id: &str, seq: u32) -> Option<&FeatureRow> {
        self.rows
            .binary_search_by(|row| {
                row.event
                    .customer_id
                    .as_str()
                    .cmp(customer_id)
                    .then(row.event.seq.cmp(&seq))
            })
            .ok()
            .map(|idx| &self.rows[idx])
    }

    pub fn received_rows(&self) -> impl Iterator<Item = &FeatureRow> {
        self.rows
            .iter()
            .filter(|row| row.event.kind == EventKind::OfferReceived)
    }
}

/// Runs the three per-customer components over one timeline and joins their
/// outputs by `seq`.
pub fn assemble_customer(
    timeline: &CustomerTimeline,
    catalog: &OfferCatalog,
    profile: &CustomerProfile,
) -> Vec<FeatureRow> {
    let events = &timeline.events;
    let history = expanding_aggregates(events);
    let recency = recency_features(events);
    let active = activation_flags(events, catalog);

    events
        .iter()
        .zip(history)
        .zip(recency)
        .zip(active)
        .map(|(((event, history), recency), active)| FeatureRow {
            event: event.clone(),
            history,
            recency,
            active,
            offer: event
                .offer_id
                .as_deref()
                .and_then(|id| catalog.get(id))
                .cloned(),
            profile: profile.clone(),
        })
        .collect()
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}
