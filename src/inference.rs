//! Seam to externally trained spending models, plus synthetic "what if this
//! offer were sent now" rows.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::activation::ActivationIndex;
use crate::aggregate::ExpandingAggregator;
use crate::assemble::FeatureRow;
use crate::event_log::EventLog;
use crate::model::{Event, EventKind, Hours};
use crate::pipeline::SnapshotPipeline;
use crate::recency::RecencyTracker;
use crate::schema::{assert_schema_compatible, FeatureSchema, SchemaError};

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("incompatible feature schema: {0}")]
    Schema(#[from] SchemaError),
    #[error("customer {0} has no events")]
    UnknownCustomer(String),
    #[error("customer {0} has no profile")]
    MissingProfile(String),
    #[error("customer {customer_id}: what-if time {at} precedes last event at {last}")]
    TimeBeforeHistory {
        customer_id: String,
        at: Hours,
        last: Hours,
    },
    #[error("model for horizon {horizon_hours}h failed: {message}")]
    Model { horizon_hours: Hours, message: String },
}

/// A trained model for one horizon. Its parameters are opaque to this crate.
pub trait SpendingModel: Send + Sync {
    fn horizon_hours(&self) -> Hours;

    /// Spending between the previous (shorter) horizon and this one.
    fn predict_increment(&self, features: &[Option<f64>]) -> Result<f64, InferenceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HorizonPrediction {
    pub horizon_hours: Hours,
    pub spending: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferForecast {
    pub offer_code: String,
    pub predictions: Vec<HorizonPrediction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhatIfRow {
    pub offer_code: String,
    pub row: FeatureRow,
}

pub struct SpendingPredictor {
    schema_version: u32,
    schema_fingerprint: String,
    models: Vec<Box<dyn SpendingModel>>,
}

impl SpendingPredictor {
    /// `schema_version` and `schema_fingerprint` are those the models were trained on.
    pub fn new(
        schema_version: u32,
        schema_fingerprint: impl Into<String>,
        mut models: Vec<Box<dyn SpendingModel>>,
    ) -> Self {
        models.sort_by_key(|m| m.horizon_hours());
        Self {
            schema_version,
            schema_fingerprint: schema_fingerprint.into(),
            models,
        }
    }

    pub fn horizons(&self) -> Vec<Hours> {
        self.models.iter().map(|m| m.horizon_hours()).collect()
    }

    /// Cumulative spending per horizon, ascending: each model's increment is
    /// added to the total of the shorter horizons.
    pub fn predict(
        &self,
        schema: &FeatureSchema,
        row: &FeatureRow,
    ) -> Result<Vec<HorizonPrediction>, InferenceError> {
        assert_schema_compatible(self.schema_version, &self.schema_fingerprint, schema)?;
        let values = row.values(schema);

        let mut total = 0.0;
        let mut out = Vec::with_capacity(self.models.len());
        for model in &self.models {
            total += model.predict_increment(&values)?;
            out.push(HorizonPrediction {
                horizon_hours: model.horizon_hours(),
                spending: total,
            });
        }
        Ok(out)
    }

    pub fn forecast(
        &self,
        schema: &FeatureSchema,
        candidates: &[WhatIfRow],
    ) -> Result<Vec<OfferForecast>, InferenceError> {
        candidates
            .iter()
            .map(|candidate| {
                Ok(OfferForecast {
                    offer_code: candidate.offer_code.clone(),
                    predictions: self.predict(schema, &candidate.row)?,
                })
            })
            .collect()
    }
}

/// One candidate row per catalog offer for `customer_id` at time `at`.
///
/// The snapshot folds in the customer's whole history (every event is in the
/// past at `at`), measures recency to `at`, and stabs the activation index at
/// `at`. Each candidate then forces its own offer active and carries that
/// offer's metadata as if it had just been received.
pub fn what_if_rows(
    pipeline: &SnapshotPipeline,
    log: &EventLog,
    customer_id: &str,
    at: Hours,
) -> Result<Vec<WhatIfRow>, InferenceError> {
    let timeline = log
        .timeline(customer_id)
        .ok_or_else(|| InferenceError::UnknownCustomer(customer_id.to_string()))?;
    let profile = pipeline
        .profiles()
        .get(customer_id)
        .ok_or_else(|| InferenceError::MissingProfile(customer_id.to_string()))?;

    let last = timeline.last_timestamp().unwrap_or(at);
    if at < last {
        return Err(InferenceError::TimeBeforeHistory {
            customer_id: customer_id.to_string(),
            at,
            last,
        });
    }

    let mut aggregator = ExpandingAggregator::new();
    let mut recency = RecencyTracker::new();
    for event in &timeline.events {
        aggregator.observe(event);
        recency.observe(event);
    }
    let history = aggregator.snapshot_at(at);
    let recency = recency.snapshot_at(at);

    let catalog = pipeline.catalog();
    let active_now = ActivationIndex::from_events(&timeline.events, catalog).active_at(at);
    let seq = timeline.events.len() as u32 + 1;

    Ok(catalog
        .offers()
        .iter()
        .enumerate()
        .map(|(idx, offer)| {
            let mut active = active_now.clone();
            active[idx] = true;
            WhatIfRow {
                offer_code: offer.code.clone(),
                row: FeatureRow {
                    event: Event::offer(
                        customer_id,
                        seq,
                        at,
                        EventKind::OfferReceived,
                        &offer.offer_id,
                    ),
                    history,
                    recency,
                    active,
                    offer: Some(offer.clone()),
                    profile: profile.clone(),
                },
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::model::{ChannelFlags, CustomerProfile, OfferDefinition, OfferType};
    use crate::pipeline::PipelineConfig;
    use crate::reference::{OfferCatalog, ProfileTable};

    struct ColumnModel {
        horizon_hours: Hours,
        column: usize,
        scale: f64,
    }

    impl SpendingModel for ColumnModel {
        fn horizon_hours(&self) -> Hours {
            self.horizon_hours
        }

        fn predict_increment(&self, features: &[Option<f64>]) -> Result<f64, InferenceError> {
            features[self.column]
                .map(|v| v * self.scale)
                .ok_or_else(|| InferenceError::Model {
                    horizon_hours: self.horizon_hours,
                    message: "null input".to_string(),
                })
        }
    }

    fn pipeline() -> SnapshotPipeline {
        let offer = |id: &str, code: &str, offer_type: OfferType, duration_hours: Hours| {
            OfferDefinition {
                offer_id: id.to_string(),
                code: code.to_string(),
                offer_type,
                difficulty: 10.0,
                reward: 2.0,
                duration_hours,
                channels: ChannelFlags::default(),
            }
        };
        let catalog = OfferCatalog::new(vec![
            offer("a", "A", OfferType::Bogo, 10),
            offer("b", "B", OfferType::Informational, 72),
        ])
        .expect("valid catalog");
        let profiles = ProfileTable::new(vec![CustomerProfile {
            customer_id: "c1".to_string(),
            age: 30,
            income: Some(50_000.0),
            enrollment_time: 0,
            gender: None,
        }])
        .expect("valid profiles");
        SnapshotPipeline::new(
            Arc::new(catalog),
            Arc::new(profiles),
            &PipelineConfig::default(),
        )
        .expect("valid pipeline")
    }

    fn log() -> EventLog {
        EventLog::from_events(vec![
            Event::offer("c1", 1, 0, EventKind::OfferReceived, "a"),
            Event::transaction("c1", 2, 3, 5.0),
            Event::transaction("c1", 3, 12, 2.0),
        ])
        .expect("valid log")
    }

    #[test]
    fn what_if_rows_fold_full_history_and_force_each_offer_active() {
        let pipeline = pipeline();
        let err = what_if_rows(&pipeline, &log(), "c1", 5).expect_err("5 precedes history");
        assert!(matches!(err, InferenceError::TimeBeforeHistory { last: 12, .. }));

        let rows = what_if_rows(&pipeline, &log(), "c1", 20).expect("what-if rows");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].offer_code, "A");
        assert_eq!(rows[0].row.active, vec![true, false]);
        assert_eq!(rows[1].row.active, vec![false, true]);
        assert_eq!(rows[1].row.offer_type(), Some(OfferType::Informational));

        let row = &rows[0].row;
        assert_eq!(row.event.seq, 4);
        assert_eq!(row.history.transactions_count, 2);
        assert_eq!(row.history.cum_spending, 7.0);
        assert_eq!(row.history.time_since_first_event, 20);
        assert_eq!(row.recency.time_since_last(EventKind::Transaction), Some(8));
        assert_eq!(row.recency.time_since_last(EventKind::OfferReceived), Some(20));
    }

    #[test]
    fn unknown_customer_is_reported() {
        let err = what_if_rows(&pipeline(), &log(), "ghost", 20).expect_err("unknown customer");
        assert!(matches!(err, InferenceError::UnknownCustomer(id) if id == "ghost"));
    }

    #[test]
    fn predictions_accumulate_increments_in_horizon_order() {
        let pipeline = pipeline();
        let schema = pipeline.schema();
        let col = schema.position("cum_spending").expect("cum_spending column");
        let predictor = SpendingPredictor::new(
            schema.version,
            schema.fingerprint.clone(),
            vec![
                Box::new(ColumnModel {
                    horizon_hours: 72,
                    column: col,
                    scale: 2.0,
                }) as Box<dyn SpendingModel>,
                Box::new(ColumnModel {
                    horizon_hours: 10,
                    column: col,
                    scale: 1.0,
                }),
            ],
        );
        assert_eq!(predictor.horizons(), vec![10, 72]);

        let candidates = what_if_rows(&pipeline, &log(), "c1", 20).expect("what-if rows");
        let forecasts = predictor.forecast(schema, &candidates).expect("forecast");
        assert_eq!(forecasts.len(), 2);
        assert_eq!(
            forecasts[0].predictions,
            vec![
                HorizonPrediction {
                    horizon_hours: 10,
                    spending: 7.0
                },
                HorizonPrediction {
                    horizon_hours: 72,
                    spending: 21.0
                },
            ]
        );
    }

    #[test]
    fn predictor_rejects_foreign_schema() {
        let pipeline = pipeline();
        let predictor = SpendingPredictor::new(pipeline.schema().version, "stale", Vec::new());
        let candidates = what_if_rows(&pipeline, &log(), "c1", 20).expect("what-if rows");
        let err = predictor
            .predict(pipeline.schema(), &candidates[0].row)
            .expect_err("stale fingerprint");
        assert!(matches!(
            err,
            InferenceError::Schema(SchemaError::FingerprintMismatch { .. })
        ));
    }
}
