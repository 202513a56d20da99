//! Snapshot-and-label pipeline: event log in, feature/target/training tables out.

use std::collections::HashSet;
use std::env;
use std::path::Path;
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::assemble::{assemble_customer, FeatureRow, FeatureTable};
use crate::event_log::{CustomerTimeline, EventLog};
use crate::model::{Event, EventKind, Hours};
use crate::observability::parse_bool;
use crate::reference::{
    check_references, OfferCatalog, ProfileTable, ReferenceIntegrityError, ReferenceLoadError,
    ReferenceRepository,
};
use crate::schema::{build_feature_schema, FeatureSchema, FEATURE_SCHEMA_VERSION};
use crate::targets::{customer_targets, TargetTable};
use crate::transcript::ValidationError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Overrides the catalog-derived horizon set.
    pub horizons_hours: Option<Vec<Hours>>,
    pub schema_version: u32,
    /// Run per-customer work on the rayon pool.
    pub parallel: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            horizons_hours: None,
            schema_version: FEATURE_SCHEMA_VERSION,
            parallel: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("reference integrity violated: {0}")]
    ReferenceIntegrity(#[from] ReferenceIntegrityError),
    #[error("reference load failed: {0}")]
    ReferenceLoad(#[from] ReferenceLoadError),
    #[error("invalid pipeline config: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingExample {
    pub features: FeatureRow,
    /// Aligned with [`TrainingTable::horizons`].
    pub targets: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingTable {
    pub schema: FeatureSchema,
    pub horizons: Vec<Hours>,
    pub examples: Vec<TrainingExample>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub customers: u64,
    pub events: u64,
    pub received_events: u64,
    pub feature_columns: u64,
    pub censored_by_horizon: Vec<(Hours, u64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub features: FeatureTable,
    pub targets: TargetTable,
    pub report: PipelineReport,
}

pub fn pipeline_config_from_env() -> PipelineConfig {
    let mut config = PipelineConfig::default();

    if let Ok(raw) = env::var("OFFERLINE_HORIZONS") {
        match parse_horizons(&raw) {
            Some(horizons) => config.horizons_hours = Some(horizons),
            None => warn!(
                component = "pipeline",
                event = "config.invalid",
                key = "OFFERLINE_HORIZONS",
                value = %raw
            ),
        }
    }

    if let Ok(raw) = env::var("OFFERLINE_PARALLEL") {
        match parse_bool(&raw) {
            Some(parallel) => config.parallel = parallel,
            None => warn!(
                component = "pipeline",
                event = "config.invalid",
                key = "OFFERLINE_PARALLEL",
                value = %raw
            ),
        }
    }

    config
}

/// Reference tables, schema and horizon set fixed at construction; every build
/// call is a pure function of the event log.
#[derive(Debug, Clone)]
pub struct SnapshotPipeline {
    catalog: Arc<OfferCatalog>,
    profiles: Arc<ProfileTable>,
    schema: FeatureSchema,
    horizons: Vec<Hours>,
    parallel: bool,
}

impl SnapshotPipeline {
    pub fn new(
        catalog: Arc<OfferCatalog>,
        profiles: Arc<ProfileTable>,
        cfg: &PipelineConfig,
    ) -> Result<Self, PipelineError> {
        if cfg.schema_version != FEATURE_SCHEMA_VERSION {
            return Err(PipelineError::InvalidConfig(format!(
                "schema_version must equal FEATURE_SCHEMA_VERSION ({FEATURE_SCHEMA_VERSION})"
            )));
        }
        let horizons = match &cfg.horizons_hours {
            Some(horizons) => validate_horizons(horizons)?,
            None => catalog.horizons(),
        };
        let schema = build_feature_schema(&catalog, cfg.schema_version);

        Ok(Self {
            catalog,
            profiles,
            schema,
            horizons,
            parallel: cfg.parallel,
        })
    }

    /// Loads both reference tables through the repository cache, then builds the pipeline.
    pub fn from_files(
        repository: &ReferenceRepository,
        catalog_path: &Path,
        profiles_path: &Path,
        cfg: &PipelineConfig,
    ) -> Result<Self, PipelineError> {
        let catalog = repository.load_catalog(catalog_path)?;
        let profiles = repository.load_profiles(profiles_path)?;
        Self::new(catalog, profiles, cfg)
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn horizons(&self) -> &[Hours] {
        &self.horizons
    }

    pub fn catalog(&self) -> &OfferCatalog {
        &self.catalog
    }

    pub fn profiles(&self) -> &ProfileTable {
        &self.profiles
    }

    /// Validates events and their references into a log ready for the build steps.
    pub fn event_log<I>(&self, events: I) -> Result<EventLog, PipelineError>
    where
        I: IntoIterator<Item = Event>,
    {
        let log = EventLog::from_events(events)?;
        check_references(&log, &self.catalog, &self.profiles)?;
        Ok(log)
    }

    pub fn build_features(&self, log: &EventLog) -> Result<FeatureTable, PipelineError> {
        check_references(log, &self.catalog, &self.profiles)?;

        info!(
            component = "pipeline",
            event = "pipeline.features.start",
            customers = log.customer_count(),
            events = log.len(),
            parallel = self.parallel
        );

        let per_customer = self.map_timelines(log, |timeline| {
            let profile = self.profiles.get(&timeline.customer_id).ok_or_else(|| {
                ReferenceIntegrityError::UnknownCustomer {
                    customer_id: timeline.customer_id.clone(),
                }
            })?;
            Ok(assemble_customer(timeline, &self.catalog, profile))
        })?;
        let rows: Vec<FeatureRow> = per_customer.into_iter().flatten().collect();

        info!(
            component = "pipeline",
            event = "pipeline.features.finish",
            rows = rows.len(),
            columns = self.schema.len(),
            fingerprint = %self.schema.fingerprint
        );

        Ok(FeatureTable {
            schema: self.schema.clone(),
            rows,
        })
    }

    pub fn build_targets(&self, log: &EventLog) -> Result<TargetTable, PipelineError> {
        let Some(max_timestamp) = log.max_timestamp() else {
            return Ok(TargetTable {
                horizons: self.horizons.clone(),
                rows: Vec::new(),
            });
        };

        let per_customer = self.map_timelines(log, |timeline| {
            Ok(customer_targets(
                &timeline.customer_id,
                &timeline.events,
                &self.horizons,
                max_timestamp,
            ))
        })?;
        let table = TargetTable {
            horizons: self.horizons.clone(),
            rows: per_customer.into_iter().flatten().collect(),
        };

        info!(
            component = "targets",
            event = "targets.build.finish",
            rows = table.rows.len(),
            horizons = ?table.horizons,
            censored = ?table.censored_counts(),
            max_timestamp
        );

        Ok(table)
    }

    /// `received` rows joined with the labels at the same `(customer_id, timestamp)`.
    pub fn build_training_table(&self, log: &EventLog) -> Result<TrainingTable, PipelineError> {
        let features = self.build_features(log)?;
        let targets = self.build_targets(log)?;
        Ok(join_training(features, &targets))
    }

    pub fn run<I>(&self, events: I) -> Result<PipelineOutput, PipelineError>
    where
        I: IntoIterator<Item = Event>,
    {
        let log = self.event_log(events)?;
        let features = self.build_features(&log)?;
        let targets = self.build_targets(&log)?;

        let report = PipelineReport {
            customers: log.customer_count() as u64,
            events: log.len() as u64,
            received_events: features.received_rows().count() as u64,
            feature_columns: self.schema.len() as u64,
            censored_by_horizon: targets
                .horizons
                .iter()
                .copied()
                .zip(targets.censored_counts())
                .collect(),
        };

        info!(
            component = "pipeline",
            event = "pipeline.run.finish",
            customers = report.customers,
            events = report.events,
            received_events = report.received_events
        );

        Ok(PipelineOutput {
            features,
            targets,
            report,
        })
    }

    fn map_timelines<T, F>(&self, log: &EventLog, f: F) -> Result<Vec<T>, PipelineError>
    where
        T: Send,
        F: Fn(&CustomerTimeline) -> Result<T, PipelineError> + Sync + Send,
    {
        if self.parallel {
            log.timelines().par_iter().map(&f).collect()
        } else {
            log.timelines().iter().map(&f).collect()
        }
    }
}

pub fn join_training(features: FeatureTable, targets: &TargetTable) -> TrainingTable {
    let empty = vec![None; targets.horizons.len()];
    let FeatureTable { schema, rows } = features;
    let examples = rows
        .into_iter()
        .filter(|row| row.event.kind == EventKind::OfferReceived)
        .map(|row| {
            let labels = targets
                .get(&row.event.customer_id, row.event.timestamp)
                .map(|t| t.spending_next.clone())
                .unwrap_or_else(|| empty.clone());
            TrainingExample {
                features: row,
                targets: labels,
            }
        })
        .collect();

    TrainingTable {
        schema,
        horizons: targets.horizons.clone(),
        examples,
    }
}

fn validate_horizons(horizons: &[Hours]) -> Result<Vec<Hours>, PipelineError> {
    if horizons.is_empty() {
        return Err(PipelineError::InvalidConfig(
            "horizons_hours must not be empty".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    for horizon in horizons {
        if *horizon <= 0 {
            return Err(PipelineError::InvalidConfig(
                "horizons_hours entries must be > 0".to_string(),
            ));
        }
        if !seen.insert(*horizon) {
            return Err(PipelineError::InvalidConfig(
                "horizons_hours entries must be unique".to_string(),
            ));
        }
    }
    let mut sorted = horizons.to_vec();
    sorted.sort_unstable();
    Ok(sorted)
}

fn parse_horizons(raw: &str) -> Option<Vec<Hours>> {
    let horizons = raw
        .split(',')
        .map(|part| part.trim().parse::<Hours>().ok())
        .collect::<Option<Vec<_>>>()?;
    validate_horizons(&horizons).ok()
}
