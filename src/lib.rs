//! Offerline core crate.
//!
//! Turns a per-customer stream of offer lifecycle events and transactions into
//! one leakage-free feature row per event, plus forward spending labels over
//! fixed horizons for every offer reception:
//! - expanding aggregates, recency and offer activation per customer
//! - target horizons with censoring at the edge of the observed data
//! - training-table assembly, CSV export and what-if rows for inference

mod activation;
mod aggregate;
mod assemble;
mod event_log;
mod export;
mod inference;
mod model;
mod observability;
mod pipeline;
mod recency;
mod reference;
mod schema;
mod targets;
mod transcript;

pub use activation::{activation_flags, ActivationIndex, ActivationSweep, ActiveWindow};
pub use aggregate::{expanding_aggregates, ExpandingAggregator, ExpandingSnapshot};
pub use assemble::{assemble_customer, FeatureRow, FeatureTable};
pub use event_log::{CustomerTimeline, EventLog};
pub use export::{
    write_feature_table, write_training_table, write_training_table_file, ExportError,
};
pub use inference::{
    what_if_rows, HorizonPrediction, InferenceError, OfferForecast, SpendingModel,
    SpendingPredictor, WhatIfRow,
};
pub use model::{
    ChannelFlags, CustomerProfile, Event, EventKind, Gender, Hours, OfferDefinition, OfferType,
    MAX_EVENT_HOURS,
};
pub use observability::{
    init_logging, log_inputs_loaded, log_output_written, log_run_failed, log_run_start,
    logging_config_from_env, LogFormat, LoggingConfig, LoggingInitError,
};
pub use pipeline::{
    join_training, pipeline_config_from_env, PipelineConfig, PipelineError, PipelineOutput,
    PipelineReport, SnapshotPipeline, TrainingExample, TrainingTable,
};
pub use recency::{recency_features, RecencySnapshot, RecencyTracker};
pub use reference::{
    check_references, OfferCatalog, ProfileTable, ReferenceIntegrityError, ReferenceLoadError,
    ReferenceRepository,
};
pub use schema::{
    assert_schema_compatible, build_feature_schema, FeatureDescriptor, FeatureKind,
    FeatureSchema, FeatureSource, SchemaError, FEATURE_SCHEMA_VERSION,
};
pub use targets::{customer_targets, target_column, TargetRow, TargetTable};
pub use transcript::{
    normalize_transcript, parse_transcript, validate_event, TranscriptRecord, ValidationError,
};
