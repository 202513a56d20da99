//! Static feature schema, built once from the offer catalog.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

use crate::model::{EventKind, Gender, OfferType};
use crate::reference::OfferCatalog;

pub const FEATURE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureKind {
    Count,
    Amount,
    Hours,
    Ratio,
    Flag,
    Numeric,
}

impl FeatureKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Amount => "amount",
            Self::Hours => "hours",
            Self::Ratio => "ratio",
            Self::Flag => "flag",
            Self::Numeric => "numeric",
        }
    }
}

/// Where a column's value comes from in a [`crate::FeatureRow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeatureSource {
    Seq,
    Timestamp,
    Amount,
    Reward,
    CumSpending,
    CumReward,
    TransactionsCount,
    OffersReceivedCount,
    OffersViewedCount,
    OffersCompletedCount,
    TimeSinceFirstEvent,
    AverageTransactionValue,
    OfferUsageRatio,
    TimeSinceLast(EventKind),
    /// Catalog position of the offer.
    Active(usize),
    OfferDifficulty,
    OfferReward,
    OfferDuration,
    OfferEmail,
    OfferMobile,
    OfferSocial,
    OfferWeb,
    OfferType(OfferType),
    Age,
    Income,
    EnrollmentTime,
    Gender(Gender),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureDescriptor {
    pub name: String,
    pub kind: FeatureKind,
    pub nullable: bool,
    pub source: FeatureSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    pub fingerprint: String,
    pub descriptors: Vec<FeatureDescriptor>,
}

impl FeatureSchema {
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.descriptors.iter().position(|d| d.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.descriptors.iter().map(|d| d.name.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("schema version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u32, actual: u32 },
    #[error("schema fingerprint mismatch: expected {expected}, got {actual}")]
    FingerprintMismatch { expected: String, actual: String },
}

pub fn build_feature_schema(catalog: &OfferCatalog, version: u32) -> FeatureSchema {
    use FeatureKind::*;

    let mut descriptors = Vec::new();
    let mut push = |name: &str, kind: FeatureKind, nullable: bool, source: FeatureSource| {
        descriptors.push(FeatureDescriptor {
            name: name.to_string(),
            kind,
            nullable,
            source,
        });
    };

    push("event_seq", Count, false, FeatureSource::Seq);
    push("time", Hours, false, FeatureSource::Timestamp);
    push("amount", Amount, false, FeatureSource::Amount);
    push("reward", Amount, false, FeatureSource::Reward);
    push("cum_spending", Amount, false, FeatureSource::CumSpending);
    push("cum_reward", Amount, false, FeatureSource::CumReward);
    push("transactions_count", Count, false, FeatureSource::TransactionsCount);
    push("offers_received_count", Count, false, FeatureSource::OffersReceivedCount);
    push("offers_viewed_count", Count, false, FeatureSource::OffersViewedCount);
    push("offers_completed_count", Count, false, FeatureSource::OffersCompletedCount);
    push("time_since_first_event", Hours, false, FeatureSource::TimeSinceFirstEvent);
    push("average_transaction_value", Ratio, true, FeatureSource::AverageTransactionValue);
    push("offer_usage_ratio", Ratio, true, FeatureSource::OfferUsageRatio);
    for kind in EventKind::ALL {
        let name = format!("time_since_last_{}", kind.as_str());
        push(&name, Hours, true, FeatureSource::TimeSinceLast(kind));
    }
    for (idx, offer) in catalog.offers().iter().enumerate() {
        let name = format!("active_{}", offer.code);
        push(&name, Flag, false, FeatureSource::Active(idx));
    }
    push("offer_difficulty", Amount, true, FeatureSource::OfferDifficulty);
    push("offer_reward", Amount, true, FeatureSource::OfferReward);
    push("offer_duration", Hours, true, FeatureSource::OfferDuration);
    push("offer_email", Flag, true, FeatureSource::OfferEmail);
    push("offer_mobile", Flag, true, FeatureSource::OfferMobile);
    push("offer_social", Flag, true, FeatureSource::OfferSocial);
    push("offer_web", Flag, true, FeatureSource::OfferWeb);
    for offer_type in OfferType::ALL {
        let name = format!("offer_type_{}", offer_type.as_str());
        push(&name, Flag, false, FeatureSource::OfferType(offer_type));
    }
    push("age", Numeric, false, FeatureSource::Age);
    push("income", Amount, true, FeatureSource::Income);
    push("enrollment_time", Hours, false, FeatureSource::EnrollmentTime);
    push("gender_f", Flag, false, FeatureSource::Gender(Gender::Female));
    push("gender_m", Flag, false, FeatureSource::Gender(Gender::Male));

    let fingerprint = schema_fingerprint(version, &descriptors);

    info!(
        component = "schema",
        event = "schema.built",
        version,
        column_count = descriptors.len(),
        offer_count = catalog.len(),
        fingerprint = fingerprint
    );

    FeatureSchema {
        version,
        fingerprint,
        descriptors,
    }
}

pub fn assert_schema_compatible(
    expected_version: u32,
    expected_fingerprint: &str,
    actual: &FeatureSchema,
) -> Result<(), SchemaError> {
    if expected_version != actual.version {
        return Err(SchemaError::VersionMismatch {
            expected: expected_version,
            actual: actual.version,
        });
    }

    if expected_fingerprint != actual.fingerprint {
        return Err(SchemaError::FingerprintMismatch {
            expected: expected_fingerprint.to_string(),
            actual: actual.fingerprint.clone(),
        });
    }

    Ok(())
}

fn schema_fingerprint(version: u32, descriptors: &[FeatureDescriptor]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("version:{version};"));
    hasher.update("columns:");
    for descriptor in descriptors {
        hasher.update(descriptor.name.as_bytes());
        hasher.update(format!(
            ":{}:{};",
            descriptor.kind.as_str(),
            if descriptor.nullable { "null" } else { "nonnull" }
        ));
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChannelFlags, OfferDefinition};

    fn offer(id: &str, code: &str, offer_type: OfferType, duration_hours: i64) -> OfferDefinition {
        OfferDefinition {
            offer_id: id.to_string(),
            code: code.to_string(),
            offer_type,
            difficulty: 5.0,
            reward: 2.0,
            duration_hours,
            channels: ChannelFlags::default(),
        }
    }

    fn catalog(codes: &[&str]) -> OfferCatalog {
        OfferCatalog::new(
            codes
                .iter()
                .enumerate()
                .map(|(i, code)| offer(&format!("id{i}"), code, OfferType::Discount, 72))
                .collect(),
        )
        .expect("valid catalog")
    }

    #[test]
    fn schema_order_and_fingerprint_are_deterministic() {
        let cat = catalog(&["A", "B"]);
        let a = build_feature_schema(&cat, FEATURE_SCHEMA_VERSION);
        let b = build_feature_schema(&cat, FEATURE_SCHEMA_VERSION);
        assert_eq!(a, b);

        assert_eq!(a.descriptors[0].name, "event_seq");
        assert_eq!(
            a.position("time_since_last_offer_received"),
            Some(13)
        );
        let active_a = a.position("active_A").expect("active_A column");
        assert_eq!(a.descriptors[active_a].source, FeatureSource::Active(0));
        assert_eq!(a.position("active_B"), Some(active_a + 1));
        assert_eq!(a.names().last(), Some("gender_m"));
        assert_eq!(a.len(), 13 + 4 + 2 + 7 + 3 + 5);
    }

    #[test]
    fn nullable_columns_are_exactly_the_undefined_ones() {
        let schema = build_feature_schema(&catalog(&["A"]), FEATURE_SCHEMA_VERSION);
        let nullable: Vec<&str> = schema
            .descriptors
            .iter()
            .filter(|d| d.nullable)
            .map(|d| d.name.as_str())
            .collect();
        assert!(nullable.contains(&"average_transaction_value"));
        assert!(nullable.contains(&"offer_usage_ratio"));
        assert!(nullable.contains(&"time_since_last_transaction"));
        assert!(nullable.contains(&"offer_difficulty"));
        assert!(!nullable.contains(&"cum_spending"));
        assert!(!nullable.contains(&"active_A"));
    }

    #[test]
    fn fingerprint_tracks_catalog_codes() {
        let a = build_feature_schema(&catalog(&["A"]), FEATURE_SCHEMA_VERSION);
        let b = build_feature_schema(&catalog(&["B"]), FEATURE_SCHEMA_VERSION);
        assert_ne!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn compatibility_check_matches_version_and_fingerprint() {
        let schema = build_feature_schema(&catalog(&["A"]), FEATURE_SCHEMA_VERSION);
        assert_schema_compatible(FEATURE_SCHEMA_VERSION, &schema.fingerprint, &schema)
            .expect("compatibility should pass");

        let err = assert_schema_compatible(FEATURE_SCHEMA_VERSION + 1, &schema.fingerprint, &schema)
            .expect_err("version mismatch expected");
        assert!(matches!(err, SchemaError::VersionMismatch { .. }));

        let err = assert_schema_compatible(FEATURE_SCHEMA_VERSION, "not-real", &schema)
            .expect_err("fingerprint mismatch expected");
        assert!(matches!(err, SchemaError::FingerprintMismatch { .. }));
    }
}
