//! Offer catalog and customer profile tables, plus the repository that loads them once per run.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::BufRead;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

use crate::event_log::EventLog;
use crate::model::{ChannelFlags, CustomerProfile, Gender, Hours, OfferDefinition, OfferType};

const HOURS_PER_DAY: f64 = 24.0;

#[derive(Debug, Error)]
pub enum ReferenceLoadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed {table} line {line}: {source}")]
    Json {
        table: &'static str,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("{table} line {line}: invalid {field} value '{value}'")]
    ParseField {
        table: &'static str,
        line: usize,
        field: &'static str,
        value: String,
    },
    #[error("duplicate offer id {0}")]
    DuplicateOfferId(String),
    #[error("duplicate offer code {0}")]
    DuplicateOfferCode(String),
    #[error("duplicate customer id {0}")]
    DuplicateCustomer(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReferenceIntegrityError {
    #[error("customer {customer_id} seq {seq}: offer {offer_id} is not in the catalog")]
    UnknownOffer {
        customer_id: String,
        seq: u32,
        offer_id: String,
    },
    #[error("customer {customer_id} has no profile")]
    UnknownCustomer { customer_id: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OfferCatalog {
    offers: Vec<OfferDefinition>,
    by_id: HashMap<String, usize>,
}

impl OfferCatalog {
    /// Orders offers by `(type, difficulty, reward, duration)`; that order is the
    /// order of the activation columns.
    pub fn new(mut offers: Vec<OfferDefinition>) -> Result<Self, ReferenceLoadError> {
        offers.sort_by(|a, b| {
            a.offer_type
                .cmp(&b.offer_type)
                .then(a.difficulty.total_cmp(&b.difficulty))
                .then(a.reward.total_cmp(&b.reward))
                .then(a.duration_hours.cmp(&b.duration_hours))
                .then(a.code.cmp(&b.code))
        });

        let mut by_id = HashMap::with_capacity(offers.len());
        let mut codes = BTreeSet::new();
        for (idx, offer) in offers.iter().enumerate() {
            if by_id.insert(offer.offer_id.clone(), idx).is_some() {
                return Err(ReferenceLoadError::DuplicateOfferId(offer.offer_id.clone()));
            }
            if !codes.insert(offer.code.as_str()) {
                return Err(ReferenceLoadError::DuplicateOfferCode(offer.code.clone()));
            }
        }

        Ok(Self { offers, by_id })
    }

    pub fn from_json_lines<R: BufRead>(reader: R) -> Result<Self, ReferenceLoadError> {
        let mut offers = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let raw: RawOffer =
                serde_json::from_str(&line).map_err(|source| ReferenceLoadError::Json {
                    table: "portfolio",
                    line: idx + 1,
                    source,
                })?;
            offers.push(raw.into_definition(idx + 1)?);
        }
        Self::new(offers)
    }

    pub fn offers(&self) -> &[OfferDefinition] {
        &self.offers
    }

    pub fn get(&self, offer_id: &str) -> Option<&OfferDefinition> {
        self.position(offer_id).map(|idx| &self.offers[idx])
    }

    /// Index of the offer in catalog order.
    pub fn position(&self, offer_id: &str) -> Option<usize> {
        self.by_id.get(offer_id).copied()
    }

    pub fn len(&self) -> usize {
        self.offers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offers.is_empty()
    }

    /// Distinct positive offer durations, ascending. These are the target horizons.
    pub fn horizons(&self) -> Vec<Hours> {
        self.offers
            .iter()
            .map(|o| o.duration_hours)
            .filter(|d| *d > 0)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileTable {
    by_id: HashMap<String, CustomerProfile>,
}

impl ProfileTable {
    pub fn new(profiles: Vec<CustomerProfile>) -> Result<Self, ReferenceLoadError> {
        let mut by_id = HashMap::with_capacity(profiles.len());
        for profile in profiles {
            let id = profile.customer_id.clone();
            if by_id.insert(id.clone(), profile).is_some() {
                return Err(ReferenceLoadError::DuplicateCustomer(id));
            }
        }
        Ok(Self { by_id })
    }

    pub fn from_json_lines<R: BufRead>(reader: R) -> Result<Self, ReferenceLoadError> {
        let mut profiles = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let raw: RawProfile =
                serde_json::from_str(&line).map_err(|source| ReferenceLoadError::Json {
                    table: "profile",
                    line: idx + 1,
                    source,
                })?;
            profiles.push(raw.into_profile(idx + 1)?);
        }
        Self::new(profiles)
    }

    pub fn get(&self, customer_id: &str) -> Option<&CustomerProfile> {
        self.by_id.get(customer_id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Loads reference tables once per run, memoized by the SHA-256 of their source bytes.
/// Entries are never invalidated; drop the repository to release them.
#[derive(Debug, Default)]
pub struct ReferenceRepository {
    catalogs: Mutex<HashMap<String, Arc<OfferCatalog>>>,
    profiles: Mutex<HashMap<String, Arc<ProfileTable>>>,
}

impl ReferenceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn catalog_from_bytes(
        &self,
        bytes: &[u8],
    ) -> Result<Arc<OfferCatalog>, ReferenceLoadError> {
        memoized(&self.catalogs, "portfolio", bytes, || {
            OfferCatalog::from_json_lines(bytes)
        })
    }

    pub fn profiles_from_bytes(
        &self,
        bytes: &[u8],
    ) -> Result<Arc<ProfileTable>, ReferenceLoadError> {
        memoized(&self.profiles, "profile", bytes, || {
            ProfileTable::from_json_lines(bytes)
        })
    }

    pub fn load_catalog(&self, path: &Path) -> Result<Arc<OfferCatalog>, ReferenceLoadError> {
        let bytes = fs::read(path)?;
        self.catalog_from_bytes(&bytes)
    }

    pub fn load_profiles(&self, path: &Path) -> Result<Arc<ProfileTable>, ReferenceLoadError> {
        let bytes = fs::read(path)?;
        self.profiles_from_bytes(&bytes)
    }

    pub fn cached_entries(&self) -> usize {
        let catalogs = self
            .catalogs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        let profiles = self
            .profiles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        catalogs + profiles
    }
}

/// Fails on the first event whose offer or customer is missing from the reference tables.
pub fn check_references(
    log: &EventLog,
    catalog: &OfferCatalog,
    profiles: &ProfileTable,
) -> Result<(), ReferenceIntegrityError> {
    for timeline in log.timelines() {
        if profiles.get(&timeline.customer_id).is_none() {
            return Err(ReferenceIntegrityError::UnknownCustomer {
                customer_id: timeline.customer_id.clone(),
            });
        }
        for event in &timeline.events {
            if let Some(offer_id) = &event.offer_id {
                if catalog.get(offer_id).is_none() {
                    return Err(ReferenceIntegrityError::UnknownOffer {
                        customer_id: event.customer_id.clone(),
                        seq: event.seq,
                        offer_id: offer_id.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

fn memoized<T>(
    cache: &Mutex<HashMap<String, Arc<T>>>,
    table: &'static str,
    bytes: &[u8],
    load: impl FnOnce() -> Result<T, ReferenceLoadError>,
) -> Result<Arc<T>, ReferenceLoadError> {
    let key = hex::encode(Sha256::digest(bytes));
    if let Some(hit) = cache
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&key)
    {
        debug!(component = "reference", event = "reference.cache.hit", table, key = %key);
        return Ok(Arc::clone(hit));
    }

    let loaded = Arc::new(load()?);
    info!(
        component = "reference",
        event = "reference.cache.miss",
        table,
        key = %key,
        bytes = bytes.len()
    );
    cache
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(key, Arc::clone(&loaded));
    Ok(loaded)
}

#[derive(Debug, Deserialize)]
struct RawOffer {
    id: String,
    offer_type: String,
    difficulty: f64,
    reward: f64,
    /// Days.
    duration: f64,
    #[serde(default)]
    channels: Vec<String>,
}

impl RawOffer {
    fn into_definition(self, line: usize) -> Result<OfferDefinition, ReferenceLoadError> {
        let offer_type =
            OfferType::parse(&self.offer_type).ok_or_else(|| ReferenceLoadError::ParseField {
                table: "portfolio",
                line,
                field: "offer_type",
                value: self.offer_type.clone(),
            })?;
        if !self.duration.is_finite() || self.duration < 0.0 {
            return Err(ReferenceLoadError::ParseField {
                table: "portfolio",
                line,
                field: "duration",
                value: self.duration.to_string(),
            });
        }

        let mut channels = ChannelFlags::default();
        for channel in &self.channels {
            match channel.trim().to_ascii_lowercase().as_str() {
                "email" => channels.email = true,
                "mobile" => channels.mobile = true,
                "social" => channels.social = true,
                "web" => channels.web = true,
                _ => {
                    return Err(ReferenceLoadError::ParseField {
                        table: "portfolio",
                        line,
                        field: "channels",
                        value: channel.clone(),
                    })
                }
            }
        }

        let code = format!(
            "{}.{}.{}.{}",
            &offer_type.as_str()[..1],
            display_number(self.difficulty),
            display_number(self.reward),
            display_number(self.duration)
        );

        Ok(OfferDefinition {
            offer_id: self.id,
            code,
            offer_type,
            difficulty: self.difficulty,
            reward: self.reward,
            duration_hours: (self.duration * HOURS_PER_DAY).round() as Hours,
            channels,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawProfile {
    id: String,
    age: u32,
    #[serde(default)]
    income: Option<f64>,
    became_member_on: Value,
    #[serde(default)]
    gender: Option<String>,
}

impl RawProfile {
    fn into_profile(self, line: usize) -> Result<CustomerProfile, ReferenceLoadError> {
        let raw_date = match &self.became_member_on {
            Value::String(s) => s.trim().to_string(),
            other => other.to_string(),
        };
        let enrollment_time = NaiveDate::parse_from_str(&raw_date, "%Y%m%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc().timestamp() / 3_600)
            .ok_or_else(|| ReferenceLoadError::ParseField {
                table: "profile",
                line,
                field: "became_member_on",
                value: raw_date.clone(),
            })?;

        Ok(CustomerProfile {
            customer_id: self.id,
            age: self.age,
            income: self.income,
            enrollment_time,
            gender: self.gender.as_deref().and_then(Gender::parse),
        })
    }
}

fn display_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Event, EventKind};

    const PORTFOLIO: &str = r#"{"reward":5,"channels":["web","email"],"difficulty":20,"duration":10,"offer_type":"discount","id":"d1"}
{"reward":10,"channels":["email","mobile","social"],"difficulty":10,"duration":7,"offer_type":"bogo","id":"b1"}
{"reward":0,"channels":["email","mobile"],"difficulty":0,"duration":3,"offer_type":"informational","id":"i1"}
{"reward":5,"channels":["web"],"difficulty":5,"duration":7,"offer_type":"bogo","id":"b2"}
"#;

    const PROFILES: &str = r#"{"gender":"F","age":55,"id":"c1","became_member_on":20170715,"income":112000.0}
{"gender":null,"age":118,"id":"c2","became_member_on":"20170212","income":null}
"#;

    #[test]
    fn portfolio_lines_become_ordered_catalog_with_codes() {
        let catalog = OfferCatalog::from_json_lines(PORTFOLIO.as_bytes()).expect("valid portfolio");
        let codes: Vec<&str> = catalog.offers().iter().map(|o| o.code.as_str()).collect();
        assert_eq!(codes, vec!["b.5.5.7", "b.10.10.7", "d.20.5.10", "i.0.0.3"]);

        let d1 = catalog.get("d1").expect("d1 present");
        assert_eq!(d1.duration_hours, 240);
        assert!(d1.channels.web && d1.channels.email);
        assert!(!d1.channels.mobile);
        assert_eq!(catalog.position("d1"), Some(2));
        assert_eq!(catalog.horizons(), vec![72, 168, 240]);
    }

    #[test]
    fn duplicate_offer_ids_are_rejected() {
        let doubled = format!("{PORTFOLIO}{}", PORTFOLIO.lines().next().expect("first line"));
        let err = OfferCatalog::from_json_lines(doubled.as_bytes()).expect_err("duplicate rejected");
        assert!(matches!(err, ReferenceLoadError::DuplicateOfferId(id) if id == "d1"));
    }

    #[test]
    fn profiles_parse_dates_and_nullable_fields() {
        let profiles = ProfileTable::from_json_lines(PROFILES.as_bytes()).expect("valid profiles");
        assert_eq!(profiles.len(), 2);

        let c1 = profiles.get("c1").expect("c1 present");
        assert_eq!(c1.gender, Some(Gender::Female));
        assert_eq!(c1.income, Some(112_000.0));
        let expected = NaiveDate::from_ymd_opt(2017, 7, 15)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc().timestamp() / 3_600)
            .expect("valid date");
        assert_eq!(c1.enrollment_time, expected);

        let c2 = profiles.get("c2").expect("c2 present");
        assert_eq!(c2.gender, None);
        assert_eq!(c2.income, None);
    }

    #[test]
    fn bad_member_date_names_the_line() {
        let raw = r#"{"gender":"M","age":30,"id":"c3","became_member_on":"2017-13-40","income":1.0}"#;
        match ProfileTable::from_json_lines(raw.as_bytes()).expect_err("bad date rejected") {
            ReferenceLoadError::ParseField { line, field, .. } => {
                assert_eq!(line, 1);
                assert_eq!(field, "became_member_on");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn repository_memoizes_by_content() {
        let repo = ReferenceRepository::new();
        let first = repo
            .catalog_from_bytes(PORTFOLIO.as_bytes())
            .expect("first load");
        let second = repo
            .catalog_from_bytes(PORTFOLIO.as_bytes())
            .expect("second load");
        assert!(Arc::ptr_eq(&first, &second));

        let profiles = repo
            .profiles_from_bytes(PROFILES.as_bytes())
            .expect("profiles load");
        assert_eq!(profiles.len(), 2);
        assert_eq!(repo.cached_entries(), 2);
    }

    #[test]
    fn integrity_check_reports_unknown_offer_and_customer() {
        let catalog = OfferCatalog::from_json_lines(PORTFOLIO.as_bytes()).expect("catalog");
        let profiles = ProfileTable::from_json_lines(PROFILES.as_bytes()).expect("profiles");

        let log = EventLog::from_events(vec![
            Event::offer("c1", 1, 0, EventKind::OfferReceived, "b1"),
            Event::offer("c1", 2, 1, EventKind::OfferViewed, "zz"),
        ])
        .expect("valid log");
        assert_eq!(
            check_references(&log, &catalog, &profiles),
            Err(ReferenceIntegrityError::UnknownOffer {
                customer_id: "c1".to_string(),
                seq: 2,
                offer_id: "zz".to_string(),
            })
        );

        let log = EventLog::from_events(vec![Event::transaction("ghost", 1, 0, 1.0)])
            .expect("valid log");
        assert!(matches!(
            check_references(&log, &catalog, &profiles),
            Err(ReferenceIntegrityError::UnknownCustomer { .. })
        ));
    }
}
