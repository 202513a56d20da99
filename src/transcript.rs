//! Raw transcript normalization: JSON-lines records into validated, sequenced events.

use std::io::BufRead;

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::info;

use crate::model::{Event, EventKind, Hours, MAX_EVENT_HOURS};

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("malformed transcript line {line}: {source}")]
    Json {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{record}: unknown event kind '{value}'")]
    UnknownKind { record: String, value: String },
    #[error("{record}: missing offer_id on non-transaction event")]
    MissingOfferId { record: String },
    #[error("{record}: transaction must not carry an offer_id")]
    UnexpectedOfferId { record: String },
    #[error("{record}: field {field} has non-numeric value '{value}'")]
    InvalidNumber {
        record: String,
        field: &'static str,
        value: String,
    },
    #[error("{record}: field {field} must be >= 0, got {value}")]
    NegativeValue {
        record: String,
        field: &'static str,
        value: f64,
    },
    #[error("customer {customer_id}: duplicate seq {seq}")]
    DuplicateSeq { customer_id: String, seq: u32 },
    #[error("customer {customer_id}: expected seq {expected}, found {found}")]
    SeqGap {
        customer_id: String,
        expected: u32,
        found: u32,
    },
    #[error("customer {customer_id}: timestamp decreases at seq {seq}")]
    TimestampRegression { customer_id: String, seq: u32 },
}

/// One line of the raw transcript.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TranscriptRecord {
    pub person: String,
    pub event: String,
    pub time: Value,
    #[serde(default)]
    pub value: Map<String, Value>,
}

pub fn parse_transcript<R: BufRead>(reader: R) -> Result<Vec<TranscriptRecord>, ValidationError> {
    let mut records = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|source| ValidationError::Json {
            line: idx + 1,
            source,
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Validates every record and assigns per-customer `seq` by a stable sort on
/// `(customer, time)`, so ties keep their input order.
pub fn normalize_transcript(records: &[TranscriptRecord]) -> Result<Vec<Event>, ValidationError> {
    let mut pending = records
        .iter()
        .enumerate()
        .map(|(idx, record)| validate_record(idx, record))
        .collect::<Result<Vec<_>, _>>()?;

    pending.sort_by(|a, b| {
        a.customer_id
            .cmp(&b.customer_id)
            .then(a.timestamp.cmp(&b.timestamp))
    });

    let mut current: Option<&str> = None;
    let mut seq = 0_u32;
    let mut seqs = Vec::with_capacity(pending.len());
    for event in &pending {
        if current != Some(event.customer_id.as_str()) {
            current = Some(event.customer_id.as_str());
            seq = 0;
        }
        seq += 1;
        seqs.push(seq);
    }
    for (event, seq) in pending.iter_mut().zip(seqs) {
        event.seq = seq;
    }

    info!(
        component = "transcript",
        event = "transcript.normalized",
        records = records.len(),
        events = pending.len()
    );

    Ok(pending)
}

/// Checks the field-level invariants of an already typed event.
pub fn validate_event(event: &Event) -> Result<(), ValidationError> {
    let record = format!("event (customer {}, seq {})", event.customer_id, event.seq);
    check_event(&record, event)
}

fn check_event(record: &str, event: &Event) -> Result<(), ValidationError> {
    match (event.kind.carries_offer(), event.offer_id.is_some()) {
        (true, false) => {
            return Err(ValidationError::MissingOfferId {
                record: record.to_string(),
            })
        }
        (false, true) => {
            return Err(ValidationError::UnexpectedOfferId {
                record: record.to_string(),
            })
        }
        _ => {}
    }
    check_hours(record, "timestamp", event.timestamp)?;
    check_amount(record, "amount", event.amount)?;
    check_amount(record, "reward", event.reward)?;
    Ok(())
}

fn validate_record(idx: usize, raw: &TranscriptRecord) -> Result<Event, ValidationError> {
    let record = format!("transcript record {idx} (customer {})", raw.person);

    let kind = EventKind::parse(&raw.event).ok_or_else(|| ValidationError::UnknownKind {
        record: record.clone(),
        value: raw.event.clone(),
    })?;
    let timestamp = parse_time(&record, &raw.time)?;
    let amount = parse_number(&record, "amount", raw.value.get("amount"))?;
    let reward = parse_number(&record, "reward", raw.value.get("reward"))?;

    let offer_id = raw
        .value
        .get("offer_id")
        .or_else(|| raw.value.get("offer id"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let event = Event {
        customer_id: raw.person.clone(),
        seq: 0,
        timestamp,
        kind,
        amount,
        reward,
        offer_id,
    };
    check_event(&record, &event)?;
    Ok(event)
}

fn parse_time(record: &str, raw: &Value) -> Result<Hours, ValidationError> {
    let invalid = || ValidationError::InvalidNumber {
        record: record.to_string(),
        field: "time",
        value: raw.to_string(),
    };
    let hours = match raw {
        Value::Number(n) => match n.as_i64() {
            Some(v) => v,
            None => {
                let v = n.as_f64().ok_or_else(invalid)?;
                if v.fract() != 0.0 || v.abs() > MAX_EVENT_HOURS as f64 {
                    return Err(invalid());
                }
                v as i64
            }
        },
        Value::String(s) => s.trim().parse::<i64>().map_err(|_| invalid())?,
        _ => return Err(invalid()),
    };
    check_hours(record, "time", hours)?;
    Ok(hours)
}

fn parse_number(
    record: &str,
    field: &'static str,
    raw: Option<&Value>,
) -> Result<f64, ValidationError> {
    let invalid = |value: &Value| ValidationError::InvalidNumber {
        record: record.to_string(),
        field,
        value: value.to_string(),
    };
    let Some(raw) = raw else {
        return Ok(0.0);
    };
    let value = match raw {
        Value::Null => return Ok(0.0),
        Value::Number(n) => n.as_f64().ok_or_else(|| invalid(raw))?,
        Value::String(s) => s.trim().parse::<f64>().map_err(|_| invalid(raw))?,
        other => return Err(invalid(other)),
    };
    check_amount(record, field, value)?;
    Ok(value)
}

fn check_hours(record: &str, field: &'static str, hours: Hours) -> Result<(), ValidationError> {
    if hours < 0 {
        return Err(ValidationError::NegativeValue {
            record: record.to_string(),
            field,
            value: hours as f64,
        });
    }
    if hours > MAX_EVENT_HOURS {
        return Err(ValidationError::InvalidNumber {
            record: record.to_string(),
            field,
            value: hours.to_string(),
        });
    }
    Ok(())
}

fn check_amount(record: &str, field: &'static str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::InvalidNumber {
            record: record.to_string(),
            field,
            value: value.to_string(),
        });
    }
    if value < 0.0 {
        return Err(ValidationError::NegativeValue {
            record: record.to_string(),
            field,
            value,
        });
    }
    Ok(())
}
