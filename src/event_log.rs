//! Validated event log partitioned into per-customer timelines ordered by `seq`.

use std::collections::BTreeMap;

use crate::model::{Event, Hours};
use crate::transcript::{validate_event, ValidationError};

#[derive(Debug, Clone, PartialEq)]
pub struct CustomerTimeline {
    pub customer_id: String,
    /// Ordered by `seq`, which starts at 1 and has no gaps.
    pub events: Vec<Event>,
}

impl CustomerTimeline {
    pub fn last_timestamp(&self) -> Option<Hours> {
        self.events.last().map(|e| e.timestamp)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventLog {
    timelines: Vec<CustomerTimeline>,
    event_count: usize,
    max_timestamp: Option<Hours>,
}

impl EventLog {
    /// Builds the log from events in any order. Timelines come out sorted by
    /// customer id, events by `seq`, so the result does not depend on input order.
    pub fn from_events<I>(events: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = Event>,
    {
        let mut grouped: BTreeMap<String, Vec<Event>> = BTreeMap::new();
        let mut event_count = 0;
        let mut max_timestamp: Option<Hours> = None;

        for event in events {
            validate_event(&event)?;
            event_count += 1;
            max_timestamp = Some(max_timestamp.map_or(event.timestamp, |m| m.max(event.timestamp)));
            grouped
                .entry(event.customer_id.clone())
                .or_default()
                .push(event);
        }

        let mut timelines = Vec::with_capacity(grouped.len());
        for (customer_id, mut events) in grouped {
            events.sort_by_key(|e| e.seq);
            check_sequence(&customer_id, &events)?;
            timelines.push(CustomerTimeline {
                customer_id,
                events,
            });
        }

        Ok(Self {
            timelines,
            event_count,
            max_timestamp,
        })
    }

    pub fn timelines(&self) -> &[CustomerTimeline] {
        &self.timelines
    }

    pub fn timeline(&self, customer_id: &str) -> Option<&CustomerTimeline> {
        self.timelines
            .binary_search_by(|t| t.customer_id.as_str().cmp(customer_id))
            .ok()
            .map(|idx| &self.timelines[idx])
    }

    /// Every event, customer by customer, each timeline in `seq` order.
    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.timelines.iter().flat_map(|t| t.events.iter())
    }

    /// Latest timestamp anywhere in the dataset; the censoring bound for targets.
    pub fn max_timestamp(&self) -> Option<Hours> {
        self.max_timestamp
    }

    pub fn len(&self) -> usize {
        self.event_count
    }

    pub fn is_empty(&self) -> bool {
        self.event_count == 0
    }

    pub fn customer_count(&self) -> usize {
        self.timelines.len()
    }
}

fn check_sequence(customer_id: &str, events: &[Event]) -> Result<(), ValidationError> {
    let mut prev_ts: Option<Hours> = None;
    for (idx, event) in events.iter().enumerate() {
        let expected = idx as u32 + 1;
        if event.seq != expected {
            if idx > 0 && event.seq == events[idx - 1].seq {
                return Err(ValidationError::DuplicateSeq {
                    customer_id: customer_id.to_string(),
                    seq: event.seq,
                });
            }
            return Err(ValidationError::SeqGap {
                customer_id: customer_id.to_string(),
                expected,
                found: event.seq,
            });
        }
        if prev_ts.is_some_and(|prev| event.timestamp < prev) {
            return Err(ValidationError::TimestampRegression {
                customer_id: customer_id.to_string(),
                seq: event.seq,
            });
        }
        prev_ts = Some(event.timestamp);
    }
    Ok(())
}
