//! Typed events and reference records shared by every pipeline stage.

use serde::{Deserialize, Serialize};

/// Event timestamps are whole hours since the start of the observation period.
pub type Hours = i64;

/// Latest accepted event time. Window ends and horizon checkpoints are sums on
/// top of a timestamp and must stay representable.
pub const MAX_EVENT_HOURS: Hours = 1 << 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    OfferReceived,
    OfferViewed,
    OfferCompleted,
    Transaction,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::OfferReceived,
        EventKind::OfferViewed,
        EventKind::Transaction,
        EventKind::OfferCompleted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OfferReceived => "offer_received",
            Self::OfferViewed => "offer_viewed",
            Self::OfferCompleted => "offer_completed",
            Self::Transaction => "transaction",
        }
    }

    /// Accepts both the raw transcript spelling (`offer received`) and the snake_case one.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace(' ', "_").as_str() {
            "offer_received" | "received" => Some(Self::OfferReceived),
            "offer_viewed" | "viewed" => Some(Self::OfferViewed),
            "offer_completed" | "completed" => Some(Self::OfferCompleted),
            "transaction" => Some(Self::Transaction),
            _ => None,
        }
    }

    /// Position in per-kind state arrays.
    pub fn index(self) -> usize {
        match self {
            Self::OfferReceived => 0,
            Self::OfferViewed => 1,
            Self::Transaction => 2,
            Self::OfferCompleted => 3,
        }
    }

    pub fn carries_offer(self) -> bool {
        !matches!(self, Self::Transaction)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub customer_id: String,
    pub seq: u32,
    pub timestamp: Hours,
    pub kind: EventKind,
    pub amount: f64,
    pub reward: f64,
    pub offer_id: Option<String>,
}

impl Event {
    pub fn transaction(customer_id: &str, seq: u32, timestamp: Hours, amount: f64) -> Self {
        Self {
            customer_id: customer_id.to_string(),
            seq,
            timestamp,
            kind: EventKind::Transaction,
            amount,
            reward: 0.0,
            offer_id: None,
        }
    }

    pub fn offer(
        customer_id: &str,
        seq: u32,
        timestamp: Hours,
        kind: EventKind,
        offer_id: &str,
    ) -> Self {
        Self {
            customer_id: customer_id.to_string(),
            seq,
            timestamp,
            kind,
            amount: 0.0,
            reward: 0.0,
            offer_id: Some(offer_id.to_string()),
        }
    }

    pub fn with_reward(mut self, reward: f64) -> Self {
        self.reward = reward;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OfferType {
    Bogo,
    Discount,
    Informational,
}

impl OfferType {
    pub const ALL: [OfferType; 3] = [
        OfferType::Bogo,
        OfferType::Discount,
        OfferType::Informational,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bogo => "bogo",
            Self::Discount => "discount",
            Self::Informational => "informational",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "bogo" => Some(Self::Bogo),
            "discount" => Some(Self::Discount),
            "informational" => Some(Self::Informational),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelFlags {
    pub email: bool,
    pub mobile: bool,
    pub social: bool,
    pub web: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferDefinition {
    pub offer_id: String,
    pub code: String,
    pub offer_type: OfferType,
    pub difficulty: f64,
    pub reward: f64,
    pub duration_hours: Hours,
    pub channels: ChannelFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    Female,
    Male,
    Other,
}

impl Gender {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "F" => Some(Self::Female),
            "M" => Some(Self::Male),
            "O" => Some(Self::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerProfile {
    pub customer_id: String,
    pub age: u32,
    pub income: Option<f64>,
    /// Hours since the Unix epoch.
    pub enrollment_time: Hours,
    pub gender: Option<Gender>,
}
