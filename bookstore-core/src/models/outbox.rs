use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OutboxStatus {
    Pending,
    InFlight,
    Published,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "Pending",
            OutboxStatus::InFlight => "InFlight",
            OutboxStatus::Published => "Published",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Pending" => Some(OutboxStatus::Pending),
            "InFlight" => Some(OutboxStatus::InFlight),
            "Published" => Some(OutboxStatus::Published),
            _ => None,
        }
    }
}

/// An event waiting to be handed to the broker.
///
/// Written in the same transaction as the row it announces, so a committed
/// order always has a pending message even if the process dies before
/// publishing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxMessage {
    pub id: i64,
    pub queue: String,
    pub payload: String,
    pub status: OutboxStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxMessage {
    /// Whether a claim on this message has lapsed and it may be taken again.
    pub fn claimable(&self, now: DateTime<Utc>, lease: chrono::Duration) -> bool {
        match self.status {
            OutboxStatus::Pending => true,
            OutboxStatus::InFlight => self.claimed_at.map_or(true, |at| at + lease <= now),
            OutboxStatus::Published => false,
        }
    }
}
