use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery state of an outbox event.
///
/// `PENDING → PROCESSING → {SENT | PENDING | FAILED}`. `SENT` and `FAILED` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Sent,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Sent => "SENT",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PROCESSING" => Ok(Self::Processing),
            "SENT" => Ok(Self::Sent),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown outbox status: {other}")),
        }
    }
}

/// Event as written by a producer, inside the producer's own transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOutboxEvent {
    pub id: Uuid,
    pub topic: String,
    /// Broker partition key. `None` sends unkeyed.
    pub key: Option<String>,
    pub event_type: String,
    pub event_version: i32,
    pub payload: serde_json::Value,
}

/// Persisted outbox row.
#[derive(Debug, Clone)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub topic: String,
    pub key: Option<String>,
    pub event_type: String,
    pub event_version: i32,
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub claim_token: Option<Uuid>,
}

impl OutboxEvent {
    /// Fresh `PENDING` row for `event`, due immediately.
    pub fn pending(event: NewOutboxEvent, now: DateTime<Utc>) -> Self {
        Self {
            id: event.id,
            topic: event.topic,
            key: event.key,
            event_type: event.event_type,
            event_version: event.event_version,
            payload: event.payload,
            status: OutboxStatus::Pending,
            attempts: 0,
            next_attempt_at: now,
            created_at: now,
            published_at: None,
            last_error: None,
            claimed_at: None,
            claim_token: None,
        }
    }
}

/// Row counts per status, for operational inspection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutboxStats {
    pub pending: u64,
    pub processing: u64,
    pub sent: u64,
    pub failed: u64,
}

impl OutboxStats {
    pub fn add(&mut self, status: OutboxStatus, count: u64) {
        match status {
            OutboxStatus::Pending => self.pending += count,
            OutboxStatus::Processing => self.processing += count,
            OutboxStatus::Sent => self.sent += count,
            OutboxStatus::Failed => self.failed += count,
        }
    }
}

/// Metadata of an uploaded image.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    #[serde(skip)]
    pub id: Uuid,
    pub external_id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub image_type: String,
    pub original_name: String,
    pub mime_type: String,
    pub extension: String,
    pub size: i64,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub storage: String,
    pub path: String,
    pub checksum: String,
    #[serde(serialize_with = "imagehub_core::serde::to_rfc3339_ms")]
    pub created_at: DateTime<Utc>,
}

/// Maximum characters kept in `last_error`.
pub const LAST_ERROR_MAX_CHARS: usize = 1000;

/// Event type emitted when an image row is recorded.
pub const IMAGE_UPLOADED_EVENT: &str = "image.uploaded";

/// Payload shape version of [`IMAGE_UPLOADED_EVENT`].
pub const IMAGE_UPLOADED_VERSION: i32 = 1;

/// Cut an error message to [`LAST_ERROR_MAX_CHARS`] characters.
pub fn truncate_error(message: &str) -> String {
    match message.char_indices().nth(LAST_ERROR_MAX_CHARS) {
        Some((end, _)) => message[..end].to_owned(),
        None => message.to_owned(),
    }
}
