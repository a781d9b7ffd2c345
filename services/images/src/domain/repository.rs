use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::types::{Image, NewOutboxEvent, OutboxEvent, OutboxStats};
use crate::error::{DeliveryError, ImagesServiceError};

/// Parameters of one claim transaction.
#[derive(Debug, Clone, Copy)]
pub struct ClaimRequest {
    pub limit: u64,
    /// Claim instant on this instance's clock. The Postgres store judges due
    /// rows and lease expiry by the database clock instead.
    pub now: DateTime<Utc>,
    /// `PROCESSING` rows claimed at least this long ago are re-claimable.
    pub lease: Duration,
    /// Written to every claimed row; later updates must present it.
    pub claim_token: Uuid,
}

/// Durable outbox table.
///
/// Every `mark_*` call applies only while the row is still `PROCESSING` under
/// `claim_token` and returns `false` when it is not (the claim was lost).
pub trait OutboxStore: Send + Sync {
    /// Lock-skip select of due rows ordered by `created_at`, flipped to
    /// `PROCESSING` in the same transaction. Taking over an expired claim
    /// increments `attempts`.
    fn claim_due_batch(
        &self,
        request: ClaimRequest,
    ) -> impl Future<Output = Result<Vec<OutboxEvent>, ImagesServiceError>> + Send;

    /// `PROCESSING → SENT`; sets `published_at`, clears `last_error`.
    fn mark_sent(
        &self,
        id: Uuid,
        claim_token: Uuid,
        published_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<bool, ImagesServiceError>> + Send;

    /// `PROCESSING → PENDING` with the new attempt count and retry time.
    fn mark_retry(
        &self,
        id: Uuid,
        claim_token: Uuid,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
        last_error: &str,
    ) -> impl Future<Output = Result<bool, ImagesServiceError>> + Send;

    /// `PROCESSING → FAILED`.
    fn mark_failed(
        &self,
        id: Uuid,
        claim_token: Uuid,
        attempts: u32,
        last_error: &str,
    ) -> impl Future<Output = Result<bool, ImagesServiceError>> + Send;

    fn status_counts(&self) -> impl Future<Output = Result<OutboxStats, ImagesServiceError>> + Send;
}

/// Message broker client. One instance per process, reused across cycles.
pub trait EventPublisher: Send + Sync {
    /// Deliver one event; `Ok` only after the broker acknowledged it.
    fn send(&self, event: &OutboxEvent) -> impl Future<Output = Result<(), DeliveryError>> + Send;

    /// Flush and release the connection. Called once, on shutdown.
    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// Repository for image metadata.
pub trait ImageRepository: Send + Sync {
    /// Insert an image row and its outbox event atomically (same transaction).
    fn create_with_outbox(
        &self,
        image: &Image,
        event: &NewOutboxEvent,
    ) -> impl Future<Output = Result<(), ImagesServiceError>> + Send;
}
