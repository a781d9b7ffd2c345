use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::repository::{ClaimRequest, OutboxStore};
use crate::domain::types::OutboxEvent;
use crate::error::ImagesServiceError;

/// Rows claimed by one cycle, all tagged with `token`.
#[derive(Debug)]
pub struct Claim {
    pub token: Uuid,
    pub events: Vec<OutboxEvent>,
}

/// Claims up to `batch_size` due events for exclusive delivery.
///
/// Due means `PENDING` with `next_attempt_at <= now`, or `PROCESSING` with a
/// claim older than `lease` (left behind by a publisher that died mid-cycle).
/// A takeover counts as an attempt, so an event that keeps killing its
/// publisher still ends up `FAILED`.
pub struct ClaimUseCase<'a, S: OutboxStore> {
    pub store: &'a S,
    pub batch_size: u64,
    pub lease: Duration,
}

impl<S: OutboxStore> ClaimUseCase<'_, S> {
    pub async fn execute(&self, now: DateTime<Utc>) -> Result<Claim, ImagesServiceError> {
        let token = Uuid::new_v4();
        let events = self
            .store
            .claim_due_batch(ClaimRequest {
                limit: self.batch_size,
                now,
                lease: self.lease,
                claim_token: token,
            })
            .await?;
        Ok(Claim { token, events })
    }
}
