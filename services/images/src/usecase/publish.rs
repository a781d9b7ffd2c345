use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::backoff::{BackoffPolicy, RetryDecision};
use crate::domain::repository::{EventPublisher, OutboxStore};
use crate::domain::types::{OutboxEvent, truncate_error};
use crate::error::{DeliveryError, ImagesServiceError};
use crate::usecase::claim::ClaimUseCase;

/// Tunables of one publish cycle.
#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub batch_size: u64,
    /// Age after which a `PROCESSING` claim is considered abandoned.
    pub lease: Duration,
    /// Per-event bound on a single delivery attempt.
    pub send_timeout: Duration,
    /// Events delivered at once. `1` keeps `created_at` order.
    pub concurrency: usize,
    pub backoff: BackoffPolicy,
}

/// What happened to one claimed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Sent,
    Retried,
    Failed,
    /// Claim expired and was taken over before the result was written.
    Lost,
    /// Result could not be persisted; the lease will hand the row out again.
    Unrecorded,
}

/// Per-cycle counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub claimed: usize,
    pub sent: usize,
    pub retried: usize,
    pub failed: usize,
    pub lost: usize,
    pub unrecorded: usize,
    /// The claim transaction itself failed; nothing was delivered.
    pub claim_failed: bool,
}

impl CycleReport {
    fn record(mut self, outcome: EventOutcome) -> Self {
        match outcome {
            EventOutcome::Sent => self.sent += 1,
            EventOutcome::Retried => self.retried += 1,
            EventOutcome::Failed => self.failed += 1,
            EventOutcome::Lost => self.lost += 1,
            EventOutcome::Unrecorded => self.unrecorded += 1,
        }
        self
    }
}

/// Claim → deliver → record, for one batch. Single-flight per instance.
pub struct PublishCycle<S, P> {
    store: S,
    publisher: P,
    settings: CycleSettings,
    running: AtomicBool,
}

/// Clears the running flag when the cycle ends, including by panic.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<S, P> PublishCycle<S, P>
where
    S: OutboxStore,
    P: EventPublisher,
{
    pub fn new(store: S, publisher: P, settings: CycleSettings) -> Self {
        Self {
            store,
            publisher,
            settings,
            running: AtomicBool::new(false),
        }
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run one cycle unless one is already in progress, in which case this is
    /// a no-op returning `None`.
    pub async fn trigger(&self) -> Option<CycleReport> {
        if self.running.swap(true, Ordering::AcqRel) {
            debug!("previous outbox cycle still running, skipping trigger");
            return None;
        }
        let _guard = RunningGuard(&self.running);
        Some(self.run().await)
    }

    async fn run(&self) -> CycleReport {
        let claim = ClaimUseCase {
            store: &self.store,
            batch_size: self.settings.batch_size,
            lease: self.settings.lease,
        }
        .execute(Utc::now())
        .await;

        let claim = match claim {
            Ok(claim) => claim,
            Err(e) => {
                error!(error = ?e, "outbox publish cycle failed: could not claim events");
                return CycleReport {
                    claim_failed: true,
                    ..CycleReport::default()
                };
            }
        };
        if claim.events.is_empty() {
            return CycleReport::default();
        }

        let token = claim.token;
        let mut report = CycleReport {
            claimed: claim.events.len(),
            ..CycleReport::default()
        };

        // Keep at most `concurrency` deliveries in flight; with 1 this walks
        // the batch in claim order.
        let mut queued = claim.events.into_iter();
        let mut in_flight = FuturesUnordered::new();
        for event in queued.by_ref().take(self.settings.concurrency.max(1)) {
            in_flight.push(self.process(event, token));
        }
        while let Some(outcome) = in_flight.next().await {
            report = report.record(outcome);
            if let Some(event) = queued.next() {
                in_flight.push(self.process(event, token));
            }
        }

        info!(
            claimed = report.claimed,
            sent = report.sent,
            retried = report.retried,
            failed = report.failed,
            lost = report.lost,
            unrecorded = report.unrecorded,
            "outbox publish cycle finished"
        );
        report
    }

    async fn deliver(&self, event: &OutboxEvent) -> Result<(), DeliveryError> {
        match tokio::time::timeout(self.settings.send_timeout, self.publisher.send(event)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(self.settings.send_timeout)),
        }
    }

    /// Whether a send started at `now` could still be running when the claim
    /// becomes stealable.
    fn claim_outlived(&self, event: &OutboxEvent, now: DateTime<Utc>) -> bool {
        let Some(claimed_at) = event.claimed_at else {
            return false;
        };
        let (Ok(lease), Ok(send_timeout)) = (
            chrono::Duration::from_std(self.settings.lease),
            chrono::Duration::from_std(self.settings.send_timeout),
        ) else {
            return false;
        };
        match (
            claimed_at.checked_add_signed(lease),
            now.checked_add_signed(send_timeout),
        ) {
            (Some(expires_at), Some(send_deadline)) => expires_at <= send_deadline,
            _ => false,
        }
    }

    /// Deliver one event and persist its transition. Never fails: every error
    /// becomes an outcome.
    async fn process(&self, event: OutboxEvent, token: Uuid) -> EventOutcome {
        if self.claim_outlived(&event, Utc::now()) {
            // Another instance may take the row over mid-send; leave it to them.
            warn!(
                event_id = %event.id,
                "outbox claim expires before a send could finish, skipping event"
            );
            return EventOutcome::Lost;
        }

        // Earlier owners ran out their leases without recording a result.
        if event.attempts >= self.settings.backoff.max_attempts {
            warn!(
                event_id = %event.id,
                topic = %event.topic,
                attempts = event.attempts,
                "outbox event exhausted its attempts through claim takeovers, giving up"
            );
            let recorded = self
                .store
                .mark_failed(event.id, token, event.attempts, ABANDONED_CLAIMS)
                .await;
            return settle(&event, EventOutcome::Failed, recorded);
        }

        let delivered = self.deliver(&event).await;
        let now = Utc::now();

        let (outcome, recorded) = match delivered {
            Ok(()) => (
                EventOutcome::Sent,
                self.store.mark_sent(event.id, token, now).await,
            ),
            Err(delivery_error) => {
                let message = truncate_error(&delivery_error.to_string());
                match self
                    .settings
                    .backoff
                    .decide(event.attempts, event.next_attempt_at, now)
                {
                    RetryDecision::Retry {
                        attempts,
                        next_attempt_at,
                    } => {
                        warn!(
                            event_id = %event.id,
                            topic = %event.topic,
                            attempts,
                            %next_attempt_at,
                            error = %message,
                            "failed to publish outbox event, will retry"
                        );
                        (
                            EventOutcome::Retried,
                            self.store
                                .mark_retry(event.id, token, attempts, next_attempt_at, &message)
                                .await,
                        )
                    }
                    RetryDecision::Exhausted { attempts } => {
                        warn!(
                            event_id = %event.id,
                            topic = %event.topic,
                            attempts,
                            error = %message,
                            "failed to publish outbox event, giving up"
                        );
                        (
                            EventOutcome::Failed,
                            self.store
                                .mark_failed(event.id, token, attempts, &message)
                                .await,
                        )
                    }
                }
            }
        };

        settle(&event, outcome, recorded)
    }
}

/// `last_error` of an event failed because its claims kept expiring.
pub const ABANDONED_CLAIMS: &str = "claim expired before delivery was recorded";

/// Map the result write of `outcome` to what actually happened.
fn settle(
    event: &OutboxEvent,
    outcome: EventOutcome,
    recorded: Result<bool, ImagesServiceError>,
) -> EventOutcome {
    match recorded {
        Ok(true) => outcome,
        Ok(false) => {
            warn!(event_id = %event.id, "outbox claim lost before result was recorded");
            EventOutcome::Lost
        }
        Err(e) => {
            log_unrecorded(event, outcome, &e);
            EventOutcome::Unrecorded
        }
    }
}

fn log_unrecorded(event: &OutboxEvent, outcome: EventOutcome, e: &ImagesServiceError) {
    error!(
        event_id = %event.id,
        outcome = ?outcome,
        error = ?e,
        "failed to record outbox delivery result"
    );
}
