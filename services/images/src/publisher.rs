//! Periodic outbox relay.
//!
//! [`OutboxPublisher::start`] turns a resolved [`PublisherMode`] into a running
//! loop owned by a [`PublisherHandle`]. The loop ticks every poll interval and
//! hands each tick to [`PublishCycle::trigger`] in its own task, so a slow
//! cycle turns the following ticks into no-ops instead of queueing them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::config::{DisabledReason, KafkaSettings, PublisherMode};
use crate::domain::repository::{EventPublisher, OutboxStore};
use crate::error::DeliveryError;
use crate::usecase::publish::{CycleSettings, PublishCycle};

pub struct OutboxPublisher;

impl OutboxPublisher {
    /// Start the relay if `mode` allows it.
    ///
    /// `connect` runs at most once and only for an enabled mode; a disabled
    /// publisher never touches the broker and leaves every row `PENDING`.
    pub async fn start<S, P, F, Fut>(
        mode: PublisherMode,
        store: S,
        connect: F,
    ) -> Result<Option<PublisherHandle>, DeliveryError>
    where
        S: OutboxStore + 'static,
        P: EventPublisher + 'static,
        F: FnOnce(KafkaSettings) -> Fut,
        Fut: Future<Output = Result<P, DeliveryError>>,
    {
        let config = match mode {
            PublisherMode::Disabled(reason @ DisabledReason::FeatureOff) => {
                info!(%reason, "outbox publisher disabled");
                return Ok(None);
            }
            PublisherMode::Disabled(reason @ DisabledReason::NoBrokers) => {
                warn!(%reason, "outbox publisher disabled");
                return Ok(None);
            }
            PublisherMode::Enabled(config) => config,
        };

        let publisher = connect(config.kafka).await?;
        info!(
            poll_interval_ms = config.poll_interval.as_millis() as u64,
            batch_size = config.cycle.batch_size,
            concurrency = config.cycle.concurrency,
            "outbox publisher started"
        );
        Ok(Some(PublisherHandle::spawn(
            store,
            publisher,
            config.cycle,
            config.poll_interval,
        )))
    }
}

/// Owner of a running relay loop. Dropping it without [`Self::shutdown`]
/// also stops the loop: the in-flight cycle finishes and the publisher is
/// closed, but nothing waits for that to happen.
pub struct PublisherHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PublisherHandle {
    pub fn spawn<S, P>(
        store: S,
        publisher: P,
        settings: CycleSettings,
        poll_interval: Duration,
    ) -> Self
    where
        S: OutboxStore + 'static,
        P: EventPublisher + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let cycle = Arc::new(PublishCycle::new(store, publisher, settings));
        let task = tokio::spawn(run_loop(cycle, poll_interval, shutdown_rx));
        Self { shutdown_tx, task }
    }

    /// Stop ticking, wait for the in-flight cycle, then close the broker client.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "outbox publisher loop terminated abnormally");
        }
    }
}

async fn run_loop<S, P>(
    cycle: Arc<PublishCycle<S, P>>,
    poll_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    S: OutboxStore + 'static,
    P: EventPublisher + 'static,
{
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut cycles = JoinSet::new();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                while let Some(finished) = cycles.try_join_next() {
                    log_join_error(finished);
                }
                let cycle = Arc::clone(&cycle);
                cycles.spawn(async move {
                    cycle.trigger().await;
                });
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    while let Some(finished) = cycles.join_next().await {
        log_join_error(finished);
    }
    cycle.publisher().close().await;
    info!("outbox publisher stopped");
}

fn log_join_error(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        error!(error = %e, "outbox publish cycle panicked");
    }
}
