use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

use imagehub_images::config::{DisabledReason, KafkaSettings, PublisherConfig, PublisherMode};
use imagehub_images::domain::types::OutboxStatus;
use imagehub_images::error::DeliveryError;
use imagehub_images::publisher::OutboxPublisher;

use crate::helpers::{InMemoryOutboxStore, ScriptedPublisher, eventually, pending_event, settings};

fn enabled(poll_interval: Duration) -> PublisherMode {
    PublisherMode::Enabled(PublisherConfig {
        kafka: KafkaSettings {
            brokers: vec!["kafka:9092".to_owned()],
            client_id: "image-service".to_owned(),
            ssl: false,
            credentials: None,
            send_timeout: Duration::from_secs(10),
        },
        poll_interval,
        cycle: settings(10, 3),
    })
}

#[tokio::test]
async fn disabled_publisher_should_never_connect_or_claim() {
    for reason in [DisabledReason::FeatureOff, DisabledReason::NoBrokers] {
        let store = InMemoryOutboxStore::new();
        let event = pending_event(10);
        store.insert(event.clone());
        let connected = Arc::new(AtomicBool::new(false));

        let handle = OutboxPublisher::start(PublisherMode::Disabled(reason), store.clone(), {
            let connected = Arc::clone(&connected);
            |_settings| async move {
                connected.store(true, Ordering::SeqCst);
                Ok(ScriptedPublisher::new())
            }
        })
        .await
        .unwrap();

        assert!(handle.is_none());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!connected.load(Ordering::SeqCst));
        assert_eq!(store.claim_calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.get(event.id).status, OutboxStatus::Pending);
    }
}

#[tokio::test]
async fn should_propagate_connect_failure() {
    let result = OutboxPublisher::start(
        enabled(Duration::from_secs(1)),
        InMemoryOutboxStore::new(),
        |_settings| async { Err::<ScriptedPublisher, _>(DeliveryError::Broker("no route".to_owned())) },
    )
    .await;

    assert!(matches!(result, Err(DeliveryError::Broker(_))));
}

#[tokio::test]
async fn should_run_first_cycle_immediately_and_close_on_shutdown() {
    let store = InMemoryOutboxStore::new();
    let event = pending_event(10);
    store.insert(event.clone());
    let publisher = ScriptedPublisher::new();

    let handle = OutboxPublisher::start(enabled(Duration::from_secs(3600)), store.clone(), {
        let publisher = publisher.clone();
        |settings: KafkaSettings| async move {
            assert_eq!(settings.brokers, vec!["kafka:9092"]);
            Ok(publisher)
        }
    })
    .await
    .unwrap()
    .expect("publisher enabled");

    let delivered = eventually(Duration::from_secs(5), || {
        store.get(event.id).status == OutboxStatus::Sent
    })
    .await;
    assert!(delivered);
    assert!(!publisher.closed.load(Ordering::SeqCst));

    handle.shutdown().await;
    assert!(publisher.closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn should_keep_polling_on_interval() {
    let store = InMemoryOutboxStore::new();
    let publisher = ScriptedPublisher::new();

    let handle = OutboxPublisher::start(enabled(Duration::from_millis(20)), store.clone(), {
        let publisher = publisher.clone();
        |_settings| async move { Ok(publisher) }
    })
    .await
    .unwrap()
    .expect("publisher enabled");

    // Written after the first cycle ran: only a later tick can pick it up.
    let first_ran = eventually(Duration::from_secs(5), || {
        store.claim_calls.load(Ordering::SeqCst) >= 1
    })
    .await;
    assert!(first_ran);
    let event = pending_event(0);
    store.insert(event.clone());
    let delivered = eventually(Duration::from_secs(5), || {
        store.get(event.id).status == OutboxStatus::Sent
    })
    .await;
    assert!(delivered);
    assert!(store.claim_calls.load(Ordering::SeqCst) >= 2);

    handle.shutdown().await;
}

#[tokio::test]
async fn shutdown_should_wait_for_in_flight_cycle() {
    let store = InMemoryOutboxStore::new();
    let event = pending_event(10);
    store.insert(event.clone());
    let gate = Arc::new(Notify::new());
    let publisher = ScriptedPublisher::gated(Arc::clone(&gate));

    let handle = OutboxPublisher::start(enabled(Duration::from_millis(20)), store.clone(), {
        let publisher = publisher.clone();
        |_settings| async move { Ok(publisher) }
    })
    .await
    .unwrap()
    .expect("publisher enabled");

    publisher.entered.notified().await;
    let shutdown = tokio::spawn(handle.shutdown());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!shutdown.is_finished());
    assert!(!publisher.closed.load(Ordering::SeqCst));

    gate.notify_one();
    shutdown.await.unwrap();

    assert!(publisher.closed.load(Ordering::SeqCst));
    assert_eq!(store.get(event.id).status, OutboxStatus::Sent);
    // Ticks during the slow cycle were no-ops.
    assert_eq!(publisher.sent_ids(), vec![event.id]);
}

#[tokio::test]
async fn dropped_handle_should_stop_loop_and_close_publisher() {
    let store = InMemoryOutboxStore::new();
    let publisher = ScriptedPublisher::new();

    let handle = OutboxPublisher::start(enabled(Duration::from_millis(20)), store.clone(), {
        let publisher = publisher.clone();
        |_settings| async move { Ok(publisher) }
    })
    .await
    .unwrap()
    .expect("publisher enabled");
    let first_ran = eventually(Duration::from_secs(5), || {
        store.claim_calls.load(Ordering::SeqCst) >= 1
    })
    .await;
    assert!(first_ran);

    drop(handle);
    let closed = eventually(Duration::from_secs(5), || publisher.closed.load(Ordering::SeqCst)).await;
    assert!(closed);

    let calls = store.claim_calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(store.claim_calls.load(Ordering::SeqCst), calls);
}
