use std::time::Duration;

use rdkafka::ClientConfig;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use tracing::{info, warn};

use crate::config::KafkaSettings;
use crate::domain::repository::EventPublisher;
use crate::domain::types::OutboxEvent;
use crate::error::DeliveryError;

/// How long shutdown waits for queued messages to drain.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the start-up metadata probe waits for a broker.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// librdkafka settings for the outbox producer.
///
/// Topics are never auto-created: a missing topic fails the delivery.
pub fn client_config(settings: &KafkaSettings) -> ClientConfig {
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", settings.brokers.join(","))
        .set("client.id", &settings.client_id)
        .set("allow.auto.create.topics", "false")
        .set("acks", "all")
        .set(
            "message.timeout.ms",
            settings.send_timeout.as_millis().to_string(),
        );

    let protocol = match (settings.ssl, settings.credentials.is_some()) {
        (false, false) => "plaintext",
        (true, false) => "ssl",
        (false, true) => "sasl_plaintext",
        (true, true) => "sasl_ssl",
    };
    config.set("security.protocol", protocol);

    if let Some(credentials) = &settings.credentials {
        config
            .set("sasl.mechanism", credentials.mechanism.as_rdkafka())
            .set("sasl.username", &credentials.username)
            .set("sasl.password", &credentials.password);
    }
    config
}

/// Kafka implementation of [`EventPublisher`].
#[derive(Clone)]
pub struct KafkaPublisher {
    producer: FutureProducer,
}

impl KafkaPublisher {
    /// Create the producer. librdkafka connects lazily; see [`Self::probe`].
    pub fn connect(settings: &KafkaSettings) -> Result<Self, DeliveryError> {
        let producer: FutureProducer = client_config(settings).create()?;
        info!(
            brokers = %settings.brokers.join(","),
            client_id = %settings.client_id,
            "kafka producer created"
        );
        Ok(Self { producer })
    }

    /// Fetch cluster metadata once to surface unreachable brokers early.
    pub async fn probe(&self) -> Result<(), DeliveryError> {
        let producer = self.producer.clone();
        let brokers = tokio::task::spawn_blocking(move || {
            producer
                .client()
                .fetch_metadata(None, PROBE_TIMEOUT)
                .map(|metadata| metadata.brokers().len())
        })
        .await
        .map_err(|e| DeliveryError::Broker(e.to_string()))??;
        info!(brokers, "kafka cluster reachable");
        Ok(())
    }
}

/// Kafka record for `event`: the JSON payload as value, the event key when
/// set, and `event-id`/`event-type`/`event-version` headers.
fn outbox_record<'a>(event: &'a OutboxEvent, body: &'a Vec<u8>) -> FutureRecord<'a, str, Vec<u8>> {
    let event_id = event.id.to_string();
    let event_version = event.event_version.to_string();
    let headers = OwnedHeaders::new()
        .insert(Header {
            key: "event-id",
            value: Some(event_id.as_str()),
        })
        .insert(Header {
            key: "event-type",
            value: Some(event.event_type.as_str()),
        })
        .insert(Header {
            key: "event-version",
            value: Some(event_version.as_str()),
        });

    let record = FutureRecord::to(&event.topic).payload(body).headers(headers);
    match event.key.as_deref() {
        Some(key) => record.key(key),
        None => record,
    }
}

impl EventPublisher for KafkaPublisher {
    async fn send(&self, event: &OutboxEvent) -> Result<(), DeliveryError> {
        let body = serde_json::to_vec(&event.payload)?;
        self.producer
            .send(outbox_record(event, &body), Duration::ZERO)
            .await
            .map(|_| ())
            .map_err(|(err, _message)| DeliveryError::from(err))
    }

    async fn close(&self) {
        let producer = self.producer.clone();
        let flushed =
            tokio::task::spawn_blocking(move || producer.flush(FLUSH_TIMEOUT)).await;
        match flushed {
            Ok(Ok(())) => info!("kafka producer flushed"),
            Ok(Err(e)) => warn!(error = %e, "kafka producer flush incomplete"),
            Err(e) => warn!(error = %e, "kafka producer flush task failed"),
        }
    }
}
