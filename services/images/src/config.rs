use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use imagehub_core::config::Config;

use crate::domain::backoff::BackoffPolicy;
use crate::error::OutboxConfigError;
use crate::usecase::publish::CycleSettings;

/// Images service configuration loaded from environment variables.
#[derive(Debug, Deserialize)]
pub struct ImagesConfig {
    /// PostgreSQL connection URL. Env var: `DATABASE_URL`.
    pub database_url: String,
    /// TCP port for the HTTP server (default 3114). Env var: `IMAGES_PORT`.
    #[serde(default = "default_images_port")]
    pub images_port: u16,
    /// Tracing filter used when `RUST_LOG` is unset (default "info").
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Config for ImagesConfig {}

fn default_images_port() -> u16 {
    3114
}

fn default_log_level() -> String {
    "info".to_owned()
}

/// SASL mechanism used with `KAFKA_USERNAME` / `KAFKA_PASSWORD`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum SaslMechanism {
    #[default]
    #[serde(rename = "plain")]
    Plain,
    #[serde(rename = "scram-sha-256")]
    ScramSha256,
    #[serde(rename = "scram-sha-512")]
    ScramSha512,
}

impl SaslMechanism {
    /// librdkafka `sasl.mechanism` value.
    pub fn as_rdkafka(&self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::ScramSha256 => "SCRAM-SHA-256",
            Self::ScramSha512 => "SCRAM-SHA-512",
        }
    }
}

/// Raw `KAFKA_*` environment. Resolve with [`KafkaEnv::resolve`].
#[derive(Debug, Deserialize)]
pub struct KafkaEnv {
    #[serde(default)]
    pub enabled: bool,
    /// Comma-separated `host:port` list.
    #[serde(default)]
    pub brokers: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default)]
    pub ssl: bool,
    #[serde(default)]
    pub sasl_mechanism: SaslMechanism,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_image_uploaded_topic")]
    pub topic_image_uploaded: String,
    #[serde(default = "default_poll_interval_ms")]
    pub outbox_poll_interval_ms: u64,
    #[serde(default = "default_batch_size")]
    pub outbox_batch_size: u64,
    #[serde(default = "default_max_attempts")]
    pub outbox_max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub outbox_base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub outbox_max_delay_ms: u64,
    #[serde(default = "default_lease_secs")]
    pub outbox_lease_secs: u64,
    #[serde(default = "default_send_timeout_ms")]
    pub outbox_send_timeout_ms: u64,
    #[serde(default = "default_concurrency")]
    pub outbox_concurrency: usize,
    #[serde(default)]
    pub outbox_jitter: bool,
}

impl Config for KafkaEnv {
    const PREFIX: &'static str = "KAFKA_";
}

fn default_client_id() -> String {
    "image-service".to_owned()
}

fn default_image_uploaded_topic() -> String {
    "image.uploaded".to_owned()
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_batch_size() -> u64 {
    100
}

fn default_max_attempts() -> u32 {
    10
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    15 * 60 * 1000
}

fn default_lease_secs() -> u64 {
    300
}

fn default_send_timeout_ms() -> u64 {
    10_000
}

fn default_concurrency() -> usize {
    1
}

/// Publisher on/off decision, made once at start-up.
#[derive(Debug, Clone)]
pub enum PublisherMode {
    Disabled(DisabledReason),
    Enabled(PublisherConfig),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisabledReason {
    /// `KAFKA_ENABLED` is not `true`.
    FeatureOff,
    /// Enabled, but `KAFKA_BROKERS` lists no endpoint.
    NoBrokers,
}

impl fmt::Display for DisabledReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FeatureOff => f.write_str("KAFKA_ENABLED=false"),
            Self::NoBrokers => f.write_str("KAFKA_BROKERS is empty"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub kafka: KafkaSettings,
    pub poll_interval: Duration,
    pub cycle: CycleSettings,
}

/// Broker connection settings.
#[derive(Debug, Clone)]
pub struct KafkaSettings {
    pub brokers: Vec<String>,
    pub client_id: String,
    pub ssl: bool,
    pub credentials: Option<Credentials>,
    /// Upper bound for one produce call, including broker retries.
    pub send_timeout: Duration,
}

#[derive(Clone)]
pub struct Credentials {
    pub mechanism: SaslMechanism,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("mechanism", &self.mechanism)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl KafkaEnv {
    fn broker_list(&self) -> Vec<String> {
        self.brokers
            .split(',')
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(str::to_owned)
            .collect()
    }

    fn credentials(&self) -> Result<Option<Credentials>, OutboxConfigError> {
        let username = self.username.trim();
        match (username.is_empty(), self.password.is_empty()) {
            (true, true) => Ok(None),
            (false, false) => Ok(Some(Credentials {
                mechanism: self.sasl_mechanism,
                username: username.to_owned(),
                password: self.password.clone(),
            })),
            _ => Err(OutboxConfigError::CredentialMismatch),
        }
    }

    /// Decide whether the publisher runs and with which settings.
    pub fn resolve(&self) -> Result<PublisherMode, OutboxConfigError> {
        if !self.enabled {
            return Ok(PublisherMode::Disabled(DisabledReason::FeatureOff));
        }
        let brokers = self.broker_list();
        if brokers.is_empty() {
            return Ok(PublisherMode::Disabled(DisabledReason::NoBrokers));
        }
        let credentials = self.credentials()?;

        let nonzero = |value: u64, name: &'static str| {
            if value == 0 {
                Err(OutboxConfigError::Zero(name))
            } else {
                Ok(value)
            }
        };
        let poll_interval_ms = nonzero(self.outbox_poll_interval_ms, "KAFKA_OUTBOX_POLL_INTERVAL_MS")?;
        let batch_size = nonzero(self.outbox_batch_size, "KAFKA_OUTBOX_BATCH_SIZE")?;
        nonzero(self.outbox_max_attempts.into(), "KAFKA_OUTBOX_MAX_ATTEMPTS")?;
        let send_timeout_ms = nonzero(self.outbox_send_timeout_ms, "KAFKA_OUTBOX_SEND_TIMEOUT_MS")?;
        let lease_secs = nonzero(self.outbox_lease_secs, "KAFKA_OUTBOX_LEASE_SECS")?;
        nonzero(self.outbox_concurrency as u64, "KAFKA_OUTBOX_CONCURRENCY")?;

        let send_timeout = Duration::from_millis(send_timeout_ms);
        let floor = min_lease(batch_size, self.outbox_concurrency, send_timeout);
        let mut lease = Duration::from_secs(lease_secs);
        if lease < floor {
            warn!(
                configured_secs = lease_secs,
                lease_ms = floor.as_millis() as u64,
                "KAFKA_OUTBOX_LEASE_SECS is shorter than a full batch of sends, raising it"
            );
            lease = floor;
        }

        Ok(PublisherMode::Enabled(PublisherConfig {
            kafka: KafkaSettings {
                brokers,
                client_id: self.client_id.clone(),
                ssl: self.ssl,
                credentials,
                send_timeout,
            },
            poll_interval: Duration::from_millis(poll_interval_ms),
            cycle: CycleSettings {
                batch_size,
                lease,
                send_timeout,
                concurrency: self.outbox_concurrency,
                backoff: BackoffPolicy {
                    base_delay: Duration::from_millis(self.outbox_base_delay_ms),
                    max_delay: Duration::from_millis(self.outbox_max_delay_ms),
                    max_attempts: self.outbox_max_attempts,
                    jitter: self.outbox_jitter,
                },
            },
        }))
    }
}

/// Shortest lease that outlasts a whole batch of timed-out sends, so a claim
/// cannot expire while its owner is still working through the batch.
pub fn min_lease(batch_size: u64, concurrency: usize, send_timeout: Duration) -> Duration {
    let rounds = batch_size.div_ceil(concurrency.max(1) as u64);
    let rounds = u32::try_from(rounds.saturating_add(1)).unwrap_or(u32::MAX);
    send_timeout.saturating_mul(rounds)
}
