use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Images service error variants.
#[derive(Debug, thiserror::Error)]
pub enum ImagesServiceError {
    #[error("image already exists")]
    ImageAlreadyExists,
    #[error("invalid image: {0}")]
    InvalidImage(&'static str),
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl ImagesServiceError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ImageAlreadyExists => "IMAGE_ALREADY_EXISTS",
            Self::InvalidImage(_) => "INVALID_IMAGE",
            Self::Internal(_) => "INTERNAL",
        }
    }
}

impl IntoResponse for ImagesServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::ImageAlreadyExists => StatusCode::CONFLICT,
            Self::InvalidImage(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if let Self::Internal(ref e) = self {
            tracing::error!(error = %e, kind = "INTERNAL", "internal error");
        }
        let body = serde_json::json!({
            "kind": self.kind(),
            "message": self.to_string(),
        });
        (status, axum::Json(body)).into_response()
    }
}

/// A single delivery attempt did not reach the broker or was rejected by it.
///
/// Expected during normal operation; the publish cycle turns it into a retry
/// or a `FAILED` row.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("broker error: {0}")]
    Broker(String),
    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),
    #[error("payload serialization failed: {0}")]
    Payload(#[from] serde_json::Error),
}

impl From<rdkafka::error::KafkaError> for DeliveryError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        Self::Broker(err.to_string())
    }
}

/// Publisher configuration is unusable. Aborts publisher start-up only.
#[derive(Debug, thiserror::Error)]
pub enum OutboxConfigError {
    #[error("KAFKA_USERNAME and KAFKA_PASSWORD must be set together")]
    CredentialMismatch,
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("failed to read publisher environment: {0}")]
    Env(#[from] envy::Error),
}
