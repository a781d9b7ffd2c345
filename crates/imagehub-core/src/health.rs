use axum::{extract::State, http::StatusCode};

/// Dependency checked by `GET /readyz`.
pub trait Readiness: Clone + Send + Sync + 'static {
    fn is_ready(&self) -> impl Future<Output = bool> + Send;
}

/// Handler for `GET /healthz` — liveness check.
pub async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// Handler for `GET /readyz` — 503 until the service's dependencies answer.
pub async fn readyz<R: Readiness>(State(probe): State<R>) -> StatusCode {
    if probe.is_ready().await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
