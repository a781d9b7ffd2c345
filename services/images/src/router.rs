use axum::{Router, routing::get};

use imagehub_core::health::{healthz, readyz};
use imagehub_core::middleware::with_http_layers;

use crate::handlers::outbox::outbox_stats;
use crate::infra::db::DbReadiness;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let router = Router::new()
        // Health
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz::<DbReadiness>))
        // Outbox
        .route("/outbox/stats", get(outbox_stats))
        .with_state(state);
    with_http_layers(router)
}
