use axum::{Json, extract::State};

use crate::domain::repository::OutboxStore;
use crate::domain::types::OutboxStats;
use crate::error::ImagesServiceError;
use crate::state::AppState;

// ── GET /outbox/stats ────────────────────────────────────────────────────────

pub async fn outbox_stats(
    State(state): State<AppState>,
) -> Result<Json<OutboxStats>, ImagesServiceError> {
    let stats = state.outbox_store().status_counts().await?;
    Ok(Json(stats))
}
