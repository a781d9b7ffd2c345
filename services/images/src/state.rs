use std::sync::Arc;

use axum::extract::FromRef;
use sea_orm::DatabaseConnection;

use crate::infra::db::{DbImageRepository, DbOutboxStore, DbReadiness};

/// Shared application state passed to every handler via axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
}

impl AppState {
    pub fn outbox_store(&self) -> DbOutboxStore {
        DbOutboxStore {
            db: Arc::clone(&self.db),
        }
    }

    pub fn image_repo(&self) -> DbImageRepository {
        DbImageRepository {
            db: Arc::clone(&self.db),
        }
    }
}

impl FromRef<AppState> for DbReadiness {
    fn from_ref(state: &AppState) -> Self {
        DbReadiness {
            db: Arc::clone(&state.db),
        }
    }
}
