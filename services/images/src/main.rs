use std::sync::Arc;

use sea_orm::Database;
use tracing::{error, info, warn};

use imagehub_core::config::Config;
use imagehub_core::tracing::init_tracing;

use imagehub_images::config::{ImagesConfig, KafkaEnv};
use imagehub_images::error::OutboxConfigError;
use imagehub_images::infra::kafka::KafkaPublisher;
use imagehub_images::publisher::{OutboxPublisher, PublisherHandle};
use imagehub_images::router::build_router;
use imagehub_images::state::AppState;

#[tokio::main]
async fn main() {
    let config = ImagesConfig::from_env();
    init_tracing(&config.log_level);

    let db = Database::connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    let state = AppState { db: Arc::new(db) };

    // Outbox publisher: a broken KAFKA_* setup keeps the HTTP service up.
    let publisher = start_publisher(&state).await;

    // HTTP server
    let router = build_router(state);
    let http_addr = format!("0.0.0.0:{}", config.images_port);
    let listener = tokio::net::TcpListener::bind(&http_addr)
        .await
        .expect("failed to bind");

    info!("images service listening on {http_addr}");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    if let Some(handle) = publisher {
        handle.shutdown().await;
    }
}

async fn start_publisher(state: &AppState) -> Option<PublisherHandle> {
    let mode = match KafkaEnv::try_from_env()
        .map_err(OutboxConfigError::from)
        .and_then(|env| env.resolve())
    {
        Ok(mode) => mode,
        Err(e) => {
            error!(error = %e, "invalid outbox publisher configuration, publisher not started");
            return None;
        }
    };

    let started = OutboxPublisher::start(mode, state.outbox_store(), |settings| async move {
        let publisher = KafkaPublisher::connect(&settings)?;
        if let Err(e) = publisher.probe().await {
            warn!(error = %e, "kafka brokers not reachable yet, deliveries will retry");
        }
        Ok(publisher)
    })
    .await;

    match started {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "failed to create kafka producer, publisher not started");
            None
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
