use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::TestServer;
use sea_orm::{DatabaseBackend, MockDatabase};
use serde_json::json;

use imagehub_images::router::build_router;
use imagehub_images::state::AppState;
use imagehub_images_schema::outbox_events;

fn server(db: MockDatabase) -> TestServer {
    let state = AppState {
        db: Arc::new(db.into_connection()),
    };
    TestServer::new(build_router(state)).unwrap()
}

#[tokio::test]
async fn healthz_should_answer_with_request_id() {
    let server = server(MockDatabase::new(DatabaseBackend::Postgres));

    let response = server.get("/healthz").await;

    response.assert_status_ok();
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn readyz_should_pass_when_database_answers() {
    let server = server(MockDatabase::new(DatabaseBackend::Postgres));

    let response = server.get("/readyz").await;

    response.assert_status_ok();
}

#[tokio::test]
async fn outbox_stats_should_report_zero_for_empty_table() {
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([Vec::<outbox_events::Model>::new()]);
    let server = server(db);

    let response = server.get("/outbox/stats").await;

    response.assert_status_ok();
    response.assert_json(&json!({
        "pending": 0,
        "processing": 0,
        "sent": 0,
        "failed": 0,
    }));
}

#[tokio::test]
async fn outbox_stats_should_map_database_errors_to_500() {
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_errors([sea_orm::DbErr::Custom("connection refused".to_owned())]);
    let server = server(db);

    let response = server.get("/outbox/stats").await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = response.json();
    assert_eq!(body["kind"], "INTERNAL");
}
