//! Runs against a real PostgreSQL (`DATABASE_URL`):
//! `cargo test -p imagehub-images -- --ignored`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sea_orm::{ColumnTrait, Database, DatabaseConnection, EntityTrait, QueryFilter};
use serde_json::json;
use tokio::sync::Mutex;
use uuid::Uuid;

use imagehub_images::domain::repository::OutboxStore;
use imagehub_images::domain::types::{NewOutboxEvent, OutboxStatus};
use imagehub_images::infra::db::{DbOutboxStore, insert_outbox_event};
use imagehub_images::usecase::claim::ClaimUseCase;
use imagehub_images_migration::{Migrator, MigratorTrait};
use imagehub_images_schema::outbox_events;

static MIGRATED: Mutex<bool> = Mutex::const_new(false);

async fn connect() -> Arc<DatabaseConnection> {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let db = Database::connect(&url).await.expect("failed to connect");
    let mut migrated = MIGRATED.lock().await;
    if !*migrated {
        Migrator::up(&db, None).await.expect("failed to migrate");
        *migrated = true;
    }
    Arc::new(db)
}

/// Events on a topic unique to this run, so parallel runs do not collide.
async fn seed(db: &DatabaseConnection, topic: &str, count: usize) -> HashSet<Uuid> {
    let mut ids = HashSet::new();
    for n in 0..count {
        let event = NewOutboxEvent {
            id: Uuid::new_v4(),
            topic: topic.to_owned(),
            key: Some(format!("k{n}")),
            event_type: "image.uploaded".to_owned(),
            event_version: 1,
            payload: json!({ "n": n }),
        };
        insert_outbox_event(db, &event, Utc::now() - chrono::Duration::seconds(1))
            .await
            .unwrap();
        ids.insert(event.id);
    }
    ids
}

async fn cleanup(db: &DatabaseConnection, topic: &str) {
    outbox_events::Entity::delete_many()
        .filter(outbox_events::Column::Topic.eq(topic))
        .exec(db)
        .await
        .unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn concurrent_claims_should_not_overlap() {
    let db = connect().await;
    let topic = format!("test.{}", Uuid::new_v4());
    let seeded = seed(&db, &topic, 30).await;

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let store = DbOutboxStore {
            db: Arc::clone(&db),
        };
        tasks.push(tokio::spawn(async move {
            ClaimUseCase {
                store: &store,
                batch_size: 10,
                lease: Duration::from_secs(300),
            }
            .execute(Utc::now())
            .await
            .unwrap()
            .events
        }));
    }

    let mut claimed = HashSet::new();
    for task in tasks {
        for event in task.await.unwrap() {
            if event.topic == topic {
                assert!(claimed.insert(event.id), "event {} claimed twice", event.id);
                assert_eq!(event.status, OutboxStatus::Processing);
            }
        }
    }
    assert!(claimed.is_subset(&seeded));

    cleanup(&db, &topic).await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn stale_claim_should_lose_to_new_owner() {
    let db = connect().await;
    let topic = format!("test.{}", Uuid::new_v4());
    let seeded = seed(&db, &topic, 1).await;
    let id = *seeded.iter().next().unwrap();
    let store = DbOutboxStore {
        db: Arc::clone(&db),
    };

    // Zero lease: every PROCESSING row is immediately re-claimable.
    let take = || ClaimUseCase {
        store: &store,
        batch_size: 1000,
        lease: Duration::ZERO,
    };
    let first = take().execute(Utc::now()).await.unwrap();
    assert!(first.events.iter().any(|e| e.id == id));
    let second = take().execute(Utc::now()).await.unwrap();
    assert!(second.events.iter().any(|e| e.id == id));

    assert!(!store.mark_sent(id, first.token, Utc::now()).await.unwrap());
    assert!(store.mark_sent(id, second.token, Utc::now()).await.unwrap());

    let row = outbox_events::Entity::find_by_id(id)
        .one(db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, outbox_events::Status::Sent);
    assert!(row.claim_token.is_none());

    cleanup(&db, &topic).await;
}
