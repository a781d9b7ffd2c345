use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, Condition, ConnectionTrait,
    DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder, QuerySelect, SqlErr,
    TransactionError, TransactionTrait,
    sea_query::{Expr, LockBehavior, LockType, SimpleExpr},
};
use uuid::Uuid;

use imagehub_core::health::Readiness;
use imagehub_images_schema::outbox_events::{self, Status};
use imagehub_images_schema::images;

use crate::domain::repository::{ClaimRequest, ImageRepository, OutboxStore};
use crate::domain::types::{Image, NewOutboxEvent, OutboxEvent, OutboxStats, OutboxStatus};
use crate::error::ImagesServiceError;

// ── Outbox store ──────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct DbOutboxStore {
    pub db: Arc<DatabaseConnection>,
}

/// Row still held by the claim identified by `claim_token`.
fn held_by(id: Uuid, claim_token: Uuid) -> Condition {
    Condition::all()
        .add(outbox_events::Column::Id.eq(id))
        .add(outbox_events::Column::Status.eq(Status::Processing))
        .add(outbox_events::Column::ClaimToken.eq(claim_token))
}

/// Due rows, judged by the database clock so that instances with skewed
/// clocks agree on retry eligibility and lease expiry.
fn due(lease: Duration) -> Condition {
    Condition::any()
        .add(
            Condition::all()
                .add(outbox_events::Column::Status.eq(Status::Pending))
                .add(Expr::col(outbox_events::Column::NextAttemptAt).lte(Expr::current_timestamp())),
        )
        .add(
            Condition::all()
                .add(outbox_events::Column::Status.eq(Status::Processing))
                .add(Expr::col(outbox_events::Column::ClaimedAt).lte(lease_expiry(lease))),
        )
}

/// `CURRENT_TIMESTAMP - lease`.
fn lease_expiry(lease: Duration) -> SimpleExpr {
    Expr::cust(format!(
        "CURRENT_TIMESTAMP - INTERVAL '{} milliseconds'",
        lease.as_millis()
    ))
}

impl OutboxStore for DbOutboxStore {
    async fn claim_due_batch(
        &self,
        request: ClaimRequest,
    ) -> Result<Vec<OutboxEvent>, ImagesServiceError> {
        let ClaimRequest {
            limit,
            now,
            lease,
            claim_token,
        } = request;
        let models = self
            .db
            .transaction::<_, Vec<outbox_events::Model>, DbErr>(|txn| {
                Box::pin(async move {
                    let rows = outbox_events::Entity::find()
                        .filter(due(lease))
                        .order_by_asc(outbox_events::Column::CreatedAt)
                        .limit(limit)
                        .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
                        .all(txn)
                        .await?;
                    if rows.is_empty() {
                        return Ok(rows);
                    }

                    let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
                    // A takeover of an expired claim counts as an attempt.
                    let attempts = Expr::case(
                        outbox_events::Column::Status.eq(Status::Processing),
                        Expr::col(outbox_events::Column::Attempts).add(1),
                    )
                    .finally(Expr::col(outbox_events::Column::Attempts));
                    outbox_events::Entity::update_many()
                        .col_expr(outbox_events::Column::Status, Expr::value(Status::Processing))
                        .col_expr(outbox_events::Column::Attempts, attempts.into())
                        .col_expr(outbox_events::Column::ClaimedAt, Expr::current_timestamp().into())
                        .col_expr(outbox_events::Column::ClaimToken, Expr::value(claim_token))
                        .filter(outbox_events::Column::Id.is_in(ids))
                        .exec(txn)
                        .await?;

                    Ok(rows
                        .into_iter()
                        .map(|row| outbox_events::Model {
                            attempts: if row.status == Status::Processing {
                                row.attempts.saturating_add(1)
                            } else {
                                row.attempts
                            },
                            status: Status::Processing,
                            claimed_at: Some(now),
                            claim_token: Some(claim_token),
                            ..row
                        })
                        .collect())
                })
            })
            .await
            .context("claim due outbox events")?;
        Ok(models.into_iter().map(outbox_event_from_model).collect())
    }

    async fn mark_sent(
        &self,
        id: Uuid,
        claim_token: Uuid,
        published_at: DateTime<Utc>,
    ) -> Result<bool, ImagesServiceError> {
        let result = outbox_events::Entity::update_many()
            .col_expr(outbox_events::Column::Status, Expr::value(Status::Sent))
            .col_expr(outbox_events::Column::PublishedAt, Expr::value(published_at))
            .col_expr(outbox_events::Column::LastError, Expr::value(Option::<String>::None))
            .col_expr(
                outbox_events::Column::ClaimedAt,
                Expr::value(Option::<DateTime<Utc>>::None),
            )
            .col_expr(outbox_events::Column::ClaimToken, Expr::value(Option::<Uuid>::None))
            .filter(held_by(id, claim_token))
            .exec(self.db.as_ref())
            .await
            .context("mark outbox event sent")?;
        Ok(result.rows_affected == 1)
    }

    async fn mark_retry(
        &self,
        id: Uuid,
        claim_token: Uuid,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<bool, ImagesServiceError> {
        let result = outbox_events::Entity::update_many()
            .col_expr(outbox_events::Column::Status, Expr::value(Status::Pending))
            .col_expr(outbox_events::Column::Attempts, Expr::value(attempts_column(attempts)))
            .col_expr(outbox_events::Column::NextAttemptAt, Expr::value(next_attempt_at))
            .col_expr(outbox_events::Column::LastError, Expr::value(last_error))
            .col_expr(
                outbox_events::Column::ClaimedAt,
                Expr::value(Option::<DateTime<Utc>>::None),
            )
            .col_expr(outbox_events::Column::ClaimToken, Expr::value(Option::<Uuid>::None))
            .filter(held_by(id, claim_token))
            .exec(self.db.as_ref())
            .await
            .context("mark outbox event for retry")?;
        Ok(result.rows_affected == 1)
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        claim_token: Uuid,
        attempts: u32,
        last_error: &str,
    ) -> Result<bool, ImagesServiceError> {
        let result = outbox_events::Entity::update_many()
            .col_expr(outbox_events::Column::Status, Expr::value(Status::Failed))
            .col_expr(outbox_events::Column::Attempts, Expr::value(attempts_column(attempts)))
            .col_expr(outbox_events::Column::LastError, Expr::value(last_error))
            .col_expr(
                outbox_events::Column::ClaimedAt,
                Expr::value(Option::<DateTime<Utc>>::None),
            )
            .col_expr(outbox_events::Column::ClaimToken, Expr::value(Option::<Uuid>::None))
            .filter(held_by(id, claim_token))
            .exec(self.db.as_ref())
            .await
            .context("mark outbox event failed")?;
        Ok(result.rows_affected == 1)
    }

    async fn status_counts(&self) -> Result<OutboxStats, ImagesServiceError> {
        let rows: Vec<(String, i64)> = outbox_events::Entity::find()
            .select_only()
            .column(outbox_events::Column::Status)
            .column_as(Expr::col(outbox_events::Column::Id).count(), "count")
            .group_by(outbox_events::Column::Status)
            .into_tuple()
            .all(self.db.as_ref())
            .await
            .context("count outbox events by status")?;

        let mut stats = OutboxStats::default();
        for (status, count) in rows {
            let status: OutboxStatus = status
                .parse()
                .map_err(anyhow::Error::msg)
                .context("read outbox status")?;
            stats.add(status, u64::try_from(count).unwrap_or_default());
        }
        Ok(stats)
    }
}

fn attempts_column(attempts: u32) -> i32 {
    i32::try_from(attempts).unwrap_or(i32::MAX)
}

fn status_from_column(status: Status) -> OutboxStatus {
    match status {
        Status::Pending => OutboxStatus::Pending,
        Status::Processing => OutboxStatus::Processing,
        Status::Sent => OutboxStatus::Sent,
        Status::Failed => OutboxStatus::Failed,
    }
}

fn outbox_event_from_model(model: outbox_events::Model) -> OutboxEvent {
    OutboxEvent {
        id: model.id,
        topic: model.topic,
        key: model.key,
        event_type: model.event_type,
        event_version: model.event_version,
        payload: model.payload,
        status: status_from_column(model.status),
        attempts: u32::try_from(model.attempts).unwrap_or_default(),
        next_attempt_at: model.next_attempt_at,
        created_at: model.created_at,
        published_at: model.published_at,
        last_error: model.last_error,
        claimed_at: model.claimed_at,
        claim_token: model.claim_token,
    }
}

/// Insert `event` as a due `PENDING` row on the caller's connection.
///
/// Producers pass their open transaction so the event commits or rolls back
/// together with the business write.
pub async fn insert_outbox_event<C>(
    conn: &C,
    event: &NewOutboxEvent,
    now: DateTime<Utc>,
) -> Result<(), DbErr>
where
    C: ConnectionTrait,
{
    outbox_events::ActiveModel {
        id: Set(event.id),
        topic: Set(event.topic.clone()),
        key: Set(event.key.clone()),
        event_type: Set(event.event_type.clone()),
        event_version: Set(event.event_version),
        payload: Set(event.payload.clone()),
        status: Set(Status::Pending),
        attempts: Set(0),
        next_attempt_at: Set(now),
        created_at: Set(now),
        published_at: Set(None),
        last_error: Set(None),
        claimed_at: Set(None),
        claim_token: Set(None),
    }
    .insert(conn)
    .await?;
    Ok(())
}

// ── Image repository ──────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct DbImageRepository {
    pub db: Arc<DatabaseConnection>,
}

impl ImageRepository for DbImageRepository {
    async fn create_with_outbox(
        &self,
        image: &Image,
        event: &NewOutboxEvent,
    ) -> Result<(), ImagesServiceError> {
        let result = self
            .db
            .transaction::<_, (), DbErr>(|txn| {
                let image = image.clone();
                let event = event.clone();
                Box::pin(async move {
                    insert_image(txn, &image).await?;
                    insert_outbox_event(txn, &event, image.created_at).await?;
                    Ok(())
                })
            })
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(TransactionError::Transaction(e))
                if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) =>
            {
                Err(ImagesServiceError::ImageAlreadyExists)
            }
            Err(e) => Err(anyhow::Error::new(e)
                .context("create image with outbox")
                .into()),
        }
    }
}

async fn insert_image<C>(conn: &C, image: &Image) -> Result<(), DbErr>
where
    C: ConnectionTrait,
{
    images::ActiveModel {
        id: Set(image.id),
        external_id: Set(image.external_id.clone()),
        entity_type: Set(image.entity_type.clone()),
        entity_id: Set(image.entity_id.clone()),
        image_type: Set(image.image_type.clone()),
        original_name: Set(image.original_name.clone()),
        mime_type: Set(image.mime_type.clone()),
        extension: Set(image.extension.clone()),
        size: Set(image.size),
        width: Set(image.width),
        height: Set(image.height),
        storage: Set(image.storage.clone()),
        path: Set(image.path.clone()),
        checksum: Set(image.checksum.clone()),
        created_at: Set(image.created_at),
    }
    .insert(conn)
    .await?;
    Ok(())
}

// ── Readiness ─────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct DbReadiness {
    pub db: Arc<DatabaseConnection>,
}

impl Readiness for DbReadiness {
    async fn is_ready(&self) -> bool {
        self.db.ping().await.is_ok()
    }
}
