//! The outbox repository (component C2): the single source of truth for the state
//! machine, and home of the atomic lease primitive that makes concurrent workers safe.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{truncate_reason, OutboxError, OutboxResult};
use crate::model::{Headers, OutboxMessage, OutboxStatus, Payload};

/// How long a PROCESSING lease is valid before `fetch_batch`/`mark_processing` will treat
/// the row as reclaimable again: a worker that dies mid-publish no longer orphans the row
/// forever.
pub const DEFAULT_LEASE_DURATION: Duration = Duration::seconds(300);

/// Repository trait for managing [`OutboxMessage`]s.
///
/// Abstracts database operations so the processor and enqueuer can be tested against an
/// in-memory double ([`crate::testkit::InMemoryOutboxRepository`]) without a live
/// Postgres instance.
#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Insert a new PENDING message within the caller's transaction.
    ///
    /// Must participate in the caller's business transaction so the row commits
    /// atomically with business state or not at all.
    async fn append(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        message: &OutboxMessage,
    ) -> OutboxResult<()>;

    /// Return up to `limit` messages whose effective status is "ready to attempt"
    /// (PENDING, FAILED with `next_attempt_at <= now`, or a PROCESSING row whose lease
    /// has expired), ordered by `(created_at, id)` ascending. Reads do not mutate state.
    async fn fetch_batch(&self, limit: u32, now: DateTime<Utc>) -> OutboxResult<Vec<OutboxMessage>>;

    /// Atomic compare-and-set lease primitive: PENDING (or eligible FAILED/expired
    /// PROCESSING) -> PROCESSING. Returns `true` iff this call effected the transition.
    /// Exactly one concurrent caller on the same id observes `true`.
    async fn mark_processing(&self, id: Uuid, now: DateTime<Utc>) -> OutboxResult<bool>;

    /// PROCESSING -> PUBLISHED. Idempotent: re-marking an already-PUBLISHED row is a
    /// no-op, not an error. `attempts` is the post-increment count for this completed
    /// attempt (success counts as a completed attempt, same as failure).
    async fn mark_published(&self, id: Uuid, attempts: u32, published_at: DateTime<Utc>) -> OutboxResult<()>;

    /// PROCESSING -> FAILED, with `next_attempt_at` set so a future `fetch_batch` will
    /// not return the row until the backoff elapses.
    async fn mark_retryable(
        &self,
        id: Uuid,
        reason: &str,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> OutboxResult<()>;

    /// PROCESSING or FAILED -> DEAD. Terminal.
    async fn mark_dead(
        &self,
        id: Uuid,
        reason: &str,
        attempts: u32,
        now: DateTime<Utc>,
    ) -> OutboxResult<()>;

    async fn find_by_id(&self, id: Uuid) -> OutboxResult<Option<OutboxMessage>>;

    async fn count_by_status(&self, status: OutboxStatus) -> OutboxResult<i64>;

    /// Delete PUBLISHED rows older than `cutoff`. Returns the number of rows removed.
    async fn delete_published_older_than(&self, cutoff: DateTime<Utc>) -> OutboxResult<u64>;
}

/// SQLx/PostgreSQL-backed implementation of [`OutboxRepository`].
pub struct SqlxOutboxRepository {
    pool: PgPool,
    lease_duration: Duration,
}

impl SqlxOutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lease_duration: DEFAULT_LEASE_DURATION,
        }
    }

    pub fn with_lease_duration(pool: PgPool, lease_duration: Duration) -> Self {
        Self {
            pool,
            lease_duration,
        }
    }

    fn row_to_message(row: sqlx::postgres::PgRow) -> Result<OutboxMessage, sqlx::Error> {
        let headers_json: serde_json::Value = row.try_get("headers")?;
        let headers: Headers = serde_json::from_value(headers_json).unwrap_or_default();

        Ok(OutboxMessage {
            id: row.try_get("id")?,
            aggregate_type: row.try_get("aggregate_type")?,
            aggregate_id: row.try_get("aggregate_id")?,
            event_type: row.try_get("event_type")?,
            topic: row.try_get("topic")?,
            payload: Payload {
                content_type: row.try_get("content_type")?,
                bytes: row.try_get("payload")?,
            },
            headers,
            created_at: row.try_get("created_at")?,
            status: status_from_str(row.try_get::<String, _>("status")?.as_str()),
            attempts: row.try_get::<i32, _>("attempts")? as u32,
            last_attempt_at: row.try_get("last_attempt_at")?,
            published_at: row.try_get("published_at")?,
            last_error: row.try_get("last_error")?,
            next_attempt_at: row.try_get("next_attempt_at")?,
            partition_key: row.try_get("partition_key")?,
        })
    }
}

fn status_from_str(s: &str) -> OutboxStatus {
    match s {
        "PENDING" => OutboxStatus::Pending,
        "PROCESSING" => OutboxStatus::Processing,
        "PUBLISHED" => OutboxStatus::Published,
        "FAILED" => OutboxStatus::Failed,
        "DEAD" => OutboxStatus::Dead,
        other => panic!("unknown outbox status in storage: {other}"),
    }
}

#[async_trait]
impl OutboxRepository for SqlxOutboxRepository {
    async fn append(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        message: &OutboxMessage,
    ) -> OutboxResult<()> {
        let headers_json = serde_json::to_value(&message.headers)?;

        sqlx::query(
            r#"
            INSERT INTO outbox_messages (
                id, aggregate_type, aggregate_id, event_type, topic,
                content_type, payload, headers, created_at, status,
                attempts, last_attempt_at, published_at, last_error,
                next_attempt_at, partition_key, lease_expires_at
            ) VALUES (
                $1, $2, $3, $4, $5,
                $6, $7, $8, $9, $10,
                $11, $12, $13, $14,
                $15, $16, NULL
            )
            "#,
        )
        .bind(message.id)
        .bind(&message.aggregate_type)
        .bind(&message.aggregate_id)
        .bind(&message.event_type)
        .bind(&message.topic)
        .bind(&message.payload.content_type)
        .bind(&message.payload.bytes)
        .bind(&headers_json)
        .bind(message.created_at)
        .bind(message.status.as_str())
        .bind(message.attempts as i32)
        .bind(message.last_attempt_at)
        .bind(message.published_at)
        .bind(&message.last_error)
        .bind(message.next_attempt_at)
        .bind(&message.partition_key)
        .execute(&mut **tx)
        .await?;

        debug!(message_id = %message.id, event_type = %message.event_type, "outbox message appended");
        Ok(())
    }

    async fn fetch_batch(&self, limit: u32, now: DateTime<Utc>) -> OutboxResult<Vec<OutboxMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM outbox_messages
            WHERE status = 'PENDING'
               OR (status = 'FAILED' AND (next_attempt_at IS NULL OR next_attempt_at <= $1))
               OR (status = 'PROCESSING' AND lease_expires_at IS NOT NULL AND lease_expires_at <= $1)
            ORDER BY created_at ASC, id ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let messages = rows
            .into_iter()
            .map(Self::row_to_message)
            .collect::<Result<Vec<_>, _>>()?;

        debug!(count = messages.len(), "fetched eligible outbox batch");
        Ok(messages)
    }

    async fn mark_processing(&self, id: Uuid, now: DateTime<Utc>) -> OutboxResult<bool> {
        let lease_expires_at = now + self.lease_duration;

        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = 'PROCESSING', last_attempt_at = $2, lease_expires_at = $3
            WHERE id = $1
              AND (
                status = 'PENDING'
                OR (status = 'FAILED' AND (next_attempt_at IS NULL OR next_attempt_at <= $2))
                OR (status = 'PROCESSING' AND lease_expires_at IS NOT NULL AND lease_expires_at <= $2)
              )
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(lease_expires_at)
        .execute(&self.pool)
        .await?;

        let leased = result.rows_affected() == 1;
        if leased {
            debug!(message_id = %id, "lease acquired");
        }
        Ok(leased)
    }

    async fn mark_published(&self, id: Uuid, attempts: u32, published_at: DateTime<Utc>) -> OutboxResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = 'PUBLISHED', attempts = $3, published_at = $2, lease_expires_at = NULL
            WHERE id = $1 AND status <> 'PUBLISHED'
            "#,
        )
        .bind(id)
        .bind(published_at)
        .bind(attempts as i32)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            debug!(message_id = %id, "message marked published");
            return Ok(());
        }

        // Either already PUBLISHED (idempotent no-op) or genuinely missing.
        match self.find_by_id(id).await? {
            Some(existing) if existing.status == OutboxStatus::Published => Ok(()),
            Some(_) => Ok(()), // terminal race from a concurrent retry path; treat as settled
            None => Err(OutboxError::MessageNotFound(id.to_string())),
        }
    }

    async fn mark_retryable(
        &self,
        id: Uuid,
        reason: &str,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> OutboxResult<()> {
        let bounded = truncate_reason(reason);

        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = 'FAILED',
                last_error = $2,
                attempts = $3,
                last_attempt_at = $4,
                next_attempt_at = $5,
                lease_expires_at = NULL
            WHERE id = $1 AND status NOT IN ('PUBLISHED', 'DEAD')
            "#,
        )
        .bind(id)
        .bind(&bounded)
        .bind(attempts as i32)
        .bind(now)
        .bind(next_attempt_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!(message_id = %id, "mark_retryable found no eligible row (already terminal)");
        }
        Ok(())
    }

    async fn mark_dead(
        &self,
        id: Uuid,
        reason: &str,
        attempts: u32,
        now: DateTime<Utc>,
    ) -> OutboxResult<()> {
        let bounded = truncate_reason(reason);

        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = 'DEAD',
                last_error = $2,
                attempts = $3,
                last_attempt_at = $4,
                lease_expires_at = NULL
            WHERE id = $1 AND status <> 'PUBLISHED'
            "#,
        )
        .bind(id)
        .bind(&bounded)
        .bind(attempts as i32)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            warn!(message_id = %id, attempts, reason = %bounded, "message dead-lettered");
        }
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> OutboxResult<Option<OutboxMessage>> {
        let row = sqlx::query("SELECT * FROM outbox_messages WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_message)
            .transpose()
            .map_err(OutboxError::from)
    }

    async fn count_by_status(&self, status: OutboxStatus) -> OutboxResult<i64> {
        let row = sqlx::query("SELECT COUNT(*)::BIGINT AS n FROM outbox_messages WHERE status = $1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;

        Ok(row.try_get("n")?)
    }

    async fn delete_published_older_than(&self, cutoff: DateTime<Utc>) -> OutboxResult<u64> {
        let result = sqlx::query(
            "DELETE FROM outbox_messages WHERE status = 'PUBLISHED' AND published_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
