//! Test doubles for the outbox engine: an in-memory repository, a controllable clock, and
//! a recording publisher. Integration tests against a live database are `#[ignore]`-gated;
//! these doubles let the state machine itself be tested deterministically and fast.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{truncate_reason, OutboxError, OutboxResult};
use crate::model::{OutboxMessage, OutboxStatus};
use crate::publisher::OutboundPublisher;
use crate::repository::{OutboxRepository, DEFAULT_LEASE_DURATION};

/// A controllable clock for deterministic backoff/lease-expiry assertions.
pub struct FixedClock {
    millis: AtomicI64,
}

impl FixedClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    pub fn advance(&self, delta: Duration) {
        self.millis.fetch_add(delta.num_milliseconds(), Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst))
            .expect("valid timestamp")
    }
}

/// Non-persistent [`OutboxRepository`] backed by a mutex-guarded map. `mark_processing`
/// performs the same read-then-conditionally-write-under-lock sequence the SQL
/// implementation's `UPDATE ... WHERE status = 'PENDING'` performs atomically in the
/// database, so the same at-most-one-winner guarantee holds in-process.
#[derive(Default)]
pub struct InMemoryOutboxRepository {
    rows: Mutex<HashMap<Uuid, OutboxMessage>>,
    lease_duration: Duration,
}

impl InMemoryOutboxRepository {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            lease_duration: DEFAULT_LEASE_DURATION,
        }
    }

    /// Insert a message directly, bypassing the transactional `append` path. Used by
    /// tests that don't need to exercise the enqueuer.
    pub fn seed(&self, message: OutboxMessage) {
        self.rows.lock().unwrap().insert(message.id, message);
    }

    pub fn snapshot(&self, id: Uuid) -> Option<OutboxMessage> {
        self.rows.lock().unwrap().get(&id).cloned()
    }
}

#[async_trait]
impl OutboxRepository for InMemoryOutboxRepository {
    async fn append(
        &self,
        _tx: &mut Transaction<'_, Postgres>,
        message: &OutboxMessage,
    ) -> OutboxResult<()> {
        self.rows.lock().unwrap().insert(message.id, message.clone());
        Ok(())
    }

    async fn fetch_batch(&self, limit: u32, now: DateTime<Utc>) -> OutboxResult<Vec<OutboxMessage>> {
        let rows = self.rows.lock().unwrap();
        let mut eligible: Vec<OutboxMessage> = rows
            .values()
            .filter(|m| match m.status {
                OutboxStatus::Pending => true,
                OutboxStatus::Failed => m.next_attempt_at.map(|t| t <= now).unwrap_or(true),
                OutboxStatus::Processing => false, // lease expiry not modeled in-memory
                _ => false,
            })
            .cloned()
            .collect();

        eligible.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        eligible.truncate(limit as usize);
        Ok(eligible)
    }

    async fn mark_processing(&self, id: Uuid, now: DateTime<Utc>) -> OutboxResult<bool> {
        let mut rows = self.rows.lock().unwrap();
        let Some(row) = rows.get_mut(&id) else {
            return Ok(false);
        };

        let eligible = match row.status {
            OutboxStatus::Pending => true,
            OutboxStatus::Failed => row.next_attempt_at.map(|t| t <= now).unwrap_or(true),
            _ => false,
        };

        if !eligible {
            return Ok(false);
        }

        row.status = OutboxStatus::Processing;
        row.last_attempt_at = Some(now);
        Ok(true)
    }

    async fn mark_published(&self, id: Uuid, attempts: u32, published_at: DateTime<Utc>) -> OutboxResult<()> {
        let mut rows = self.rows.lock().unwrap();
        let Some(row) = rows.get_mut(&id) else {
            return Err(OutboxError::MessageNotFound(id.to_string()));
        };
        if row.status == OutboxStatus::Published {
            return Ok(());
        }
        row.status = OutboxStatus::Published;
        row.attempts = attempts;
        row.published_at = Some(published_at);
        Ok(())
    }

    async fn mark_retryable(
        &self,
        id: Uuid,
        reason: &str,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> OutboxResult<()> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.get_mut(&id) {
            if !row.status.is_terminal() {
                row.status = OutboxStatus::Failed;
                row.last_error = Some(truncate_reason(reason));
                row.attempts = attempts;
                row.last_attempt_at = Some(now);
                row.next_attempt_at = Some(next_attempt_at);
            }
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
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.get_mut(&id) {
            if row.status != OutboxStatus::Published {
                row.status = OutboxStatus::Dead;
                row.last_error = Some(truncate_reason(reason));
                row.attempts = attempts;
                row.last_attempt_at = Some(now);
            }
        }
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> OutboxResult<Option<OutboxMessage>> {
        Ok(self.rows.lock().unwrap().get(&id).cloned())
    }

    async fn count_by_status(&self, status: OutboxStatus) -> OutboxResult<i64> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|m| m.status == status)
            .count() as i64)
    }

    async fn delete_published_older_than(&self, cutoff: DateTime<Utc>) -> OutboxResult<u64> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|_, m| {
            !(m.status == OutboxStatus::Published
                && m.published_at.map(|t| t < cutoff).unwrap_or(false))
        });
        Ok((before - rows.len()) as u64)
    }
}

/// Scripted [`OutboundPublisher`] for tests: returns a pre-programmed sequence of
/// results per topic and records every invocation for assertions (e.g. S6's ordering
/// check, S4's "called >= 1 time" check).
pub struct RecordingPublisher {
    script: Mutex<HashMap<String, Vec<Result<(), String>>>>,
    default_result: Result<(), String>,
    calls: Mutex<Vec<(String, Uuid)>>,
}

impl RecordingPublisher {
    pub fn always_ok() -> Self {
        Self {
            script: Mutex::new(HashMap::new()),
            default_result: Ok(()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn always_failing(reason: impl Into<String>) -> Self {
        Self {
            script: Mutex::new(HashMap::new()),
            default_result: Err(reason.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue a sequence of results for a specific topic; consumed front-to-back.
    pub fn script_for_topic(&self, topic: impl Into<String>, results: Vec<Result<(), String>>) {
        self.script.lock().unwrap().insert(topic.into(), results);
    }

    pub fn calls(&self) -> Vec<(String, Uuid)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl OutboundPublisher for RecordingPublisher {
    async fn publish(&self, message: &OutboxMessage) -> Result<(), String> {
        self.calls
            .lock()
            .unwrap()
            .push((message.topic.clone(), message.id));

        let mut script = self.script.lock().unwrap();
        if let Some(queue) = script.get_mut(&message.topic) {
            if !queue.is_empty() {
                return queue.remove(0);
            }
        }
        self.default_result.clone()
    }
}
