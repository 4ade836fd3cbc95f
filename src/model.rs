//! The outbox message model (component C1).
//!
//! An [`OutboxMessage`] is the only persisted entity of the engine. It is created once by
//! the enqueuer and from then on mutated exclusively through [`crate::repository::OutboxRepository`]
//! state transitions — never field-by-field by application code.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of an [`OutboxMessage`].
///
/// PENDING is the only start state; PUBLISHED and DEAD are terminal and accept no further
/// transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Published,
    Failed,
    Dead,
}

impl OutboxStatus {
    /// Terminal statuses accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, OutboxStatus::Published | OutboxStatus::Dead)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Processing => "PROCESSING",
            OutboxStatus::Published => "PUBLISHED",
            OutboxStatus::Failed => "FAILED",
            OutboxStatus::Dead => "DEAD",
        }
    }
}

/// Opaque message payload: content type plus raw bytes. The engine never inspects the
/// bytes; it is whatever the enqueuer's serializer produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Payload {
    pub fn json(bytes: Vec<u8>) -> Self {
        Self {
            content_type: "application/json".to_string(),
            bytes,
        }
    }
}

/// Ordered, unique-keyed header map. Backed by a `BTreeMap` so serialization and iteration
/// order are deterministic, which matters for tests asserting on header content.
pub type Headers = BTreeMap<String, String>;

/// A pending (or in-flight, or terminal) domain event row in the outbox table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub topic: String,
    pub payload: Payload,
    pub headers: Headers,
    pub created_at: DateTime<Utc>,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Carried end-to-end from enqueue to publish; defaults to `aggregate_id` by the
    /// enqueuer when the caller does not supply one, so per-aggregate ordering at the
    /// broker is the default rather than an opt-in.
    pub partition_key: Option<String>,
}

impl OutboxMessage {
    /// Build a freshly-enqueued message: `status = PENDING`, `attempts = 0`, no terminal
    /// or retry timestamps set.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        event_type: impl Into<String>,
        topic: impl Into<String>,
        payload: Payload,
        headers: Headers,
        created_at: DateTime<Utc>,
        partition_key: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
            event_type: event_type.into(),
            topic: topic.into(),
            payload,
            headers,
            created_at,
            status: OutboxStatus::Pending,
            attempts: 0,
            last_attempt_at: None,
            published_at: None,
            last_error: None,
            next_attempt_at: None,
            partition_key,
        }
    }

    /// True if this message is eligible for `fetchBatch`'s "ready to attempt" filter:
    /// PENDING, or FAILED with `next_attempt_at <= now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            OutboxStatus::Pending => true,
            OutboxStatus::Failed => self.next_attempt_at.map(|t| t <= now).unwrap_or(true),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_message_starts_pending_with_zero_attempts() {
        let msg = OutboxMessage::new(
            "Order",
            "order-1",
            "OrderCreated",
            "orders",
            Payload::json(b"{}".to_vec()),
            Headers::new(),
            Utc::now(),
            None,
        );
        assert_eq!(msg.status, OutboxStatus::Pending);
        assert_eq!(msg.attempts, 0);
        assert!(msg.published_at.is_none());
        assert!(msg.last_error.is_none());
    }

    #[test]
    fn pending_is_always_eligible() {
        let msg = OutboxMessage::new(
            "Order",
            "order-1",
            "OrderCreated",
            "orders",
            Payload::json(b"{}".to_vec()),
            Headers::new(),
            Utc::now(),
            None,
        );
        assert!(msg.is_eligible(Utc::now()));
    }

    #[test]
    fn failed_eligible_only_after_next_attempt_at() {
        let mut msg = OutboxMessage::new(
            "Order",
            "order-1",
            "OrderCreated",
            "orders",
            Payload::json(b"{}".to_vec()),
            Headers::new(),
            Utc::now(),
            None,
        );
        msg.status = OutboxStatus::Failed;
        let now = Utc::now();
        msg.next_attempt_at = Some(now + chrono::Duration::seconds(10));
        assert!(!msg.is_eligible(now));
        assert!(msg.is_eligible(now + chrono::Duration::seconds(11)));
    }

    #[test]
    fn terminal_statuses_reject_transitions() {
        assert!(OutboxStatus::Published.is_terminal());
        assert!(OutboxStatus::Dead.is_terminal());
        assert!(!OutboxStatus::Pending.is_terminal());
        assert!(!OutboxStatus::Processing.is_terminal());
        assert!(!OutboxStatus::Failed.is_terminal());
    }
}
