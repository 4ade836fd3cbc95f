//! The enqueuer (component C3): translates an aggregate's buffered domain events into
//! outbox rows within the caller's business transaction.

use sqlx::{Postgres, Transaction};

use crate::clock::Clock;
use crate::context::{Aggregate, ContextProvider, DomainEvent};
use crate::error::{OutboxError, OutboxResult};
use crate::model::{Headers, OutboxMessage, Payload};
use crate::repository::OutboxRepository;

/// Maps an event type to a destination topic. Defaults to the fully-qualified event type
/// name; callers may override with a custom mapping (e.g. grouping several event types
/// onto one topic for a consumer that wants a single subscription).
pub trait TopicResolver: Send + Sync {
    fn resolve(&self, event_type: &str) -> String;
}

/// Default topic policy: the event type name, unchanged.
pub struct IdentityTopicResolver;

impl TopicResolver for IdentityTopicResolver {
    fn resolve(&self, event_type: &str) -> String {
        event_type.to_string()
    }
}

/// Drains an aggregate's events and appends one [`OutboxMessage`] per event, inside the
/// business transaction supplied by the caller.
pub struct Enqueuer<R: OutboxRepository> {
    repository: std::sync::Arc<R>,
    clock: std::sync::Arc<dyn Clock>,
    topic_resolver: std::sync::Arc<dyn TopicResolver>,
}

impl<R: OutboxRepository> Enqueuer<R> {
    pub fn new(repository: std::sync::Arc<R>, clock: std::sync::Arc<dyn Clock>) -> Self {
        Self {
            repository,
            clock,
            topic_resolver: std::sync::Arc::new(IdentityTopicResolver),
        }
    }

    pub fn with_topic_resolver(
        repository: std::sync::Arc<R>,
        clock: std::sync::Arc<dyn Clock>,
        topic_resolver: std::sync::Arc<dyn TopicResolver>,
    ) -> Self {
        Self {
            repository,
            clock,
            topic_resolver,
        }
    }

    /// Drain `aggregate`'s events (calling `pull_domain_events` exactly once) and build
    /// one [`OutboxMessage`] per event, in recording order. Pure and DB-free: the
    /// transactional `append` step is a thin wrapper around this plus a repository call
    /// (see [`Self::publish_from`]), kept separate so the message-building policy can be
    /// unit tested without a live database connection.
    pub fn build_messages(
        &self,
        aggregate: &mut impl Aggregate,
        context: &impl ContextProvider,
    ) -> OutboxResult<Vec<OutboxMessage>> {
        let coords = aggregate.coords();
        aggregate
            .pull_domain_events()
            .into_iter()
            .map(|event| self.build_message(&coords.aggregate_type, &coords.aggregate_id, event, context))
            .collect()
    }

    /// Drain `aggregate`'s events and append one outbox row per event inside `tx`. An
    /// aggregate with no buffered events produces no rows. The caller commits `tx`
    /// alongside its own business mutation; on rollback none of the appended rows become
    /// visible.
    pub async fn publish_from(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        aggregate: &mut impl Aggregate,
        context: &impl ContextProvider,
    ) -> OutboxResult<Vec<uuid::Uuid>> {
        let messages = self.build_messages(aggregate, context)?;
        let mut ids = Vec::with_capacity(messages.len());

        for message in &messages {
            self.repository
                .append(tx, message)
                .await
                .map_err(|e| OutboxError::EnqueueFailure(e.to_string()))?;
            ids.push(message.id);
        }

        Ok(ids)
    }

    fn build_message(
        &self,
        aggregate_type: &str,
        aggregate_id: &str,
        event: DomainEvent,
        context: &impl ContextProvider,
    ) -> OutboxResult<OutboxMessage> {
        let topic = self.topic_resolver.resolve(&event.event_type);
        let bytes = event.to_json_bytes()?;

        let mut headers: Headers = Headers::new();
        if let Some(v) = context.correlation_id().or(event.metadata.correlation_id.clone()) {
            headers.insert("correlation_id".to_string(), v);
        }
        if let Some(v) = context.causation_id().or(event.metadata.causation_id.clone()) {
            headers.insert("causation_id".to_string(), v);
        }
        if let Some(v) = context.tenant_id().or(event.metadata.tenant_id.clone()) {
            headers.insert("tenant_id".to_string(), v);
        }
        if let Some(v) = context.actor() {
            headers.insert("actor".to_string(), v);
        }
        for (k, v) in &event.metadata.attributes {
            headers.insert(k.clone(), v.clone());
        }

        Ok(OutboxMessage::new(
            aggregate_type,
            aggregate_id,
            event.event_type,
            topic,
            Payload::json(bytes),
            headers,
            self.clock.now(),
            Some(aggregate_id.to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::context::{AggregateCoords, EventMetadata, NoContext};
    use crate::testkit::InMemoryOutboxRepository;
    use std::sync::Arc;

    struct Order {
        id: String,
        events: crate::context::DomainEventBuffer,
    }

    impl Aggregate for Order {
        fn coords(&self) -> AggregateCoords {
            AggregateCoords {
                aggregate_type: "Order".to_string(),
                aggregate_id: self.id.clone(),
            }
        }

        fn pull_domain_events(&mut self) -> Vec<DomainEvent> {
            self.events.drain()
        }
    }

    fn order_with_events(id: &str, event_types: &[&str]) -> Order {
        let mut order = Order {
            id: id.to_string(),
            events: crate::context::DomainEventBuffer::new(),
        };
        for et in event_types {
            order.events.record(
                DomainEvent::new(
                    *et,
                    EventMetadata::default(),
                    serde_json::json!({"order_id": id}),
                )
                .unwrap(),
            );
        }
        order
    }

    #[test]
    fn empty_event_sequence_produces_no_rows() {
        let repo = Arc::new(InMemoryOutboxRepository::new());
        let enqueuer = Enqueuer::new(repo, Arc::new(SystemClock));
        let mut order = order_with_events("o1", &[]);

        let messages = enqueuer.build_messages(&mut order, &NoContext).unwrap();
        assert!(messages.is_empty());
    }

    #[test]
    fn preserves_enqueue_order_within_an_aggregate() {
        let repo = Arc::new(InMemoryOutboxRepository::new());
        let enqueuer = Enqueuer::new(repo, Arc::new(SystemClock));
        let mut order = order_with_events("o1", &["OrderCreated", "OrderLineAdded"]);

        let messages = enqueuer.build_messages(&mut order, &NoContext).unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].event_type, "OrderCreated");
        assert_eq!(messages[1].event_type, "OrderLineAdded");
        assert!(messages[0].created_at <= messages[1].created_at);
    }

    #[test]
    fn merges_context_and_event_metadata_into_headers() {
        struct FixedContext;
        impl ContextProvider for FixedContext {
            fn correlation_id(&self) -> Option<String> {
                Some("corr-1".to_string())
            }
            fn tenant_id(&self) -> Option<String> {
                Some("tenant-1".to_string())
            }
        }

        let repo = Arc::new(InMemoryOutboxRepository::new());
        let enqueuer = Enqueuer::new(repo, Arc::new(SystemClock));
        let mut order = order_with_events("o1", &["OrderCreated"]);

        let messages = enqueuer.build_messages(&mut order, &FixedContext).unwrap();
        let headers = &messages[0].headers;
        assert_eq!(headers.get("correlation_id"), Some(&"corr-1".to_string()));
        assert_eq!(headers.get("tenant_id"), Some(&"tenant-1".to_string()));
    }
}
