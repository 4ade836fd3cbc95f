//! Aggregate event buffer and enqueue-time context (component C3 inputs).
//!
//! The source pattern this replaces is a mutable list drained via a `pullDomainEvents()`
//! call on the aggregate. Java-style designs expose that as hidden mutable state on the
//! aggregate itself; here the buffer is an owned value the aggregate holds, and `drain()`
//! consumes it by value so "drained exactly once" is enforced by ownership rather than by
//! caller discipline.

use std::collections::BTreeMap;

use serde::Serialize;

/// A single domain event recorded by an aggregate, pending translation into an
/// [`crate::model::OutboxMessage`] by the enqueuer.
///
/// The payload is eagerly converted to a `serde_json::Value` at construction time, so the
/// buffer never needs to carry a type parameter or a trait object.
pub struct DomainEvent {
    pub event_type: String,
    pub metadata: EventMetadata,
    payload: serde_json::Value,
}

impl DomainEvent {
    pub fn new(
        event_type: impl Into<String>,
        metadata: EventMetadata,
        payload: impl Serialize,
    ) -> serde_json::Result<Self> {
        Ok(Self {
            event_type: event_type.into(),
            metadata,
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Serialize the event payload to JSON bytes.
    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&self.payload)
    }
}

/// Per-event metadata carried alongside a [`DomainEvent`]; attributes are merged into the
/// outbox message's headers at enqueue time (string-coerced).
#[derive(Debug, Default, Clone)]
pub struct EventMetadata {
    pub correlation_id: Option<String>,
    pub causation_id: Option<String>,
    pub tenant_id: Option<String>,
    pub attributes: BTreeMap<String, String>,
}

/// Owning buffer an aggregate holds to record domain events during a business operation.
///
/// `record` pushes; `drain` consumes the buffer by value, returning its contents and
/// leaving the aggregate holding a fresh, empty buffer. There is no way to observe the
/// same event twice through this type: a second `drain()` call requires a second `&mut`
/// borrow, which only ever sees whatever was recorded since the first drain.
#[derive(Default)]
pub struct DomainEventBuffer {
    events: Vec<DomainEvent>,
}

impl DomainEventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: DomainEvent) {
        self.events.push(event);
    }

    /// Drain all buffered events in recording order, leaving the buffer empty.
    pub fn drain(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Identifies the aggregate a batch of events belongs to.
pub struct AggregateCoords {
    pub aggregate_type: String,
    pub aggregate_id: String,
}

/// An aggregate that can be drained of its pending domain events.
///
/// Implementations own a [`DomainEventBuffer`] and forward to it; `pull_domain_events`
/// must call the buffer's `drain()` exactly once per invocation (it cannot do otherwise,
/// since `drain` takes `&mut self` and empties the buffer as a side effect).
pub trait Aggregate {
    fn coords(&self) -> AggregateCoords;
    fn pull_domain_events(&mut self) -> Vec<DomainEvent>;
}

/// Supplies ambient enqueue-time context (correlation/causation/tenant/actor) without
/// resorting to thread-local storage. Callers construct one per request/use-case and pass
/// it into [`crate::enqueuer::Enqueuer::publish_from`] explicitly.
pub trait ContextProvider: Send + Sync {
    fn correlation_id(&self) -> Option<String> {
        None
    }
    fn causation_id(&self) -> Option<String> {
        None
    }
    fn tenant_id(&self) -> Option<String> {
        None
    }
    fn actor(&self) -> Option<String> {
        None
    }
}

/// A [`ContextProvider`] with no ambient context; useful for tests and batch jobs that
/// have no request-scoped correlation/tenant/actor to carry.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoContext;

impl ContextProvider for NoContext {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_empties_the_buffer() {
        let mut buf = DomainEventBuffer::new();
        buf.record(
            DomainEvent::new(
                "OrderCreated",
                EventMetadata::default(),
                serde_json::json!({"id": "o1"}),
            )
            .unwrap(),
        );
        assert!(!buf.is_empty());

        let drained = buf.drain();
        assert_eq!(drained.len(), 1);
        assert!(buf.is_empty());

        // A second drain on the same buffer sees nothing new.
        assert!(buf.drain().is_empty());
    }

    #[test]
    fn events_serialize_to_json() {
        let event = DomainEvent::new(
            "OrderCreated",
            EventMetadata::default(),
            serde_json::json!({"id": "o1"}),
        )
        .unwrap();
        let bytes = event.to_json_bytes().unwrap();
        assert_eq!(bytes, br#"{"id":"o1"}"#);
    }
}
