//! End-to-end state machine tests driven entirely through the in-memory test doubles, no
//! database or broker required.

use std::sync::Arc;

use chrono::Utc;
use outbox_engine::{
    Aggregate, AggregateCoords, DomainEvent, DomainEventBuffer, EventMetadata, Enqueuer,
    NoContext, OutboxConfig, OutboxProcessor, OutboxRepository, OutboxStatus, SystemClock,
};
use outbox_engine::testkit::{FixedClock, InMemoryOutboxRepository, RecordingPublisher};

struct Order {
    id: String,
    events: DomainEventBuffer,
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

fn test_config() -> OutboxConfig {
    OutboxConfig {
        batch_size: 10,
        max_attempts: 3,
        backoff_multiplier: 2.0,
        ..OutboxConfig::default()
    }
}

#[tokio::test]
async fn enqueue_then_process_reaches_published() {
    let repo = Arc::new(InMemoryOutboxRepository::new());
    let clock = Arc::new(FixedClock::new(Utc::now()));
    let enqueuer = Enqueuer::new(repo.clone(), Arc::new(SystemClock));

    let mut order = Order {
        id: "order-42".to_string(),
        events: DomainEventBuffer::new(),
    };
    order.events.record(
        DomainEvent::new(
            "OrderCreated",
            EventMetadata::default(),
            serde_json::json!({ "order_id": "order-42" }),
        )
        .unwrap(),
    );

    let messages = enqueuer.build_messages(&mut order, &NoContext).unwrap();
    assert_eq!(messages.len(), 1);
    let id = messages[0].id;
    repo.seed(messages.into_iter().next().unwrap());

    let publisher = Arc::new(RecordingPublisher::always_ok());
    let processor = OutboxProcessor::new(repo.clone(), publisher, clock, test_config());

    let summary = processor.process_once().await.unwrap();
    assert_eq!(summary.published, 1);

    let stored = repo.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(stored.status, OutboxStatus::Published);
}

#[tokio::test]
async fn fetch_batch_orders_by_created_at_within_an_aggregate() {
    let repo = Arc::new(InMemoryOutboxRepository::new());
    let clock = Arc::new(FixedClock::new(Utc::now()));
    let t0 = clock.now();

    let first = outbox_engine::OutboxMessage::new(
        "Order",
        "order-1",
        "OrderCreated",
        "orders",
        outbox_engine::Payload::json(b"{}".to_vec()),
        outbox_engine::Headers::new(),
        t0,
        Some("order-1".to_string()),
    );
    let second = outbox_engine::OutboxMessage::new(
        "Order",
        "order-1",
        "OrderShipped",
        "orders",
        outbox_engine::Payload::json(b"{}".to_vec()),
        outbox_engine::Headers::new(),
        t0 + chrono::Duration::milliseconds(1),
        Some("order-1".to_string()),
    );
    let first_id = first.id;
    let second_id = second.id;
    // Seed out of order; fetch_batch must still return them by (created_at, id).
    repo.seed(second);
    repo.seed(first);

    let publisher = Arc::new(RecordingPublisher::always_ok());
    let processor = OutboxProcessor::new(repo.clone(), publisher.clone(), clock.clone(), test_config());
    processor.process_once().await.unwrap();

    let first_final = repo.find_by_id(first_id).await.unwrap().unwrap();
    let second_final = repo.find_by_id(second_id).await.unwrap().unwrap();
    assert_eq!(first_final.status, OutboxStatus::Published);
    assert_eq!(second_final.status, OutboxStatus::Published);

    let call_order: Vec<_> = publisher.calls().into_iter().map(|(_, id)| id).collect();
    assert_eq!(call_order, vec![first_id, second_id]);
}

#[tokio::test]
async fn exhausting_retries_dead_letters_and_a_healthy_tail_keeps_moving() {
    let repo = Arc::new(InMemoryOutboxRepository::new());
    let clock = Arc::new(FixedClock::new(Utc::now()));

    let poison = outbox_engine::OutboxMessage::new(
        "Order",
        "order-poison",
        "OrderCreated",
        "orders",
        outbox_engine::Payload::json(b"{}".to_vec()),
        outbox_engine::Headers::new(),
        clock.now(),
        None,
    );
    let poison_id = poison.id;
    repo.seed(poison);

    let publisher = Arc::new(RecordingPublisher::always_failing("permanent failure"));
    let mut config = test_config();
    config.max_attempts = 2;
    let processor = OutboxProcessor::new(repo.clone(), publisher, clock.clone(), config);

    processor.process_once().await.unwrap();
    clock.advance(chrono::Duration::seconds(5));
    processor.process_once().await.unwrap();

    let final_state = repo.find_by_id(poison_id).await.unwrap().unwrap();
    assert_eq!(final_state.status, OutboxStatus::Dead);

    clock.advance(chrono::Duration::seconds(100));
    let summary = processor.process_once().await.unwrap();
    assert_eq!(summary.leased, 0, "dead rows are never re-leased");
}
