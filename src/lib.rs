//! # Transactional Outbox Engine
//!
//! This library implements the Transactional Outbox pattern to ensure reliable event
//! publishing in microservices architectures. It guarantees that database writes and event
//! publishing happen atomically, preventing data inconsistencies.
//!
//! ## What is the Transactional Outbox pattern?
//!
//! 1. Business logic changes (database writes) and event creation happen in the same
//!    transaction.
//! 2. Events are stored in an "outbox" table within the same database.
//! 3. A background processor leases unpublished rows and publishes them to a broker.
//! 4. Rows are marked PUBLISHED only after a successful broker send, and DEAD once retries
//!    are exhausted.
//!
//! This guarantees **at-least-once delivery** and prevents event loss even if the service
//! crashes after commit but before publish, the broker is temporarily unavailable, or a
//! network partition occurs. Consumers are expected to deduplicate by message id.
//!
//! ## Usage
//!
//! ### 1. Record domain events and enqueue them in the same transaction
//!
//! ```rust,no_run
//! use outbox_engine::{Aggregate, AggregateCoords, DomainEvent, DomainEventBuffer, EventMetadata};
//! use outbox_engine::{Enqueuer, NoContext, SqlxOutboxRepository};
//! use sqlx::PgPool;
//!
//! struct Order {
//!     id: String,
//!     events: DomainEventBuffer,
//! }
//!
//! impl Aggregate for Order {
//!     fn coords(&self) -> AggregateCoords {
//!         AggregateCoords { aggregate_type: "Order".into(), aggregate_id: self.id.clone() }
//!     }
//!
//!     fn pull_domain_events(&mut self) -> Vec<DomainEvent> {
//!         self.events.drain()
//!     }
//! }
//!
//! async fn create_order(pool: &PgPool, enqueuer: &Enqueuer<SqlxOutboxRepository>) -> anyhow::Result<()> {
//!     let mut order = Order { id: "order-1".into(), events: DomainEventBuffer::new() };
//!     order.events.record(DomainEvent::new(
//!         "OrderCreated",
//!         EventMetadata::default(),
//!         serde_json::json!({ "order_id": order.id }),
//!     )?);
//!
//!     let mut tx = pool.begin().await?;
//!     // ... insert the order's own row(s) against `tx` here ...
//!
//!     enqueuer.publish_from(&mut tx, &mut order, &NoContext).await?;
//!
//!     tx.commit().await?;
//!     Ok(())
//! }
//! ```
//!
//! ### 2. Run the background processor
//!
//! ```rust,no_run
//! use outbox_engine::{OutboxConfig, OutboxProcessor, SqlxOutboxRepository, KafkaOutboundPublisher, SystemClock};
//! use rdkafka::producer::FutureProducer;
//! use rdkafka::ClientConfig;
//! use sqlx::PgPool;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pool = PgPool::connect("postgresql://localhost/mydb").await?;
//!
//!     let producer: FutureProducer = ClientConfig::new()
//!         .set("bootstrap.servers", "localhost:9092")
//!         .set("enable.idempotence", "true")
//!         .set("acks", "all")
//!         .set("max.in.flight.requests.per.connection", "5")
//!         .create()?;
//!
//!     let repository = Arc::new(SqlxOutboxRepository::new(pool));
//!     let publisher = Arc::new(KafkaOutboundPublisher::new(producer));
//!     let config = OutboxConfig::load()?;
//!
//!     let processor = Arc::new(OutboxProcessor::new(
//!         repository,
//!         publisher,
//!         Arc::new(SystemClock),
//!         config,
//!     ));
//!     let handle = processor.start();
//!     handle.await?;
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod health;
pub mod metrics;
pub mod model;
pub mod processor;
pub mod publisher;
pub mod repository;
pub mod testkit;

mod enqueuer;

pub use clock::{Clock, SystemClock};
pub use config::OutboxConfig;
pub use context::{Aggregate, AggregateCoords, ContextProvider, DomainEvent, DomainEventBuffer, EventMetadata, NoContext};
pub use enqueuer::{Enqueuer, IdentityTopicResolver, TopicResolver};
pub use error::{OutboxError, OutboxResult};
pub use health::{evaluate as evaluate_health, Health, StatusCounts};
pub use metrics::OutboxMetrics;
pub use model::{Headers, OutboxMessage, OutboxStatus, Payload};
pub use processor::{BatchSummary, OutboxProcessor};
pub use publisher::{KafkaOutboundPublisher, OutboundPublisher};
pub use repository::{OutboxRepository, SqlxOutboxRepository, DEFAULT_LEASE_DURATION};
