//! The `OutboundPublisher` contract (consumed collaborator, §6) and the default
//! Kafka-backed implementation.

use async_trait::async_trait;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use std::time::Duration;
use tracing::info;

use crate::model::OutboxMessage;

/// Publishes a single outbox message to the external broker.
///
/// Takes the whole [`OutboxMessage`] rather than unpacking topic/payload/headers/partition
/// key into separate parameters, so implementations can read whichever fields they need.
/// Implementations should be idempotent toward the broker — retries are expected.
#[async_trait]
pub trait OutboundPublisher: Send + Sync {
    async fn publish(&self, message: &OutboxMessage) -> Result<(), String>;
}

/// Kafka-based [`OutboundPublisher`].
///
/// The producer MUST be configured with `enable.idempotence = true` and `acks = all` so
/// the at-least-once delivery the engine already provides isn't undermined by a
/// non-idempotent producer silently duplicating retried sends.
pub struct KafkaOutboundPublisher {
    producer: FutureProducer,
    publish_timeout: Duration,
}

impl KafkaOutboundPublisher {
    pub fn new(producer: FutureProducer) -> Self {
        Self {
            producer,
            publish_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(producer: FutureProducer, publish_timeout: Duration) -> Self {
        Self {
            producer,
            publish_timeout,
        }
    }
}

#[async_trait]
impl OutboundPublisher for KafkaOutboundPublisher {
    async fn publish(&self, message: &OutboxMessage) -> Result<(), String> {
        let mut headers = OwnedHeaders::new().insert(Header {
            key: "event_type",
            value: Some(message.event_type.as_bytes()),
        });

        let event_id_str = message.id.to_string();
        headers = headers.insert(Header {
            key: "event_id",
            value: Some(event_id_str.as_bytes()),
        });
        headers = headers.insert(Header {
            key: "aggregate_type",
            value: Some(message.aggregate_type.as_bytes()),
        });
        headers = headers.insert(Header {
            key: "content_type",
            value: Some(message.payload.content_type.as_bytes()),
        });

        for (k, v) in &message.headers {
            headers = headers.insert(Header {
                key: k,
                value: Some(v.as_bytes()),
            });
        }

        let partition_key = message
            .partition_key
            .clone()
            .unwrap_or_else(|| message.aggregate_id.clone());

        let record = FutureRecord::to(&message.topic)
            .key(&partition_key)
            .payload(&message.payload.bytes)
            .headers(headers);

        self.producer
            .send(record, self.publish_timeout)
            .await
            .map_err(|(err, _)| err.to_string())?;

        info!(
            message_id = %message.id,
            topic = %message.topic,
            "message published to kafka"
        );
        Ok(())
    }
}
