//! Prometheus metrics (component C5). Registered once per service instance against the
//! process-wide default registry, const-labelled by service name the same way the rest of
//! the workspace's metrics structs do.

use prometheus::{CounterVec, HistogramVec, IntGauge, Opts};
use tracing::warn;

#[derive(Clone)]
pub struct OutboxMetrics {
    pub pending: IntGauge,
    pub published_total: CounterVec,
    pub failed_total: CounterVec,
    pub dead_total: CounterVec,
    pub publish_latency_seconds: HistogramVec,
    pub batch_duration_seconds: HistogramVec,
}

impl OutboxMetrics {
    pub fn new(service: &str) -> Self {
        let registry = prometheus::default_registry();

        let pending = IntGauge::with_opts(
            Opts::new(
                "outbox_pending_count",
                "Number of unpublished outbox events currently pending",
            )
            .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for outbox_pending_count");

        let published_total = CounterVec::new(
            Opts::new(
                "outbox_published_total",
                "Total number of outbox events marked as published",
            )
            .const_label("service", service.to_string()),
            &["topic"],
        )
        .expect("valid metric opts for outbox_published_total");

        let failed_total = CounterVec::new(
            Opts::new(
                "outbox_failed_total",
                "Total number of outbox publish attempts that failed and were scheduled for retry",
            )
            .const_label("service", service.to_string()),
            &["topic", "reason"],
        )
        .expect("valid metric opts for outbox_failed_total");

        let dead_total = CounterVec::new(
            Opts::new(
                "outbox_dead_total",
                "Total number of outbox events moved to the dead letter status",
            )
            .const_label("service", service.to_string()),
            &["topic"],
        )
        .expect("valid metric opts for outbox_dead_total");

        let publish_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "outbox_publish_latency_seconds",
                "Latency of a single publish call to the broker",
            )
            .const_label("service", service.to_string()),
            &["topic"],
        )
        .expect("valid metric opts for outbox_publish_latency_seconds");

        let batch_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "outbox_batch_duration_seconds",
                "Wall-clock duration of a single processor tick",
            )
            .const_label("service", service.to_string()),
            &["leased"],
        )
        .expect("valid metric opts for outbox_batch_duration_seconds");

        for metric in [
            Box::new(pending.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(published_total.clone()),
            Box::new(failed_total.clone()),
            Box::new(dead_total.clone()),
            Box::new(publish_latency_seconds.clone()),
            Box::new(batch_duration_seconds.clone()),
        ] {
            if let Err(e) = registry.register(metric) {
                warn!("failed to register outbox metric: {}", e);
            }
        }

        Self {
            pending,
            published_total,
            failed_total,
            dead_total,
            publish_latency_seconds,
            batch_duration_seconds,
        }
    }

    pub fn record_published(&self, topic: &str) {
        self.published_total.with_label_values(&[topic]).inc();
    }

    pub fn record_failed(&self, topic: &str, reason: &str) {
        self.failed_total.with_label_values(&[topic, reason]).inc();
    }

    pub fn record_dead(&self, topic: &str) {
        self.dead_total.with_label_values(&[topic]).inc();
    }

    pub fn record_latency(&self, topic: &str, elapsed: chrono::Duration) {
        let seconds = elapsed.num_milliseconds().max(0) as f64 / 1000.0;
        self.publish_latency_seconds
            .with_label_values(&[topic])
            .observe(seconds);
    }

    pub fn record_batch_processing(&self, leased: u32, elapsed: chrono::Duration) {
        let seconds = elapsed.num_milliseconds().max(0) as f64 / 1000.0;
        self.batch_duration_seconds
            .with_label_values(&[&leased.to_string()])
            .observe(seconds);
    }

    pub fn set_pending(&self, count: i64) {
        self.pending.set(count);
    }
}
