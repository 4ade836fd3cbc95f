//! The background processor (component C4): drives messages from PENDING to PUBLISHED or
//! DEAD under the retry/backoff policy. This is the largest and most load-bearing piece
//! of the engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::OutboxConfig;
use crate::error::OutboxResult;
use crate::metrics::OutboxMetrics;
use crate::publisher::OutboundPublisher;
use crate::repository::OutboxRepository;

/// Summary of a single `process_once` tick, returned for tests and manual invocation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub leased: u32,
    pub published: u32,
    pub retried: u32,
    pub dead_lettered: u32,
    pub skipped_lease_lost: u32,
}

/// Compute the capped exponential backoff delay for the given post-increment attempt
/// count. `attempt` is `attempts` *after* incrementing:
/// `delay(attempt) = min(initialBackoff * multiplier^attempt, maxBackoff)`.
pub fn backoff_delay(config: &OutboxConfig, attempt: u32) -> Duration {
    let base_millis = config.initial_backoff.as_millis() as f64;
    let max_millis = config.max_backoff.as_millis() as f64;

    let raw = base_millis * config.backoff_multiplier.powi(attempt as i32);
    let capped = raw.min(max_millis);

    let delay_millis = if config.backoff_jitter {
        jitter(capped, max_millis)
    } else {
        capped
    };

    Duration::milliseconds(delay_millis.round() as i64)
}

/// Apply +/-10% jitter without ever exceeding `max_millis` (the cap is never crossed).
fn jitter(capped: f64, max_millis: f64) -> f64 {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let factor = rng.gen_range(-0.10..=0.10);
    (capped * (1.0 + factor)).clamp(0.0, max_millis)
}

/// Background processor driving the outbox state machine.
pub struct OutboxProcessor<R: OutboxRepository, P: OutboundPublisher> {
    repository: Arc<R>,
    publisher: Arc<P>,
    clock: Arc<dyn Clock>,
    config: OutboxConfig,
    metrics: Option<OutboxMetrics>,
    stop_signal: Arc<Notify>,
    stopped: Arc<AtomicBool>,
}

impl<R: OutboxRepository + 'static, P: OutboundPublisher + 'static> OutboxProcessor<R, P> {
    pub fn new(
        repository: Arc<R>,
        publisher: Arc<P>,
        clock: Arc<dyn Clock>,
        config: OutboxConfig,
    ) -> Self {
        Self {
            repository,
            publisher,
            clock,
            config,
            metrics: None,
            stop_signal: Arc::new(Notify::new()),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_metrics(mut self, metrics: OutboxMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Begin periodic processing at `config.fixed_delay`, returning a handle `stop()`
    /// will join. Spawned as a cooperative `tokio` task; no external scheduler needed.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        info!(
            batch_size = this.config.batch_size,
            max_attempts = this.config.max_attempts,
            fixed_delay_secs = this.config.fixed_delay.as_secs(),
            "outbox processor starting"
        );

        tokio::spawn(async move {
            loop {
                match this.process_once().await {
                    Ok(summary) if summary.leased > 0 => {
                        info!(?summary, "outbox tick processed a batch");
                    }
                    Ok(_) => debug!("outbox tick found nothing eligible"),
                    Err(e) => error!(error = %e, "outbox tick failed"),
                }

                tokio::select! {
                    _ = tokio::time::sleep(this.config.fixed_delay) => {}
                    _ = this.stop_signal.notified() => {
                        this.stopped.store(true, Ordering::SeqCst);
                        break;
                    }
                }
            }
        })
    }

    /// Signal the running loop to stop and wait up to `config.shutdown_timeout` for it to
    /// actually halt. In-flight publishes that haven't completed by then are left in
    /// PROCESSING; their lease will be reclaimed once it expires (see the repository's
    /// lease-expiry handling).
    pub async fn stop(&self, handle: JoinHandle<()>) {
        self.stop_signal.notify_one();
        let _ = tokio::time::timeout(self.config.shutdown_timeout, handle).await;
    }

    /// Process a single batch: lease eligible rows, publish, and apply the retry/dead
    /// letter policy. Exposed for tests and manual ticks.
    pub async fn process_once(&self) -> OutboxResult<BatchSummary> {
        let tick_started = self.clock.now();
        let mut summary = BatchSummary::default();

        if self.config.batch_size == 0 {
            return Ok(summary);
        }

        let now = self.clock.now();
        let candidates = self.repository.fetch_batch(self.config.batch_size, now).await?;

        for candidate in candidates {
            let leased = self.repository.mark_processing(candidate.id, now).await?;
            if !leased {
                summary.skipped_lease_lost += 1;
                continue;
            }
            summary.leased += 1;

            self.process_leased(&candidate, &mut summary).await;
        }

        if let Some(metrics) = &self.metrics {
            let elapsed = self.clock.now() - tick_started;
            metrics.record_batch_processing(summary.leased, elapsed);
        }

        Ok(summary)
    }

    async fn process_leased(
        &self,
        candidate: &crate::model::OutboxMessage,
        summary: &mut BatchSummary,
    ) {
        let publish_started = self.clock.now();
        let result = self.publisher.publish(candidate).await;
        let elapsed = self.clock.now() - publish_started;

        match result {
            Ok(()) => {
                let now = self.clock.now();
                let attempts = candidate.attempts + 1;
                if let Err(e) = self.repository.mark_published(candidate.id, attempts, now).await {
                    error!(message_id = %candidate.id, error = %e, "failed to mark message published after successful send");
                    return;
                }
                summary.published += 1;
                if let Some(metrics) = &self.metrics {
                    metrics.record_published(&candidate.topic);
                    metrics.record_latency(&candidate.topic, elapsed);
                }
            }
            Err(reason) => {
                let attempts = candidate.attempts + 1;
                let now = self.clock.now();

                if attempts >= self.config.max_attempts {
                    if let Err(e) = self.repository.mark_dead(candidate.id, &reason, attempts, now).await {
                        error!(message_id = %candidate.id, error = %e, "failed to mark message dead");
                        return;
                    }
                    summary.dead_lettered += 1;
                    if let Some(metrics) = &self.metrics {
                        metrics.record_dead(&candidate.topic);
                    }
                    warn!(message_id = %candidate.id, attempts, reason = %reason, "message exhausted retries, dead-lettered");
                } else {
                    let delay = backoff_delay(&self.config, attempts);
                    let next_attempt_at = now + delay;
                    if let Err(e) = self
                        .repository
                        .mark_retryable(candidate.id, &reason, attempts, next_attempt_at, now)
                        .await
                    {
                        error!(message_id = %candidate.id, error = %e, "failed to mark message retryable");
                        return;
                    }
                    summary.retried += 1;
                    if let Some(metrics) = &self.metrics {
                        metrics.record_failed(&candidate.topic, &reason);
                    }
                    warn!(message_id = %candidate.id, attempts, reason = %reason, delay_ms = delay.num_milliseconds(), "message publish failed, scheduled for retry");
                }
            }
        }
    }

    /// Force a message straight to DEAD regardless of attempts remaining. An operator hook,
    /// wired to the CLI's `force-dead` subcommand.
    pub async fn force_dead(&self, id: uuid::Uuid, reason: &str) -> OutboxResult<()> {
        let now = self.clock.now();
        let attempts = self
            .repository
            .find_by_id(id)
            .await?
            .map(|m| m.attempts.max(self.config.max_attempts))
            .unwrap_or(self.config.max_attempts);
        self.repository.mark_dead(id, reason, attempts, now).await
    }
}

/// Placeholder alias kept for readability at call sites; not part of the public contract.
#[allow(dead_code)]
type TickInstant = DateTime<Utc>;
