//! Outbox sync queue: durable pending orders and the drain that delivers them.
//!
//! Drains are serialized by a single lock, so the retry bookkeeping of an
//! item is never mutated by two passes at once. Each item is attempted inside
//! its own failure boundary; one failure never aborts the batch.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::OutboxSettings;
use crate::domain::entities::{OrderPayload, OutboxItem};
use crate::domain::types::OutboxStatus;

use super::network::OrderEndpoint;
use super::notify::{Notifier, ServerEvent};
use super::repos::{OutboxError, OutboxRepo};

const METRIC_DELIVERED: &str = "outpost_outbox_delivered_total";
const METRIC_FAILED: &str = "outpost_outbox_failed_total";
const METRIC_PENDING: &str = "outpost_outbox_pending";
const METRIC_SYNC_MS: &str = "outpost_sync_duration_ms";

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            backoff_base: Duration::from_secs(15),
            backoff_max: Duration::from_secs(15 * 60),
        }
    }
}

impl From<&OutboxSettings> for RetryPolicy {
    fn from(settings: &OutboxSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.get(),
            backoff_base: settings.backoff_base,
            backoff_max: settings.backoff_max,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempts + 1`, given `attempts` failures so far.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(16);
        self.backoff_base
            .saturating_mul(1_u32 << exponent)
            .min(self.backoff_max)
    }
}

/// Aggregate outcome of one drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DrainReport {
    pub succeeded: usize,
    pub failed: usize,
    pub total: usize,
    /// Items whose retry budget ran out during this pass.
    pub parked: usize,
}

/// What started a drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainTrigger {
    /// Background-sync signal or operator command. Connectivity is known to be
    /// back, so retry deadlines are ignored.
    Signal,
    /// Fallback timer. Only items past their retry deadline are attempted.
    Timer,
}

pub struct OutboxQueue {
    repo: Arc<dyn OutboxRepo>,
    endpoint: Arc<dyn OrderEndpoint>,
    notifier: Notifier,
    policy: RetryPolicy,
    drain_lock: Mutex<()>,
}

impl OutboxQueue {
    pub fn new(
        repo: Arc<dyn OutboxRepo>,
        endpoint: Arc<dyn OrderEndpoint>,
        notifier: Notifier,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            repo,
            endpoint,
            notifier,
            policy,
            drain_lock: Mutex::new(()),
        }
    }

    /// Append a new pending order.
    pub async fn enqueue(&self, payload: OrderPayload) -> Result<OutboxItem, OutboxError> {
        let item = OutboxItem::new(payload);
        self.repo.append(&item).await?;
        gauge!(METRIC_PENDING).increment(1.0);
        info!(order_id = %item.id, items = item.payload.items.len(), "Order queued");
        Ok(item)
    }

    /// Items still owned by the queue (pending, in flight or parked).
    pub async fn list(&self) -> Result<Vec<OutboxItem>, OutboxError> {
        let items = self.repo.load_all().await?;
        Ok(items
            .into_iter()
            .filter(|item| item.status != OutboxStatus::Delivered)
            .collect())
    }

    /// Give a parked item a fresh retry budget.
    pub async fn retry(&self, id: &str) -> Result<OutboxItem, OutboxError> {
        let _guard = self.drain_lock.lock().await;
        let mut item = self
            .repo
            .load_all()
            .await?
            .into_iter()
            .find(|item| item.id == id)
            .ok_or_else(|| OutboxError::NotFound(id.to_string()))?;
        if item.resubmit() {
            self.repo.save(&item).await?;
            info!(order_id = %item.id, "Parked order resubmitted");
        }
        Ok(item)
    }

    /// Attempt delivery of every pending item, one at a time.
    pub async fn drain(&self) -> Result<DrainReport, OutboxError> {
        self.drain_with(DrainTrigger::Signal).await
    }

    pub async fn drain_with(&self, trigger: DrainTrigger) -> Result<DrainReport, OutboxError> {
        let _guard = self.drain_lock.lock().await;
        let started = Instant::now();

        let items = match self.repo.load_all().await {
            Ok(items) => items,
            Err(err) => {
                warn!(error = %err, "Outbox unreadable; drain aborted");
                self.notifier.broadcast(ServerEvent::SyncFailed {
                    error: err.to_string(),
                });
                return Err(err);
            }
        };

        let now = OffsetDateTime::now_utc();
        let mut due = Vec::new();
        let mut outstanding = 0_usize;
        for mut item in items {
            if item.status == OutboxStatus::Delivered {
                self.purge_delivered(&item).await;
                continue;
            }
            outstanding += 1;
            if item.recover_interrupted() {
                debug!(order_id = %item.id, "Recovered interrupted delivery attempt");
                if let Err(err) = self.repo.save(&item).await {
                    warn!(order_id = %item.id, error = %err, "Failed to persist recovered order");
                }
            }
            let eligible = match trigger {
                DrainTrigger::Signal => item.status == OutboxStatus::Pending,
                DrainTrigger::Timer => item.is_due(now),
            };
            if eligible {
                due.push(item);
            }
        }

        let mut report = DrainReport {
            total: due.len(),
            ..DrainReport::default()
        };
        self.notifier
            .broadcast(ServerEvent::SyncStarted { pending: due.len() });

        for item in due {
            match self.attempt(item).await {
                Attempt::Delivered => report.succeeded += 1,
                Attempt::Retrying => report.failed += 1,
                Attempt::Parked => {
                    report.failed += 1;
                    report.parked += 1;
                }
            }
        }

        gauge!(METRIC_PENDING).set(outstanding.saturating_sub(report.succeeded) as f64);
        histogram!(METRIC_SYNC_MS).record(started.elapsed().as_secs_f64() * 1000.0);
        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            total = report.total,
            parked = report.parked,
            trigger = ?trigger,
            "Outbox drain completed"
        );
        self.notifier.broadcast(ServerEvent::SyncCompleted {
            succeeded: report.succeeded,
            failed: report.failed,
            total: report.total,
        });
        Ok(report)
    }

    /// Degraded trigger: drain once after `delay`.
    pub fn schedule_drain(self: &Arc<Self>, delay: Duration) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = queue.drain_with(DrainTrigger::Timer).await {
                warn!(error = %err, "Scheduled outbox drain failed");
            }
        });
    }

    async fn attempt(&self, mut item: OutboxItem) -> Attempt {
        if let Err(err) = item.begin_attempt() {
            warn!(order_id = %item.id, error = %err, "Skipping outbox item");
            return Attempt::Retrying;
        }
        if let Err(err) = self.repo.save(&item).await {
            warn!(order_id = %item.id, error = %err, "Failed to persist in-flight marker");
        }

        match self.endpoint.submit(&item).await {
            Ok(()) => {
                self.complete(item).await;
                Attempt::Delivered
            }
            Err(err) => {
                counter!(METRIC_FAILED).increment(1);
                let retry_at = OffsetDateTime::now_utc()
                    + self.policy.backoff(item.attempt_count.saturating_add(1));
                let status = match item.record_failure(err.to_string(), self.policy.max_attempts, retry_at) {
                    Ok(status) => status,
                    Err(invariant) => {
                        warn!(order_id = %item.id, error = %invariant, "Outbox item left inconsistent");
                        return Attempt::Retrying;
                    }
                };
                if let Err(save_err) = self.repo.save(&item).await {
                    warn!(order_id = %item.id, error = %save_err, "Failed to persist attempt outcome");
                }

                if status == OutboxStatus::Failed {
                    warn!(
                        order_id = %item.id,
                        attempts = item.attempt_count,
                        error = %err,
                        "Order parked after exhausting retries"
                    );
                    Attempt::Parked
                } else {
                    debug!(
                        order_id = %item.id,
                        attempts = item.attempt_count,
                        error = %err,
                        "Order delivery failed; will retry"
                    );
                    Attempt::Retrying
                }
            }
        }
    }

    async fn complete(&self, mut item: OutboxItem) {
        counter!(METRIC_DELIVERED).increment(1);
        if let Err(err) = item.mark_delivered() {
            warn!(order_id = %item.id, error = %err, "Unexpected state after delivery");
        }
        match self.repo.remove(&item.id).await {
            Ok(_) => {}
            Err(err) => {
                // Persist the delivered marker so the next drain purges it
                // instead of resubmitting.
                warn!(order_id = %item.id, error = %err, "Failed to remove delivered order");
                if let Err(err) = self.repo.save(&item).await {
                    warn!(order_id = %item.id, error = %err, "Failed to mark order delivered");
                }
            }
        }
        info!(order_id = %item.id, "Order synced");
        self.notifier
            .broadcast(ServerEvent::OrderSynced { order_id: item.id });
    }

    async fn purge_delivered(&self, item: &OutboxItem) {
        if let Err(err) = self.repo.remove(&item.id).await {
            warn!(order_id = %item.id, error = %err, "Failed to purge delivered order");
        }
    }
}

enum Attempt {
    Delivered,
    Retrying,
    Parked,
}
