//! Post workers
//!
//! A worker leases one item at a time and keeps posting it until the sink accepts it,
//! sleeping with bounded exponential backoff between attempts. There is no retry limit:
//! an outage only delays delivery.

use crate::backoff::{Backoff, DEFAULT_RETRY_BASE_SECS, DEFAULT_RETRY_MAX_SECS};
use crate::client::{HttpPoster, DEFAULT_TIMEOUT_SECS};
use crate::marker::LastPostMarker;
use crate::queue::{DurableQueue, QueueItem};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument, Span};

/// Pause after the queue itself fails before trying to lease again
const LEASE_ERROR_DELAY: Duration = Duration::from_secs(5);

/// Timing knobs shared by all workers of a sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Per-request timeout
    pub timeout: Duration,
    /// First retry delay
    pub retry_base: Duration,
    /// Longest retry delay
    pub retry_max: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry_base: Duration::from_secs(DEFAULT_RETRY_BASE_SECS),
            retry_max: Duration::from_secs(DEFAULT_RETRY_MAX_SECS),
        }
    }
}

/// Live counters for one worker
#[derive(Debug, Default)]
pub struct WorkerStats {
    attempts: AtomicU64,
    failures: AtomicU64,
    acks: AtomicU64,
}

/// Point-in-time copy of [`WorkerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub attempts: u64,
    pub failures: u64,
    pub acks: u64,
}

impl WorkerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            acks: self.acks.load(Ordering::Relaxed),
        }
    }
}

impl std::ops::Add for StatsSnapshot {
    type Output = StatsSnapshot;

    fn add(self, rhs: Self) -> Self {
        StatsSnapshot {
            attempts: self.attempts + rhs.attempts,
            failures: self.failures + rhs.failures,
            acks: self.acks + rhs.acks,
        }
    }
}

pub struct PostWorker {
    queue: DurableQueue,
    poster: HttpPoster,
    marker: Option<LastPostMarker>,
    backoff: Backoff,
    stats: Arc<WorkerStats>,
    span: Span,
}

impl PostWorker {
    pub fn new(
        sink: &str,
        id: usize,
        queue: DurableQueue,
        poster: HttpPoster,
        marker: Option<LastPostMarker>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            queue,
            poster,
            marker,
            backoff: Backoff::new(config.retry_base, config.retry_max),
            stats: Arc::new(WorkerStats::default()),
            span: tracing::info_span!("worker", sink = %sink, worker = id),
        }
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    /// Drain the queue until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        let span = self.span.clone();
        async move {
            debug!(url = %self.poster.url(), "Worker started");
            loop {
                let item = match self.queue.lease(&cancel).await {
                    Ok(Some(item)) => item,
                    Ok(None) => break,
                    Err(e) => {
                        error!(error = %e, "Failed to lease from queue");
                        let cancelled = tokio::select! {
                            _ = cancel.cancelled() => true,
                            _ = tokio::time::sleep(LEASE_ERROR_DELAY) => false,
                        };
                        if cancelled {
                            break;
                        }
                        continue;
                    },
                };

                if !self.deliver(item, &cancel).await {
                    break;
                }
            }
            debug!(stats = ?self.stats.snapshot(), "Worker stopped");
        }
        .instrument(span)
        .await
    }

    /// Post `item` until it is accepted. Returns false if cancelled while waiting to retry.
    async fn deliver(&mut self, item: QueueItem, cancel: &CancellationToken) -> bool {
        loop {
            self.stats.attempts.fetch_add(1, Ordering::Relaxed);
            debug!(
                item = item.id,
                body = %String::from_utf8_lossy(&item.payload),
                "Posting payload"
            );

            match self.poster.post(&item.payload).await {
                Ok(status) => {
                    match self.queue.ack(item.id) {
                        Ok(()) => {
                            self.stats.acks.fetch_add(1, Ordering::Relaxed);
                        },
                        Err(e) => {
                            error!(item = item.id, error = %e, "Posted but failed to ack; item will be sent again after restart");
                        },
                    }
                    if let Some(marker) = &self.marker {
                        marker.touch();
                    }
                    self.backoff.reset();
                    info!(item = item.id, bytes = item.payload.len(), status, "Posted payload");
                    return true;
                },
                Err(e) => {
                    self.stats.failures.fetch_add(1, Ordering::Relaxed);
                    let delay = self.backoff.next_delay();
                    warn!(
                        item = item.id,
                        error = %e,
                        transient = e.is_transient(),
                        retry_in_secs = delay.as_secs_f64(),
                        "Post failed, will retry"
                    );

                    let cancelled = tokio::select! {
                        _ = cancel.cancelled() => true,
                        _ = tokio::time::sleep(delay) => false,
                    };
                    if cancelled {
                        if let Err(e) = self.queue.release(item.id) {
                            warn!(item = item.id, error = %e, "Failed to release item on shutdown");
                        }
                        return false;
                    }
                },
            }
        }
    }
}
