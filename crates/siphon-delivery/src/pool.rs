//! Fixed-size pool of post workers for one sink

use crate::client::HttpPoster;
use crate::marker::LastPostMarker;
use crate::queue::DurableQueue;
use crate::worker::{PostWorker, StatsSnapshot, WorkerConfig, WorkerStats};
use futures::future::join_all;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub struct WorkerPool {
    sink: String,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    stats: Vec<Arc<WorkerStats>>,
}

impl WorkerPool {
    /// Start `workers` workers (at least one) draining `queue`.
    ///
    /// The pool stops when `parent` is cancelled or on [`WorkerPool::shutdown`].
    /// Must be called from within a Tokio runtime.
    pub fn spawn(
        sink: &str,
        workers: usize,
        queue: DurableQueue,
        poster: HttpPoster,
        marker: Option<LastPostMarker>,
        config: &WorkerConfig,
        parent: &CancellationToken,
    ) -> Self {
        let cancel = parent.child_token();
        let workers = workers.max(1);

        let mut handles = Vec::with_capacity(workers);
        let mut stats = Vec::with_capacity(workers);
        for id in 0..workers {
            let worker = PostWorker::new(
                sink,
                id,
                queue.clone(),
                poster.clone(),
                marker.clone(),
                config,
            );
            stats.push(worker.stats());
            handles.push(tokio::spawn(worker.run(cancel.clone())));
        }
        info!(sink, workers, url = %poster.url(), "Started post workers");

        Self {
            sink: sink.to_string(),
            cancel,
            handles,
            stats,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Counters summed over all workers
    pub fn totals(&self) -> StatsSnapshot {
        self.stats
            .iter()
            .map(|s| s.snapshot())
            .fold(StatsSnapshot::default(), |acc, s| acc + s)
    }

    /// Ask every worker to stop after its current request
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for all workers to finish
    pub async fn join(self) {
        for result in join_all(self.handles).await {
            if let Err(e) = result {
                error!(sink = %self.sink, error = %e, "Post worker panicked");
            }
        }
    }

    /// Cancel and wait
    pub async fn shutdown(self) {
        self.cancel();
        let totals = self.totals();
        let sink = self.sink.clone();
        self.join().await;
        info!(
            sink = %sink,
            attempts = totals.attempts,
            failures = totals.failures,
            acks = totals.acks,
            "Post workers stopped"
        );
    }
}
