//! Wiring: config → sinks, worker pools, sources → orchestrator

use crate::config::{AppConfig, ConsumerConfig, SinkTarget, SourceConfig};
use crate::error::{AppError, Result};
use crate::orchestrator::{Orchestrator, RunSettings, Source};
use siphon_delivery::{
    BmonAdapter, DurableQueue, HttpPoster, JsonRecordsAdapter, LastPostMarker, Sink, SinkAdapter,
    WorkerPool,
};
use siphon_ingest::ProgressTracker;
use std::collections::HashSet;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// A running siphon instance
pub struct App {
    orchestrator: Orchestrator,
    pools: Vec<WorkerPool>,
}

impl App {
    /// Open the tracker, start a worker pool per valid consumer and collect valid sources.
    ///
    /// Invalid consumers and sources are logged and left out, as is a consumer reusing an
    /// earlier consumer's `poster_id`. Must be called inside a Tokio runtime; workers stop
    /// when `cancel` fires.
    pub fn build(config: &AppConfig, run_once: bool, cancel: &CancellationToken) -> Self {
        let tracker = ProgressTracker::load(config.progress_path());
        let state_dir = config.state_dir();

        let mut sinks = Vec::new();
        let mut pools = Vec::new();
        let mut poster_ids = HashSet::new();
        for (idx, entry) in config.consumers.iter().enumerate() {
            let unknown = ConsumerConfig::unknown_keys(entry);
            if !unknown.is_empty() {
                warn!(consumer = idx, keys = ?unknown, "Ignoring unknown consumer keys");
            }

            let built = ConsumerConfig::from_value(entry).and_then(|consumer| {
                if poster_ids.contains(&consumer.poster_id) {
                    return Err(AppError::config(format!(
                        "poster_id '{}' is already used by another consumer",
                        consumer.poster_id
                    )));
                }
                let built = build_sink(&consumer, &state_dir, cancel)?;
                poster_ids.insert(consumer.poster_id);
                Ok(built)
            });
            match built {
                Ok((sink, pool)) => {
                    sinks.push(sink);
                    pools.push(pool);
                },
                Err(e) => error!(consumer = idx, error = %e, "Skipping consumer"),
            }
        }

        let mut sources = Vec::new();
        for (idx, entry) in config.csv_files.iter().enumerate() {
            let unknown = SourceConfig::unknown_keys(entry);
            if !unknown.is_empty() {
                warn!(source = idx, keys = ?unknown, "Ignoring unknown source keys");
            }

            match SourceConfig::from_value(entry) {
                Ok(source) => {
                    sources.push(Source::new(source.file_glob, source.file_type, source.options))
                },
                Err(e) => error!(source = idx, error = %e, "Skipping source"),
            }
        }

        info!(
            sinks = sinks.len(),
            sources = sources.len(),
            tracked_files = tracker.len(),
            "Siphon configured"
        );

        let settings = RunSettings {
            check_interval: config.check_interval(),
            run_once: run_once || config.run_once,
            run_once_wait: config.run_once_wait(),
        };

        Self {
            orchestrator: Orchestrator::new(sources, sinks, tracker, settings),
            pools,
        }
    }

    /// Poll until one-shot completion or `cancel`, then stop the workers and save progress.
    pub async fn run(mut self, cancel: &CancellationToken) -> Result<()> {
        self.orchestrator.run(cancel).await;

        for pool in self.pools {
            pool.shutdown().await;
        }

        self.orchestrator.tracker().persist()?;
        info!("Siphon stopped");
        Ok(())
    }
}

fn build_sink(
    consumer: &ConsumerConfig,
    state_dir: &Path,
    cancel: &CancellationToken,
) -> Result<(Sink, WorkerPool)> {
    let adapter: Box<dyn SinkAdapter> = match &consumer.target {
        SinkTarget::Bmon { bmon_store_key, .. } => Box::new(BmonAdapter::new(bmon_store_key)),
        SinkTarget::Json { .. } => Box::new(JsonRecordsAdapter),
    };

    let worker_config = consumer.worker_config();
    let poster = HttpPoster::new(consumer.target.url(), worker_config.timeout)?;
    let queue = DurableQueue::open(state_dir.join(format!("{}.db", consumer.poster_id)))?;
    let marker = LastPostMarker::new(state_dir.join(format!("{}.last_post", consumer.poster_id)));

    let backlog = queue.len()?;
    if backlog > 0 {
        info!(sink = %consumer.poster_id, items = backlog, "Resuming with queued items");
    }

    let pool = WorkerPool::spawn(
        &consumer.poster_id,
        consumer.workers,
        queue.clone(),
        poster,
        Some(marker),
        &worker_config,
        cancel,
    );
    let sink = Sink::new(consumer.poster_id.clone(), adapter, queue);
    Ok((sink, pool))
}
