//! The poll loop
//!
//! Each cycle walks every source glob, decodes files that changed since their watermark,
//! hands new batches to every sink, and saves the progress tracker. The loop owns the
//! tracker outright; workers only ever see the sinks' queues.

use crate::error::Result;
use siphon_delivery::Sink;
use siphon_ingest::{decode, find_files, DecodeOptions, FileType, ProgressTracker};
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Span};

/// Delay before the next cycle after a cycle failed as a whole
const CYCLE_ERROR_DELAY: Duration = Duration::from_secs(5);

/// How often one-shot mode checks whether the queues have drained
const DRAIN_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// A glob of input files and how to decode them
#[derive(Debug)]
pub struct Source {
    glob: String,
    file_type: FileType,
    options: DecodeOptions,
    span: Span,
}

impl Source {
    pub fn new(glob: impl Into<String>, file_type: FileType, options: DecodeOptions) -> Self {
        let glob = glob.into();
        let span = tracing::info_span!("source", glob = %glob, file_type = %file_type);
        Self {
            glob,
            file_type,
            options,
            span,
        }
    }

    pub fn glob(&self) -> &str {
        &self.glob
    }
}

/// Counters for one poll cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub files_scanned: usize,
    /// Files not modified since their watermark
    pub files_skipped: usize,
    pub batches_enqueued: usize,
    pub records_enqueued: usize,
    /// Files or sources that failed this cycle
    pub errors: usize,
}

/// Loop timing
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub check_interval: Duration,
    pub run_once: bool,
    /// Upper bound on the wait for workers in one-shot mode
    pub run_once_wait: Duration,
}

pub struct Orchestrator {
    sources: Vec<Source>,
    sinks: Vec<Sink>,
    tracker: ProgressTracker,
    settings: RunSettings,
}

impl Orchestrator {
    pub fn new(
        sources: Vec<Source>,
        sinks: Vec<Sink>,
        tracker: ProgressTracker,
        settings: RunSettings,
    ) -> Self {
        Self {
            sources,
            sinks,
            tracker,
            settings,
        }
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    /// Run one cycle over every source, then save progress.
    ///
    /// Failures inside a source or file are logged and counted in the report; only a
    /// failure to save the tracker fails the cycle.
    pub fn poll_cycle(&mut self) -> Result<CycleReport> {
        let mut report = CycleReport::default();
        let Self {
            sources,
            sinks,
            tracker,
            ..
        } = self;

        for source in sources.iter() {
            let _entered = source.span.enter();
            let files = match find_files(&source.glob) {
                Ok(files) => files,
                Err(e) => {
                    error!(error = %e, "Cannot list source files");
                    report.errors += 1;
                    continue;
                },
            };

            for file in files {
                report.files_scanned += 1;
                if let Err(e) = process_file(source, &file, sinks, tracker, &mut report) {
                    error!(file = %file.display(), error = %e, "Failed to process file");
                    report.errors += 1;
                }
            }
        }

        tracker.persist()?;
        Ok(report)
    }

    /// Poll until cancelled, or once in one-shot mode.
    pub async fn run(&mut self, cancel: &CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.poll_cycle() {
                Ok(report) => debug!(?report, "Poll cycle complete"),
                Err(e) => {
                    error!(error = %e, "Poll cycle failed");
                    if sleep_or_cancel(CYCLE_ERROR_DELAY, cancel).await {
                        break;
                    }
                    continue;
                },
            }

            if self.settings.run_once {
                self.wait_for_drain(cancel).await;
                break;
            }

            if sleep_or_cancel(self.settings.check_interval, cancel).await {
                break;
            }
        }
    }

    /// Wait until every sink queue is empty, the one-shot wait elapses, or `cancel` fires.
    async fn wait_for_drain(&self, cancel: &CancellationToken) {
        info!(
            max_wait_secs = self.settings.run_once_wait.as_secs_f64(),
            "Single run complete, waiting for posts to finish"
        );
        let deadline = tokio::time::Instant::now() + self.settings.run_once_wait;
        while tokio::time::Instant::now() < deadline {
            if self.queues_drained() {
                return;
            }
            if sleep_or_cancel(DRAIN_CHECK_INTERVAL, cancel).await {
                return;
            }
        }

        let left: usize = self
            .sinks
            .iter()
            .filter_map(|sink| sink.queue().len().ok())
            .sum();
        if left > 0 {
            warn!(items = left, "Stopping with undelivered items; they are sent on the next run");
        }
    }

    fn queues_drained(&self) -> bool {
        self.sinks
            .iter()
            .all(|sink| sink.queue().is_empty().unwrap_or(false))
    }
}

/// Decode one file and queue whatever is newer than its watermark.
fn process_file(
    source: &Source,
    file: &Path,
    sinks: &[Sink],
    tracker: &mut ProgressTracker,
    report: &mut CycleReport,
) -> Result<()> {
    let modified = std::fs::metadata(file)?.modified()?;
    if tracker.is_stale(file, modified) {
        report.files_skipped += 1;
        return Ok(());
    }

    let watermark = tracker.watermark(file);
    let cursor = decode(file, source.file_type, &source.options)?;

    let mut records = 0usize;
    for batch in cursor {
        let Some(batch) = batch.after(watermark) else {
            continue;
        };
        for sink in sinks {
            sink.submit(&batch)?;
        }
        tracker.advance(file, batch.last_ts());
        report.batches_enqueued += 1;
        records += batch.len();
    }
    report.records_enqueued += records;

    if records > 0 {
        info!(file = %file.display(), records, "Processed file");
    } else {
        debug!(file = %file.display(), "No new records");
    }
    Ok(())
}

/// Returns true if cancelled before `duration` elapsed
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use siphon_delivery::{DurableQueue, JsonRecordsAdapter};
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        queue: DurableQueue,
        orchestrator: Orchestrator,
    }

    fn fixture(run_once: bool) -> Fixture {
        let dir = TempDir::new().unwrap();
        let queue = DurableQueue::open(dir.path().join("q.db")).unwrap();
        let sink = Sink::new("test", Box::new(JsonRecordsAdapter), queue.clone());
        let source = Source::new(
            format!("{}/*.csv", dir.path().display()),
            FileType::Generic,
            DecodeOptions { chunk_size: 2, ..Default::default() },
        );
        let tracker = ProgressTracker::load(dir.path().join("site.yml.last_ts"));
        let settings = RunSettings {
            check_interval: Duration::from_millis(20),
            run_once,
            run_once_wait: Duration::from_millis(200),
        };
        let orchestrator = Orchestrator::new(vec![source], vec![sink], tracker, settings);
        Fixture {
            dir,
            queue,
            orchestrator,
        }
    }

    fn now_secs() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
    }

    #[test]
    fn test_unchanged_file_yields_nothing_new() {
        let mut fx = fixture(false);
        fs::write(fx.dir.path().join("a.csv"), "ts,a\n1000,1\n1001,2\n1002,3\n").unwrap();

        let first = fx.orchestrator.poll_cycle().unwrap();
        assert_eq!(first.files_scanned, 1);
        assert_eq!(first.batches_enqueued, 2);
        assert_eq!(first.records_enqueued, 3);
        assert_eq!(fx.queue.len().unwrap(), 2);

        // Timestamps are far older than the file's mtime, so it is decoded again but
        // every batch is at or below the watermark.
        let second = fx.orchestrator.poll_cycle().unwrap();
        assert_eq!(second.batches_enqueued, 0);
        assert_eq!(fx.queue.len().unwrap(), 2);
        assert_eq!(
            fx.orchestrator.tracker().watermark(&fx.dir.path().join("a.csv")),
            1002
        );
    }

    #[test]
    fn test_file_older_than_watermark_is_skipped() {
        let mut fx = fixture(false);
        let far_future = now_secs() + 3600;
        fs::write(
            fx.dir.path().join("a.csv"),
            format!("ts,a\n{},1\n", far_future),
        )
        .unwrap();

        fx.orchestrator.poll_cycle().unwrap();
        let second = fx.orchestrator.poll_cycle().unwrap();
        assert_eq!(second.files_skipped, 1);
        assert_eq!(fx.queue.len().unwrap(), 1);
    }

    #[test]
    fn test_appended_rows_are_picked_up() {
        let mut fx = fixture(false);
        let path = fx.dir.path().join("a.csv");
        fs::write(&path, "ts,a\n1000,1\n").unwrap();
        fx.orchestrator.poll_cycle().unwrap();

        fs::write(&path, "ts,a\n1000,1\n1001,2\n1002,3\n").unwrap();
        let report = fx.orchestrator.poll_cycle().unwrap();
        assert_eq!(report.records_enqueued, 2);
        assert_eq!(report.batches_enqueued, 2);

        // The straddling batch [1000, 1001] is trimmed to the 1001 record.
        let payloads: Vec<serde_json::Value> =
            std::iter::from_fn(|| fx.queue.try_lease().unwrap())
                .map(|item| serde_json::from_slice(&item.payload).unwrap())
                .collect();
        assert_eq!(
            payloads,
            vec![
                serde_json::json!({"records": [{"ts": 1000, "a": 1.0}]}),
                serde_json::json!({"records": [{"ts": 1001, "a": 2.0}]}),
                serde_json::json!({"records": [{"ts": 1002, "a": 3.0}]}),
            ]
        );
    }

    #[test]
    fn test_progress_is_persisted_each_cycle() {
        let mut fx = fixture(false);
        fs::write(fx.dir.path().join("a.csv"), "ts,a\n1000,1\n").unwrap();
        fx.orchestrator.poll_cycle().unwrap();

        let reloaded = ProgressTracker::load(fx.dir.path().join("site.yml.last_ts"));
        assert_eq!(reloaded.watermark(&fx.dir.path().join("a.csv")), 1000);
    }

    #[test]
    fn test_bad_file_does_not_stop_cycle() {
        let opts = DecodeOptions {
            ts_field: Some("time".into()),
            ..Default::default()
        };
        let mut fx = fixture(false);
        fx.orchestrator.sources[0].options = opts;
        fs::write(fx.dir.path().join("a.csv"), "ts,a\n1000,1\n").unwrap();
        fs::write(fx.dir.path().join("b.csv"), "time,a\n1000,1\n").unwrap();

        let report = fx.orchestrator.poll_cycle().unwrap();
        assert_eq!(report.files_scanned, 2);
        assert_eq!(report.errors, 1);
        assert_eq!(report.records_enqueued, 1);
    }

    #[tokio::test]
    async fn test_run_once_returns() {
        let mut fx = fixture(true);
        fs::write(fx.dir.path().join("a.csv"), "ts,a\n1000,1\n").unwrap();

        let cancel = CancellationToken::new();
        tokio::time::timeout(Duration::from_secs(5), fx.orchestrator.run(&cancel))
            .await
            .unwrap();
        assert_eq!(fx.queue.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let mut fx = fixture(false);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        tokio::time::timeout(Duration::from_secs(5), fx.orchestrator.run(&cancel))
            .await
            .unwrap();
    }
}
