//! Per-file delivery progress
//!
//! The tracker maps each source file to the timestamp of the newest record already handed
//! to every sink. It is owned by the poll loop and saved once per cycle as a small JSON
//! document, replaced atomically so a crash mid-write leaves the previous snapshot intact.

use serde::{Deserialize, Serialize};
use siphon_common::Result;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
struct Snapshot(BTreeMap<String, i64>);

/// High-water marks keyed by source file path.
#[derive(Debug)]
pub struct ProgressTracker {
    path: PathBuf,
    marks: BTreeMap<String, i64>,
}

impl ProgressTracker {
    /// Restore the tracker saved at `path`.
    ///
    /// A missing file starts empty. So does an unreadable or corrupt one, after a warning:
    /// files are then re-read from the beginning and the sinks may see duplicates.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let marks = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Snapshot>(&bytes) {
                Ok(snapshot) => snapshot.0,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Progress file is corrupt, starting empty");
                    BTreeMap::new()
                },
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot read progress file, starting empty");
                BTreeMap::new()
            },
        };
        debug!(path = %path.display(), files = marks.len(), "Loaded progress");
        Self { path, marks }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Newest timestamp handed off for `file`, or 0 if it has never been seen
    pub fn watermark(&self, file: &Path) -> i64 {
        self.marks.get(&key(file)).copied().unwrap_or(0)
    }

    /// Record that everything up to and including `ts` has been handed off.
    ///
    /// The mark never moves backwards.
    pub fn advance(&mut self, file: &Path, ts: i64) {
        let mark = self.marks.entry(key(file)).or_insert(0);
        if ts > *mark {
            *mark = ts;
        }
    }

    /// True when `file` has not been modified since its watermark.
    ///
    /// Sub-second mtime counts: a file written later in the same second as its last
    /// delivered row is not stale.
    pub fn is_stale(&self, file: &Path, modified: SystemTime) -> bool {
        let mtime = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        mtime <= self.watermark(file) as f64
    }

    /// Write the whole mapping to disk, replacing the previous snapshot atomically.
    pub fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(format!(".tmp.{}", std::process::id()));
        let tmp_path = PathBuf::from(tmp_name);

        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        serde_json::to_writer_pretty(&mut writer, &self.marks)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        drop(writer);

        fs::rename(&tmp_path, &self.path)?;
        debug!(path = %self.path.display(), files = self.marks.len(), "Saved progress");
        Ok(())
    }

    /// Number of files tracked
    pub fn len(&self) -> usize {
        self.marks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }
}

fn key(file: &Path) -> String {
    file.to_string_lossy().into_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_unseen_file_is_zero() {
        let dir = TempDir::new().unwrap();
        let tracker = ProgressTracker::load(dir.path().join("site.yml.last_ts"));
        assert!(tracker.is_empty());
        assert_eq!(tracker.watermark(Path::new("/data/a.csv")), 0);
    }

    #[test]
    fn test_advance_never_moves_back() {
        let dir = TempDir::new().unwrap();
        let mut tracker = ProgressTracker::load(dir.path().join("p.json"));
        let file = Path::new("/data/a.csv");

        tracker.advance(file, 1001);
        tracker.advance(file, 900);
        assert_eq!(tracker.watermark(file), 1001);
        tracker.advance(file, 1002);
        assert_eq!(tracker.watermark(file), 1002);
    }

    #[test]
    fn test_persist_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("site.yml.last_ts");

        let mut tracker = ProgressTracker::load(&path);
        tracker.advance(Path::new("/data/a.csv"), 1500);
        tracker.advance(Path::new("/data/b.csv"), 42);
        tracker.persist().unwrap();

        let reloaded = ProgressTracker::load(&path);
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.watermark(Path::new("/data/a.csv")), 1500);
        assert_eq!(reloaded.watermark(Path::new("/data/b.csv")), 42);

        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p.json");
        fs::write(&path, "{not json").unwrap();

        let tracker = ProgressTracker::load(&path);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_is_stale() {
        let dir = TempDir::new().unwrap();
        let mut tracker = ProgressTracker::load(dir.path().join("p.json"));
        let file = Path::new("/data/a.csv");
        let at = |secs| UNIX_EPOCH + Duration::from_secs(secs);

        assert!(!tracker.is_stale(file, at(10)));
        tracker.advance(file, 1000);
        assert!(tracker.is_stale(file, at(999)));
        assert!(tracker.is_stale(file, at(1000)));
        assert!(!tracker.is_stale(file, at(1001)));
    }

    #[test]
    fn test_modified_within_watermark_second_is_not_stale() {
        let dir = TempDir::new().unwrap();
        let mut tracker = ProgressTracker::load(dir.path().join("p.json"));
        let file = Path::new("/data/a.csv");
        tracker.advance(file, 1000);

        let later_same_second = UNIX_EPOCH + Duration::from_millis(1_000_400);
        assert!(!tracker.is_stale(file, later_same_second));
        assert!(tracker.is_stale(file, UNIX_EPOCH + Duration::from_millis(999_900)));
    }
}
