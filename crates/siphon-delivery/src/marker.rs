//! Last successful post marker
//!
//! After every delivered payload the worker writes the current Unix time (seconds) to a
//! small text file next to the queue. Monitoring can compare it against the clock to spot
//! a sink that has stopped accepting data. Nothing inside siphon reads it back.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct LastPostMarker {
    path: PathBuf,
}

impl LastPostMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a successful post. Write failures are logged and otherwise ignored.
    pub fn touch(&self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        if let Err(e) = std::fs::write(&self.path, format!("{:.3}", now)) {
            debug!(path = %self.path.display(), error = %e, "Could not update last post marker");
        }
    }

    /// Time stored by the last `touch`, if the marker exists and is readable
    pub fn read(&self) -> Option<f64> {
        std::fs::read_to_string(&self.path).ok()?.trim().parse().ok()
    }
}
