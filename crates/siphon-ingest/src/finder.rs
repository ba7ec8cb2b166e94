//! Source file discovery

use glob::glob;
use siphon_common::{Result, SiphonError};
use std::path::PathBuf;
use tracing::warn;

/// Expand `pattern` into the regular files it matches, sorted and without duplicates.
///
/// Entries that cannot be read while walking (permissions, races with deletion) are
/// logged and left out.
pub fn find_files(pattern: &str) -> Result<Vec<PathBuf>> {
    let matches = glob(pattern)
        .map_err(|e| SiphonError::config(format!("invalid file glob '{}': {}", pattern, e)))?;

    let mut paths: Vec<PathBuf> = matches
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(pattern, path = %e.path().display(), error = %e.error(), "Skipping unreadable path");
                None
            },
        })
        .filter(|path| path.is_file())
        .collect();

    paths.sort();
    paths.dedup();
    Ok(paths)
}
