//! YAML configuration
//!
//! ```yaml
//! logging_level: info
//! check_interval: 30
//! run_once: false
//! run_once_wait_before_stop: 15
//! consumers:
//!   - type: bmon
//!     poster_id: site1
//!     bmon_store_url: https://bmon.example.org/readings/store/
//!     bmon_store_key: secret
//! csv_files:
//!   - file_glob: /data/logger/*.csv
//!     file_type: generic
//!     chunk_size: 10
//! ```
//!
//! `consumers` and `csv_files` entries are parsed one by one so that a bad entry only
//! disables itself.

use crate::error::{AppError, Result};
use serde::Deserialize;
use siphon_delivery::backoff::{DEFAULT_RETRY_BASE_SECS, DEFAULT_RETRY_MAX_SECS};
use siphon_delivery::client::DEFAULT_TIMEOUT_SECS;
use siphon_delivery::WorkerConfig;
use siphon_ingest::{DecodeOptions, FileType};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Configuration Defaults
// ============================================================================

/// Seconds between poll cycles
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 30;

/// Seconds one-shot mode waits for the workers before exiting
pub const DEFAULT_RUN_ONCE_WAIT_SECS: u64 = 15;

/// Workers per sink. BMON counter readings must arrive in order, hence one.
pub const DEFAULT_WORKERS: usize = 1;

/// Suffix appended to the config path to name the progress file
pub const PROGRESS_SUFFIX: &str = ".last_ts";

const CONSUMER_KEYS: &[&str] = &[
    "type",
    "poster_id",
    "workers",
    "timeout_secs",
    "retry_base_secs",
    "retry_max_secs",
    "bmon_store_url",
    "bmon_store_key",
    "url",
];

const SOURCE_KEYS: &[&str] = &[
    "file_glob",
    "file_type",
    "chunk_size",
    "ts_field",
    "ts_tz",
    "field_names",
    "header_rows",
    "name_row",
    "field_map",
    "exclude_fields",
    "delimiter",
    "quote",
];

/// Keys of a mapping entry that are not in `known`, sorted. Entries with flattened fields
/// get no unknown-field check from serde.
fn unknown_keys(value: &serde_yaml::Value, known: &[&str]) -> Vec<String> {
    let serde_yaml::Value::Mapping(map) = value else {
        return Vec::new();
    };
    let mut unknown: Vec<String> = map
        .keys()
        .filter_map(|key| key.as_str())
        .filter(|key| !known.contains(key))
        .map(str::to_string)
        .collect();
    unknown.sort();
    unknown
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_logging_level")]
    pub logging_level: String,

    #[serde(default = "default_check_interval")]
    pub check_interval: u64,

    #[serde(default)]
    pub run_once: bool,

    #[serde(default = "default_run_once_wait")]
    pub run_once_wait_before_stop: u64,

    /// Directory for queue databases and marker files; defaults to the config file's directory
    #[serde(default)]
    pub state_dir: Option<PathBuf>,

    #[serde(default)]
    pub consumers: Vec<serde_yaml::Value>,

    #[serde(default)]
    pub csv_files: Vec<serde_yaml::Value>,

    #[serde(skip)]
    path: PathBuf,
}

fn default_logging_level() -> String {
    "info".to_string()
}

fn default_check_interval() -> u64 {
    DEFAULT_CHECK_INTERVAL_SECS
}

fn default_run_once_wait() -> u64 {
    DEFAULT_RUN_ONCE_WAIT_SECS
}

impl AppConfig {
    /// Read and parse the config file. Any failure here is fatal to the process.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| AppError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_yaml(&text)?;
        config.path = path.to_path_buf();
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        // An empty document means "all defaults"
        if text.trim().is_empty() {
            return Ok(serde_yaml::from_str("{}")?);
        }
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval)
    }

    pub fn run_once_wait(&self) -> Duration {
        Duration::from_secs(self.run_once_wait_before_stop)
    }

    /// Where queue databases and marker files live
    pub fn state_dir(&self) -> PathBuf {
        match &self.state_dir {
            Some(dir) => dir.clone(),
            None => self
                .path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        }
    }

    /// `<config path>.last_ts`
    pub fn progress_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(PROGRESS_SUFFIX);
        PathBuf::from(name)
    }
}

/// Destination-specific part of a consumer entry, selected by `type`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SinkTarget {
    Bmon {
        bmon_store_url: String,
        bmon_store_key: String,
    },
    Json {
        url: String,
    },
}

impl SinkTarget {
    pub fn url(&self) -> &str {
        match self {
            SinkTarget::Bmon { bmon_store_url, .. } => bmon_store_url,
            SinkTarget::Json { url } => url,
        }
    }
}

/// One entry of `consumers`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConsumerConfig {
    /// Names this sink's queue and marker files
    pub poster_id: String,

    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_retry_base")]
    pub retry_base_secs: u64,

    #[serde(default = "default_retry_max")]
    pub retry_max_secs: u64,

    #[serde(flatten)]
    pub target: SinkTarget,
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_retry_base() -> u64 {
    DEFAULT_RETRY_BASE_SECS
}

fn default_retry_max() -> u64 {
    DEFAULT_RETRY_MAX_SECS
}

impl ConsumerConfig {
    /// Parse one `consumers` entry. A missing `type` means `bmon`.
    pub fn from_value(value: &serde_yaml::Value) -> Result<Self> {
        let mut value = value.clone();
        if let serde_yaml::Value::Mapping(map) = &mut value {
            let key = serde_yaml::Value::from("type");
            if !map.contains_key(&key) {
                map.insert(key, serde_yaml::Value::from("bmon"));
            }
        }
        let config: Self = serde_yaml::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    /// Keys in a raw `consumers` entry that no consumer setting uses
    pub fn unknown_keys(value: &serde_yaml::Value) -> Vec<String> {
        unknown_keys(value, CONSUMER_KEYS)
    }

    fn validate(&self) -> Result<()> {
        let id = self.poster_id.trim();
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            return Err(AppError::config(format!(
                "poster_id '{}' must be a plain, non-empty file name",
                self.poster_id
            )));
        }
        if self.workers == 0 {
            return Err(AppError::config("workers must be at least 1"));
        }
        Ok(())
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            timeout: Duration::from_secs(self.timeout_secs),
            retry_base: Duration::from_secs(self.retry_base_secs),
            retry_max: Duration::from_secs(self.retry_max_secs),
        }
    }
}

/// One entry of `csv_files`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SourceConfig {
    pub file_glob: String,

    #[serde(default)]
    pub file_type: FileType,

    #[serde(flatten)]
    pub options: DecodeOptions,
}

impl SourceConfig {
    pub fn from_value(value: &serde_yaml::Value) -> Result<Self> {
        let config: Self = serde_yaml::from_value(value.clone())?;
        if config.file_glob.trim().is_empty() {
            return Err(AppError::config("file_glob must not be empty"));
        }
        config.options.validate()?;
        Ok(config)
    }

    /// Keys in a raw `csv_files` entry that no source setting uses
    pub fn unknown_keys(value: &serde_yaml::Value) -> Vec<String> {
        unknown_keys(value, SOURCE_KEYS)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use siphon_ingest::TimeZoneSpec;
    use std::io::Write;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
logging_level: debug
check_interval: 60
consumers:
  - poster_id: site1
    bmon_store_url: https://bmon.example.org/readings/store/
    bmon_store_key: secret
  - type: json
    poster_id: lake
    url: http://collector.local/ingest
    workers: 4
    retry_max_secs: 60
  - type: carrier-pigeon
    poster_id: nope
csv_files:
  - file_glob: /data/*.csv
    chunk_size: 10
    ts_tz: local
    exclude_fields: [battery]
  - file_glob: /data/siemens/*.csv
    file_type: siemens
  - chunk_size: 3
"#;

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_yaml("").unwrap();
        assert_eq!(config.logging_level, "info");
        assert_eq!(config.check_interval, 30);
        assert!(!config.run_once);
        assert_eq!(config.run_once_wait_before_stop, 15);
        assert!(config.consumers.is_empty());
    }

    #[test]
    fn test_parse_sample() {
        let config = AppConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.check_interval(), Duration::from_secs(60));
        assert_eq!(config.consumers.len(), 3);
        assert_eq!(config.csv_files.len(), 3);
    }

    #[test]
    fn test_consumer_entries() {
        let config = AppConfig::from_yaml(SAMPLE).unwrap();

        let bmon = ConsumerConfig::from_value(&config.consumers[0]).unwrap();
        assert_eq!(bmon.poster_id, "site1");
        assert_eq!(bmon.workers, 1);
        assert_eq!(bmon.timeout_secs, 15);
        assert_eq!(
            bmon.target,
            SinkTarget::Bmon {
                bmon_store_url: "https://bmon.example.org/readings/store/".into(),
                bmon_store_key: "secret".into(),
            }
        );

        let json = ConsumerConfig::from_value(&config.consumers[1]).unwrap();
        assert_eq!(json.workers, 4);
        assert_eq!(json.target.url(), "http://collector.local/ingest");
        assert_eq!(json.worker_config().retry_max, Duration::from_secs(60));
        assert_eq!(json.worker_config().retry_base, Duration::from_secs(15));

        assert!(ConsumerConfig::from_value(&config.consumers[2]).is_err());
    }

    #[test]
    fn test_bad_poster_id() {
        let value: serde_yaml::Value =
            serde_yaml::from_str("poster_id: ../escape\nbmon_store_url: http://x\nbmon_store_key: k\n")
                .unwrap();
        assert!(ConsumerConfig::from_value(&value).is_err());
    }

    #[test]
    fn test_source_entries() {
        let config = AppConfig::from_yaml(SAMPLE).unwrap();

        let generic = SourceConfig::from_value(&config.csv_files[0]).unwrap();
        assert_eq!(generic.file_type, FileType::Generic);
        assert_eq!(generic.options.chunk_size, 10);
        assert_eq!(generic.options.ts_tz, TimeZoneSpec::Local);
        assert_eq!(generic.options.exclude_fields, vec!["battery".to_string()]);
        assert_eq!(generic.options.header_rows, 1);

        let siemens = SourceConfig::from_value(&config.csv_files[1]).unwrap();
        assert_eq!(siemens.file_type, FileType::Siemens);
        assert_eq!(siemens.options.chunk_size, 1);

        assert!(SourceConfig::from_value(&config.csv_files[2]).is_err());
    }

    #[test]
    fn test_unknown_keys_are_reported() {
        let source: serde_yaml::Value =
            serde_yaml::from_str("file_glob: /data/*.csv\nchunksize: 10\nts_tz: local\n").unwrap();
        assert_eq!(SourceConfig::unknown_keys(&source), vec!["chunksize".to_string()]);
        // Still parses; the misspelled key just has no effect
        assert_eq!(SourceConfig::from_value(&source).unwrap().options.chunk_size, 1);

        let consumer: serde_yaml::Value = serde_yaml::from_str(
            "poster_id: site1\nbmon_store_url: http://x\nbmon_store_key: k\nretries: 3\nworker: 2\n",
        )
        .unwrap();
        assert_eq!(
            ConsumerConfig::unknown_keys(&consumer),
            vec!["retries".to_string(), "worker".to_string()]
        );

        let config = AppConfig::from_yaml(SAMPLE).unwrap();
        assert!(ConsumerConfig::unknown_keys(&config.consumers[1]).is_empty());
        assert!(SourceConfig::unknown_keys(&config.csv_files[0]).is_empty());
    }

    #[test]
    fn test_source_keys_cover_decode_options() {
        let defaults = serde_yaml::to_value(DecodeOptions::default()).unwrap();
        let serde_yaml::Value::Mapping(map) = defaults else {
            panic!("decode options should serialize as a mapping");
        };
        for key in map.keys() {
            let key = key.as_str().unwrap();
            assert!(SOURCE_KEYS.contains(&key), "missing source key {}", key);
        }
    }

    #[test]
    fn test_paths_follow_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("site.yml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"check_interval: 5\n").unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.state_dir(), dir.path());
        assert_eq!(config.progress_path(), dir.path().join("site.yml.last_ts"));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = AppConfig::load("/no/such/siphon.yml").unwrap_err();
        assert!(matches!(err, AppError::ConfigRead { .. }));
    }
}
