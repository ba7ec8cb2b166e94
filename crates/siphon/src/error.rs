//! Error types for the siphon binary

use siphon_common::SiphonError;
use siphon_delivery::DeliveryError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for application operations
pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    /// Config file is missing or unreadable
    #[error("Cannot read config file '{}': {source}. Check the path and permissions.", path.display())]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Config file (or one entry of it) is not valid YAML for its section
    #[error("Invalid configuration: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Configuration values are inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source file metadata could not be read
    #[error("File operation failed: {0}")]
    Io(#[from] std::io::Error),

    /// Decoding, file discovery or progress storage failed
    #[error(transparent)]
    Ingest(#[from] SiphonError),

    /// Queue or HTTP setup failed
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

impl AppError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
