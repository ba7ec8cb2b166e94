//! Error types shared by the siphon crates

use thiserror::Error;

/// Result type alias for siphon operations
pub type Result<T> = std::result::Result<T, SiphonError>;

/// Errors that cross crate boundaries
#[derive(Error, Debug)]
pub enum SiphonError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Decode error: {0}")]
    Decode(String),
}

impl SiphonError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }
}
