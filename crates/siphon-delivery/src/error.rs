//! Error types for the delivery side: queue storage and HTTP posting

use thiserror::Error;

/// Result type alias for delivery operations
pub type Result<T> = std::result::Result<T, DeliveryError>;

#[derive(Error, Debug)]
pub enum DeliveryError {
    /// Queue database operation failed
    #[error("Queue storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Another thread panicked while holding the queue connection
    #[error("Queue connection lock poisoned")]
    LockPoisoned,

    /// Queue file or marker file I/O failed
    #[error("File operation failed: {0}")]
    Io(#[from] std::io::Error),

    /// Request never produced a response (connect failure, timeout, ...)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Sink answered with a non-success status
    #[error("Sink responded with HTTP {0}")]
    Status(u16),

    /// Batch could not be turned into a payload
    #[error("Failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Sink definition is unusable
    #[error("Sink configuration error: {0}")]
    Config(String),
}

impl DeliveryError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Transient failures are retried by the worker that owns the item
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Status(_))
    }
}

impl<T> From<std::sync::PoisonError<T>> for DeliveryError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Self::LockPoisoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(DeliveryError::Status(503).to_string(), "Sink responded with HTTP 503");
        assert!(DeliveryError::Status(503).is_transient());
        assert!(!DeliveryError::LockPoisoned.is_transient());
    }
}
