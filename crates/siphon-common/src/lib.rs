//! Siphon Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging, and error handling for the siphon workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`SiphonError`] and the [`Result`] alias
//! - **Logging**: tracing subscriber setup driven by [`logging::LogConfig`]
//! - **Types**: [`Record`] and [`Batch`], the normalized rows every decoder produces
//!
//! # Example
//!
//! ```
//! use siphon_common::{Batch, Record};
//!
//! let mut rec = Record::new(1000);
//! rec.insert_raw("temp", "21.5");
//! rec.insert_raw("status", "No Data");
//!
//! let batch = Batch::from_records(vec![rec]).unwrap();
//! assert_eq!(batch.last_ts(), 1000);
//! assert_eq!(batch.records()[0].len(), 1);
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{Result, SiphonError};
pub use types::{Batch, Record};
