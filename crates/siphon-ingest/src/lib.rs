//! Siphon Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Turns instrument export files into batches of normalized records and remembers how
//! far each file has already been handed off.
//!
//! # Supported File Types
//!
//! - **generic**: any delimited file with a timestamp column and numeric columns
//! - **siemens**: Siemens building-automation trend exports (`Point_N` key preamble,
//!   separate date and time columns)
//!
//! # Example
//!
//! ```no_run
//! use siphon_ingest::{decode, DecodeOptions, FileType, ProgressTracker};
//! use std::path::Path;
//!
//! let path = Path::new("/data/boiler.csv");
//! let mut tracker = ProgressTracker::load("/etc/siphon/site.yml.last_ts");
//! let watermark = tracker.watermark(path);
//!
//! let options = DecodeOptions { chunk_size: 50, ..Default::default() };
//! for batch in decode(path, FileType::Generic, &options)? {
//!     if let Some(batch) = batch.after(watermark) {
//!         // hand the batch to the sinks, then:
//!         tracker.advance(path, batch.last_ts());
//!     }
//! }
//! tracker.persist()?;
//! # Ok::<(), siphon_common::SiphonError>(())
//! ```

pub mod decoder;
pub mod field_map;
pub mod finder;
pub mod progress;
pub mod timestamp;

pub use decoder::{decode, BatchCursor, DecodeOptions, FileType};
pub use field_map::{FieldMap, FieldTransform};
pub use finder::find_files;
pub use progress::ProgressTracker;
pub use timestamp::{TimeZoneSpec, TimestampParser};
