//! Siphon Delivery Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Everything between a decoded batch and the remote collector:
//!
//! - [`Sink`] wraps a batch through its [`SinkAdapter`] and appends the payload to a
//!   [`DurableQueue`]
//! - a [`WorkerPool`] of [`PostWorker`]s leases payloads, posts them with [`HttpPoster`],
//!   acknowledges them on success and retries with [`Backoff`] on failure
//! - [`LastPostMarker`] records when the sink last accepted anything
//!
//! Delivery is at least once: a payload whose acknowledgement is lost to a crash is posted
//! again after restart.

pub mod backoff;
pub mod client;
pub mod error;
pub mod marker;
pub mod pool;
pub mod queue;
pub mod sink;
pub mod worker;

pub use backoff::Backoff;
pub use client::HttpPoster;
pub use error::{DeliveryError, Result};
pub use marker::LastPostMarker;
pub use pool::WorkerPool;
pub use queue::{DurableQueue, QueueItem};
pub use sink::{BmonAdapter, JsonRecordsAdapter, Sink, SinkAdapter};
pub use worker::{PostWorker, StatsSnapshot, WorkerConfig, WorkerStats};
