//! Sink adapters and the producer-side sink handle
//!
//! An adapter turns a [`Batch`] into the JSON document one kind of collector expects. The
//! [`Sink`] handle pairs an adapter with its queue: `submit` wraps, serializes and appends.

mod bmon;
mod records;

pub use bmon::BmonAdapter;
pub use records::JsonRecordsAdapter;

use crate::error::Result;
use crate::queue::DurableQueue;
use siphon_common::Batch;
use tracing::{debug, Span};

/// Maps batches to the wire format of one destination.
pub trait SinkAdapter: Send + Sync {
    /// Short adapter kind, used in logs
    fn kind(&self) -> &'static str;

    fn wrap(&self, batch: &Batch) -> serde_json::Value;
}

/// Producer side of one configured sink
pub struct Sink {
    name: String,
    adapter: Box<dyn SinkAdapter>,
    queue: DurableQueue,
    span: Span,
}

impl Sink {
    pub fn new(
        name: impl Into<String>,
        adapter: Box<dyn SinkAdapter>,
        queue: DurableQueue,
    ) -> Self {
        let name = name.into();
        let span = tracing::info_span!("sink", sink = %name, kind = adapter.kind());
        Self {
            name,
            adapter,
            queue,
            span,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queue(&self) -> &DurableQueue {
        &self.queue
    }

    /// Wrap `batch` for this sink and append it to the queue, returning the item id.
    pub fn submit(&self, batch: &Batch) -> Result<i64> {
        let _entered = self.span.enter();
        let payload = serde_json::to_vec(&self.adapter.wrap(batch))?;
        let id = self.queue.append(&payload)?;
        debug!(item = id, records = batch.len(), bytes = payload.len(), "Queued batch");
        Ok(id)
    }
}

impl std::fmt::Debug for Sink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sink")
            .field("name", &self.name)
            .field("kind", &self.adapter.kind())
            .field("queue", &self.queue)
            .finish()
    }
}
