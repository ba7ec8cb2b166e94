//! BMON reading store
//!
//! The store takes one reading per sensor value:
//! `{"storeKey": "...", "readings": [[ts, "sensor_id", value], ...]}`.
//! Counter sensors need their readings in time order, so BMON sinks default to one worker.

use super::SinkAdapter;
use serde_json::{json, Value};
use siphon_common::Batch;

#[derive(Debug, Clone)]
pub struct BmonAdapter {
    store_key: String,
}

impl BmonAdapter {
    pub fn new(store_key: impl Into<String>) -> Self {
        Self {
            store_key: store_key.into(),
        }
    }
}

impl SinkAdapter for BmonAdapter {
    fn kind(&self) -> &'static str {
        "bmon"
    }

    fn wrap(&self, batch: &Batch) -> Value {
        let readings: Vec<Value> = batch
            .records()
            .iter()
            .flat_map(|rec| {
                rec.fields()
                    .map(move |(field, value)| json!([rec.ts, field, value]))
            })
            .collect();

        json!({
            "storeKey": self.store_key,
            "readings": readings,
        })
    }
}
