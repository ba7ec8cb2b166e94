//! Normalized time-series records

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One decoded row: a Unix timestamp plus any number of finite numeric fields.
///
/// Values that are not numbers, or that parse to NaN or infinity, are never stored.
/// A missing field is always preferred over a coerced zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Unix epoch seconds
    pub ts: i64,

    #[serde(flatten)]
    fields: BTreeMap<String, f64>,
}

impl Record {
    /// Create an empty record at `ts`
    pub fn new(ts: i64) -> Self {
        Self {
            ts,
            fields: BTreeMap::new(),
        }
    }

    /// Store `value` under `name` if it is finite.
    ///
    /// Returns false when the value was dropped. The `ts` name is reserved.
    pub fn insert(&mut self, name: impl Into<String>, value: f64) -> bool {
        let name = name.into();
        if !value.is_finite() || name == "ts" {
            return false;
        }
        self.fields.insert(name, value);
        true
    }

    /// Parse `raw` as a float and store it under `name`.
    ///
    /// Surrounding whitespace is ignored. Returns false when the value was dropped.
    pub fn insert_raw(&mut self, name: impl Into<String>, raw: &str) -> bool {
        match raw.trim().parse::<f64>() {
            Ok(value) => self.insert(name, value),
            Err(_) => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.fields.get(name).copied()
    }

    /// Iterate over `(name, value)` pairs in name order
    pub fn fields(&self) -> impl Iterator<Item = (&str, f64)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Number of numeric fields (the timestamp is not counted)
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// An ordered, non-empty group of records decoded together.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Batch {
    records: Vec<Record>,
}

impl Batch {
    /// Build a batch, or `None` if there are no records.
    pub fn from_records(records: Vec<Record>) -> Option<Self> {
        if records.is_empty() {
            None
        } else {
            Some(Self { records })
        }
    }

    /// Timestamp of the final record
    pub fn last_ts(&self) -> i64 {
        self.records.last().map(|r| r.ts).unwrap_or_default()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Keep only records newer than `watermark`.
    ///
    /// A batch whose `last_ts` is at or below the watermark is dropped whole; a batch
    /// straddling it keeps just the records with `ts > watermark`.
    pub fn after(self, watermark: i64) -> Option<Self> {
        if self.last_ts() <= watermark {
            return None;
        }
        let records = self
            .records
            .into_iter()
            .filter(|r| r.ts > watermark)
            .collect();
        Self::from_records(records)
    }
}
