use super::SinkAdapter;
use serde_json::{json, Value};
use siphon_common::Batch;

/// Generic collector format: `{"records": [{"ts": ..., "<field>": ...}, ...]}`
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRecordsAdapter;

impl SinkAdapter for JsonRecordsAdapter {
    fn kind(&self) -> &'static str {
        "json"
    }

    fn wrap(&self, batch: &Batch) -> Value {
        json!({ "records": batch.records() })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use siphon_common::Record;

    #[test]
    fn test_records_keep_ts_and_fields() {
        let mut rec = Record::new(1002);
        rec.insert("b", 5.0);
        let batch = Batch::from_records(vec![rec]).unwrap();

        assert_eq!(
            JsonRecordsAdapter.wrap(&batch),
            json!({"records": [{"ts": 1002, "b": 5.0}]})
        );
    }
}
