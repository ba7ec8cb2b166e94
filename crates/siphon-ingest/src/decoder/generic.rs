//! Generic delimited files: header row(s), one timestamp column, numeric columns

use super::{next_row, DecodeOptions, RowLayout, TsColumns};
use crate::timestamp::TimestampParser;
use csv::StringRecord;
use siphon_common::{Result, SiphonError};
use std::fs::File;

pub(crate) fn read_layout(
    reader: &mut csv::Reader<File>,
    options: &DecodeOptions,
) -> Result<Option<RowLayout>> {
    let mut headers = Vec::with_capacity(options.header_rows);
    for _ in 0..options.header_rows {
        let mut row = StringRecord::new();
        if !next_row(reader, &mut row)? {
            return Ok(None);
        }
        headers.push(row);
    }

    let names: Vec<String> = if options.field_names.is_empty() {
        headers[options.name_row - 1]
            .iter()
            .map(|name| options.map_name(name))
            .collect()
    } else {
        options
            .field_names
            .iter()
            .map(|name| name.trim().to_string())
            .collect()
    };

    if names.is_empty() {
        return Err(SiphonError::config("no column names found"));
    }

    let ts_col = match &options.ts_field {
        None => 0,
        Some(field) => names.iter().position(|n| n == field).ok_or_else(|| {
            SiphonError::config(format!("timestamp field '{}' is not present", field))
        })?,
    };

    let fields = names
        .into_iter()
        .enumerate()
        .filter(|(col, name)| {
            *col != ts_col && !name.is_empty() && name != "ts" && !options.is_excluded(name)
        })
        .collect();

    Ok(Some(RowLayout {
        ts: TsColumns::Single(ts_col),
        fields,
        parser: TimestampParser::new(options.ts_tz),
    }))
}
