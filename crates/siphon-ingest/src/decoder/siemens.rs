//! Siemens building-automation trend exports
//!
//! ```text
//! "Key            Name:Suffix                                Trend Definitions Used"
//! "Point_1:","CCHRC.BLR2.FUEL","","COV         1 hour"
//! "Point_2:","CCHRC.OAT","","15 minutes"
//! "Time Interval:","5 Minutes"
//! ""
//! "<>Date","Time","Point_1","Point_2"
//! "6/5/2017","00:00:00","2480.7764","No Data"
//! ```
//!
//! Point columns are named after their key entries. Values such as `No Data` are dropped.

use super::{next_row, DecodeOptions, RowLayout, TsColumns};
use crate::timestamp::TimestampParser;
use csv::StringRecord;
use siphon_common::Result;
use std::collections::HashMap;
use std::fs::File;
use tracing::warn;

const DATE_HEADER: &str = "<>Date";
const TIME_HEADER: &str = "Time";

/// `Point_3:` → `Point_3`
fn point_key(cell: &str) -> Option<&str> {
    let key = cell.trim().strip_suffix(':')?;
    let number = key.strip_prefix("Point_")?;
    (!number.is_empty() && number.chars().all(|c| c.is_ascii_digit())).then_some(key)
}

pub(crate) fn read_layout(
    reader: &mut csv::Reader<File>,
    options: &DecodeOptions,
) -> Result<Option<RowLayout>> {
    let mut points: HashMap<String, String> = HashMap::new();
    let mut row = StringRecord::new();
    let mut preamble_rows = 0usize;

    loop {
        if !next_row(reader, &mut row)? {
            if preamble_rows > 0 {
                warn!(rows = preamble_rows, "No '<>Date' header row found in Siemens export");
            }
            return Ok(None);
        }
        let first = row.get(0).unwrap_or_default().trim();
        if first == DATE_HEADER {
            break;
        }
        preamble_rows += 1;
        if let (Some(key), Some(name)) = (point_key(first), row.get(1)) {
            points.insert(key.to_string(), name.trim().to_string());
        }
    }

    let date_col = 0;
    let time_col = row
        .iter()
        .position(|cell| cell.trim() == TIME_HEADER)
        .unwrap_or(1);

    let fields = row
        .iter()
        .enumerate()
        .filter(|(col, _)| *col != date_col && *col != time_col)
        .filter_map(|(col, header)| {
            let header = header.trim();
            let raw_name = points.get(header).map(String::as_str).unwrap_or(header);
            let name = options.map_name(raw_name);
            (!name.is_empty() && name != "ts" && !options.is_excluded(&name))
                .then_some((col, name))
        })
        .collect();

    Ok(Some(RowLayout {
        ts: TsColumns::DateTime {
            date: date_col,
            time: time_col,
        },
        fields,
        parser: TimestampParser::new(options.ts_tz),
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use crate::decoder::{decode, DecodeOptions, FileType};
    use crate::field_map::{FieldMap, FieldTransform};
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#""Key            Name:Suffix                                Trend Definitions Used"
"Point_1:","CCHRC.BLR2.FUEL","","COV         1 hour"
"Point_2:","CCHRC.DEM:CONSUMPTN HI","","COV         1 minute"
"Point_3:","CCHRC.DEM:CONSUMPTN LO","","COV         1 minute"
"Point_4:","CCHRC.OAT","","15 minutes"
"Time Interval:","5 Minutes"
"Date Range:","6/5/2017 00:00:00 - 6/5/2017 23:59:59"
"Report Timings:","All Hours"
""
"<>Date","Time","Point_1","Point_2","Point_3","Point_4"
"6/5/2017","00:00:00","2480.7764","1062912","No Data","65.5"
"6/5/2017","00:05:00","2480.7764","1062912","No Data","64.8"
"6/5/2017","00:10:00","2480.7764","1062912","No Data","64.8"
"#;

    fn sample_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_point_key() {
        assert_eq!(super::point_key("Point_12:"), Some("Point_12"));
        assert_eq!(super::point_key("Point_:"), None);
        assert_eq!(super::point_key("Time Interval:"), None);
        assert_eq!(super::point_key("Point_1"), None);
    }

    #[test]
    fn test_decodes_sample_export() {
        let file = sample_file();
        let options = DecodeOptions { chunk_size: 10, ..Default::default() };
        let batches: Vec<_> = decode(file.path(), FileType::Siemens, &options)
            .unwrap()
            .collect();

        assert_eq!(batches.len(), 1);
        let recs = batches[0].records();
        assert_eq!(recs.len(), 3);
        assert_eq!(recs[0].ts, 1_496_620_800);
        assert_eq!(batches[0].last_ts(), 1_496_620_800 + 600);

        assert_eq!(recs[0].get("CCHRC.BLR2.FUEL"), Some(2480.7764));
        assert_eq!(recs[0].get("CCHRC.DEM:CONSUMPTN HI"), Some(1_062_912.0));
        assert_eq!(recs[0].get("CCHRC.DEM:CONSUMPTN LO"), None);
        assert_eq!(recs[1].get("CCHRC.OAT"), Some(64.8));
        assert_eq!(recs[0].len(), 3);
    }

    #[test]
    fn test_point_names_are_mapped_and_excluded() {
        let file = sample_file();
        let options = DecodeOptions {
            chunk_size: 10,
            field_map: Some(FieldMap::Transform(FieldTransform::Slugify)),
            exclude_fields: vec!["cchrc_blr2_fuel".into()],
            ts_tz: "-08:00".parse().unwrap(),
            ..Default::default()
        };
        let batch = decode(file.path(), FileType::Siemens, &options)
            .unwrap()
            .next()
            .unwrap();

        let rec = &batch.records()[0];
        assert_eq!(rec.ts, 1_496_620_800 + 8 * 3600);
        assert_eq!(rec.get("cchrc_oat"), Some(65.5));
        assert_eq!(rec.get("cchrc_dem_consumptn_hi"), Some(1_062_912.0));
        assert_eq!(rec.get("cchrc_blr2_fuel"), None);
    }

    #[test]
    fn test_file_without_header_row_is_empty() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"\"Point_1:\",\"X\"\n").unwrap();
        file.flush().unwrap();
        let mut cursor = decode(file.path(), FileType::Siemens, &DecodeOptions::default()).unwrap();
        assert!(cursor.is_exhausted());
        assert!(cursor.next().is_none());
    }
}
