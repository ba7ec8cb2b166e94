//! Source file decoders
//!
//! A decoder reads the preamble of a file to work out which column holds the timestamp and
//! what each remaining column is called, then yields the data rows as [`Batch`]es through a
//! [`BatchCursor`]. Cursors always start from the top of the file; skipping rows that were
//! already delivered is the caller's job (see [`Batch::after`]).

mod generic;
mod siemens;

use crate::field_map::FieldMap;
use crate::timestamp::{TimeZoneSpec, TimestampParser};
use csv::{ByteRecord, StringRecord};
use serde::{Deserialize, Serialize};
use siphon_common::{Batch, Record, Result, SiphonError};
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Layout of the source files matched by one glob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    #[default]
    Generic,
    Siemens,
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileType::Generic => f.write_str("generic"),
            FileType::Siemens => f.write_str("siemens"),
        }
    }
}

/// Per-source decoding options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeOptions {
    /// Records per batch
    pub chunk_size: usize,

    /// Timestamp column name, in final (mapped) form. First column when unset.
    pub ts_field: Option<String>,

    /// Zone for timestamp strings without an offset
    pub ts_tz: TimeZoneSpec,

    /// Explicit column names, used instead of the header row
    pub field_names: Vec<String>,

    /// Rows before the first data row
    pub header_rows: usize,

    /// 1-based row within the header rows that holds the column names
    pub name_row: usize,

    pub field_map: Option<FieldMap>,

    /// Column names (final form) to leave out of every record
    pub exclude_fields: Vec<String>,

    pub delimiter: char,
    pub quote: char,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1,
            ts_field: None,
            ts_tz: TimeZoneSpec::Utc,
            field_names: Vec::new(),
            header_rows: 1,
            name_row: 1,
            field_map: None,
            exclude_fields: Vec::new(),
            delimiter: ',',
            quote: '"',
        }
    }
}

impl DecodeOptions {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(SiphonError::config("chunk_size must be at least 1"));
        }
        if self.field_names.is_empty()
            && (self.name_row == 0 || self.name_row > self.header_rows)
        {
            return Err(SiphonError::config(format!(
                "name_row {} is outside the {} header row(s)",
                self.name_row, self.header_rows
            )));
        }
        self.delimiter_byte()?;
        self.quote_byte()?;
        Ok(())
    }

    fn delimiter_byte(&self) -> Result<u8> {
        ascii_byte(self.delimiter, "delimiter")
    }

    fn quote_byte(&self) -> Result<u8> {
        ascii_byte(self.quote, "quote")
    }

    /// Apply `field_map`, if any, to a header name
    pub(crate) fn map_name(&self, name: &str) -> String {
        let name = name.trim();
        match &self.field_map {
            Some(map) => map.apply(name),
            None => name.to_string(),
        }
    }

    pub(crate) fn is_excluded(&self, name: &str) -> bool {
        self.exclude_fields.iter().any(|f| f == name)
    }
}

fn ascii_byte(c: char, what: &str) -> Result<u8> {
    if c.is_ascii() {
        Ok(c as u8)
    } else {
        Err(SiphonError::config(format!(
            "{} must be a single ASCII character, got '{}'",
            what, c
        )))
    }
}

/// Where the timestamp of a data row comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TsColumns {
    Single(usize),
    /// Separate date and time columns, joined with a space before parsing
    DateTime { date: usize, time: usize },
}

/// Column assignments worked out from a file's preamble.
#[derive(Debug, Clone)]
pub(crate) struct RowLayout {
    pub(crate) ts: TsColumns,
    pub(crate) fields: Vec<(usize, String)>,
    pub(crate) parser: TimestampParser,
}

impl RowLayout {
    /// Build a record from one data row, or `None` if its timestamp cannot be parsed.
    fn record(&self, row: &StringRecord) -> Option<Record> {
        let ts = match self.ts {
            TsColumns::Single(col) => self.parser.parse(row.get(col)?),
            TsColumns::DateTime { date, time } => {
                let joined = format!("{} {}", row.get(date)?.trim(), row.get(time)?.trim());
                self.parser.parse(&joined)
            },
        }?;

        let mut record = Record::new(ts);
        for (col, name) in &self.fields {
            if let Some(raw) = row.get(*col) {
                record.insert_raw(name.as_str(), raw);
            }
        }
        Some(record)
    }
}

enum CursorState {
    Reading(csv::Reader<File>),
    Exhausted,
}

/// Lazily decodes a file into batches of at most `chunk_size` records.
///
/// Rows whose timestamp cannot be parsed, and rows the CSV parser rejects, are logged and
/// skipped. Invalid UTF-8 is replaced rather than rejected. Only an I/O error ends the cursor
/// early; batches already yielded stay valid.
pub struct BatchCursor {
    path: PathBuf,
    state: CursorState,
    layout: Option<RowLayout>,
    chunk_size: usize,
    row: StringRecord,
    line: u64,
    rows_read: usize,
    rows_skipped: usize,
}

impl BatchCursor {
    fn new(
        path: &Path,
        reader: csv::Reader<File>,
        layout: Option<RowLayout>,
        chunk_size: usize,
    ) -> Self {
        let state = if layout.is_some() {
            CursorState::Reading(reader)
        } else {
            CursorState::Exhausted
        };
        Self {
            path: path.to_path_buf(),
            state,
            layout,
            chunk_size: chunk_size.max(1),
            row: StringRecord::new(),
            line: 0,
            rows_read: 0,
            rows_skipped: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.state, CursorState::Exhausted)
    }

    /// Data rows read so far, including skipped ones
    pub fn rows_read(&self) -> usize {
        self.rows_read
    }

    /// Data rows dropped because they were malformed or their timestamp was unusable
    pub fn rows_skipped(&self) -> usize {
        self.rows_skipped
    }

    fn exhaust(&mut self) {
        if !self.is_exhausted() {
            debug!(
                file = %self.path.display(),
                rows = self.rows_read,
                skipped = self.rows_skipped,
                "Finished decoding"
            );
        }
        self.state = CursorState::Exhausted;
    }
}

impl Iterator for BatchCursor {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        let mut records = Vec::with_capacity(self.chunk_size);

        while records.len() < self.chunk_size {
            let reader = match &mut self.state {
                CursorState::Reading(reader) => reader,
                CursorState::Exhausted => break,
            };

            match read_lossy(reader, &mut self.row) {
                Ok(Some(line)) => self.line = line,
                Ok(None) => {
                    self.exhaust();
                    break;
                },
                Err(e) if e.is_io_error() => {
                    warn!(file = %self.path.display(), error = %e, "Read error, stopping early");
                    self.exhaust();
                    break;
                },
                Err(e) => {
                    self.rows_read += 1;
                    self.rows_skipped += 1;
                    warn!(file = %self.path.display(), error = %e, "Skipping malformed row");
                    continue;
                },
            }

            if self.row.iter().all(|cell| cell.trim().is_empty()) {
                continue;
            }
            self.rows_read += 1;

            let Some(layout) = &self.layout else {
                break;
            };
            match layout.record(&self.row) {
                Some(record) => records.push(record),
                None => {
                    self.rows_skipped += 1;
                    warn!(
                        file = %self.path.display(),
                        line = self.line,
                        row = ?self.row,
                        "Skipping row with unusable timestamp"
                    );
                },
            }
        }

        Batch::from_records(records)
    }
}

impl fmt::Debug for BatchCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchCursor")
            .field("path", &self.path)
            .field("exhausted", &self.is_exhausted())
            .field("chunk_size", &self.chunk_size)
            .field("rows_read", &self.rows_read)
            .field("rows_skipped", &self.rows_skipped)
            .finish()
    }
}

/// Open `path` and return a cursor over its batches.
///
/// Fails only when the file cannot be opened or its preamble is unusable (for example a
/// configured `ts_field` that is not among the columns). An empty file gives a cursor that
/// is already exhausted.
pub fn decode(path: &Path, file_type: FileType, options: &DecodeOptions) -> Result<BatchCursor> {
    options.validate()?;

    let file = File::open(path)?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(options.delimiter_byte()?)
        .quote(options.quote_byte()?)
        .from_reader(file);

    let layout = match file_type {
        FileType::Generic => generic::read_layout(&mut reader, options),
        FileType::Siemens => siemens::read_layout(&mut reader, options),
    }
    .map_err(|e| match e {
        SiphonError::Config(msg) => SiphonError::config(format!("{}: {}", path.display(), msg)),
        other => other,
    })?;

    Ok(BatchCursor::new(path, reader, layout, options.chunk_size))
}

/// Read the next row into `row`, returning its line number or `None` at end of file.
///
/// Fields are decoded with `String::from_utf8_lossy`, so Latin-1 exports (`°F` headers and
/// the like) still decode with replacement characters.
fn read_lossy(reader: &mut csv::Reader<File>, row: &mut StringRecord) -> csv::Result<Option<u64>> {
    let mut raw = ByteRecord::new();
    if !reader.read_byte_record(&mut raw)? {
        return Ok(None);
    }
    let line = raw.position().map(|p| p.line()).unwrap_or_default();
    *row = StringRecord::from_byte_record_lossy(raw);
    Ok(Some(line))
}

/// Read the next preamble row, treating a parse failure as a decode error
pub(crate) fn next_row(reader: &mut csv::Reader<File>, row: &mut StringRecord) -> Result<bool> {
    read_lossy(reader, row)
        .map(|line| line.is_some())
        .map_err(|e| SiphonError::decode(e.to_string()))
}
