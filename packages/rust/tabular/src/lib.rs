//! Tabular ingestion: CSV text in, validated string rows out.
//!
//! Header cells are normalized to camel-style keys and must all belong to the
//! expected column set. Cell values are trimmed and nullish text (`""`,
//! `none`, `null`, `nil`, any case) becomes `None`. No other coercion happens
//! here; numbers and dates are interpreted downstream.

use std::io::Read;
use std::sync::{Arc, LazyLock};

use civicetl_shared::{CivicError, Result};
use csv::{ReaderBuilder, StringRecord, Trim};
use regex::Regex;
use tracing::debug;

// ---------------------------------------------------------------------------
// Normalization rules
// ---------------------------------------------------------------------------

/// Normalize a raw header cell to its canonical camel-style key.
///
/// `"First Name"` → `"firstName"`, `"_id"` → `"id"`, `"Agenda Item #"` → `"agendaItemNumber"`.
pub fn normalize_header(raw: &str) -> String {
    static WORD_BREAK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[\s/]+(\w)").expect("valid regex"));

    let lowered = raw.trim_start_matches('\u{feff}').trim().to_lowercase();
    let stripped = lowered
        .strip_prefix(['/', '_'])
        .unwrap_or(&lowered)
        .replace('#', "number");

    WORD_BREAK_RE
        .replace_all(&stripped, |caps: &regex::Captures<'_>| caps[1].to_uppercase())
        .into_owned()
}

/// Whether a cell's text stands for "no value".
pub fn is_nullish(value: &str) -> bool {
    let lowered = value.trim().to_lowercase();
    matches!(lowered.as_str(), "" | "none" | "null" | "nil")
}

/// Trim a cell and map nullish text to `None`.
pub fn cast_nullish(value: &str) -> Option<String> {
    if is_nullish(value) {
        None
    } else {
        Some(value.trim().to_string())
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// A parser bound to one expected column set. Consumed by [`TabularParser::parse`];
/// build a new one per stream.
#[derive(Debug, Clone)]
pub struct TabularParser {
    expected: Vec<String>,
}

/// Create a parser that accepts only the given (already normalized) columns.
pub fn make_parser(expected_columns: &[&str]) -> TabularParser {
    TabularParser {
        expected: expected_columns.iter().map(|c| c.to_string()).collect(),
    }
}

impl TabularParser {
    /// Read and validate the header, returning a lazy iterator over rows.
    ///
    /// Fails with [`CivicError::UnexpectedColumn`] on the first header cell
    /// that does not normalize to an expected column.
    pub fn parse<R: Read>(self, reader: R) -> Result<TabularRows<R>> {
        let mut reader = ReaderBuilder::new().trim(Trim::All).from_reader(reader);

        let headers = reader
            .headers()
            .map_err(|e| CivicError::parse(format!("failed to read CSV header: {e}")))?
            .clone();

        let mut columns = Vec::with_capacity(headers.len());
        for raw in headers.iter() {
            let key = normalize_header(raw);
            if !self.expected.contains(&key) {
                return Err(CivicError::UnexpectedColumn {
                    column: raw.to_string(),
                });
            }
            columns.push(key);
        }
        debug!(columns = columns.len(), "CSV header accepted");

        Ok(TabularRows {
            reader,
            columns: columns.into(),
            record: StringRecord::new(),
        })
    }
}

/// Iterator over the data rows of one CSV stream, in source order.
pub struct TabularRows<R> {
    reader: csv::Reader<R>,
    columns: Arc<[String]>,
    record: StringRecord,
}

impl<R: Read> TabularRows<R> {
    /// Canonical keys of the accepted header, in source order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

impl<R: Read> Iterator for TabularRows<R> {
    type Item = Result<TabularRow>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.reader.read_record(&mut self.record) {
            Ok(false) => None,
            Ok(true) => {
                let line = self.record.position().map_or(0, |p| p.line());
                Some(Ok(TabularRow {
                    line,
                    columns: Arc::clone(&self.columns),
                    values: self.record.iter().map(cast_nullish).collect(),
                }))
            }
            Err(e) => {
                let line = e.position().map_or(0, |p| p.line());
                Some(Err(CivicError::parse(format!("CSV line {line}: {e}"))))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// TabularRow
// ---------------------------------------------------------------------------

/// One validated row keyed by canonical column name.
#[derive(Debug, Clone)]
pub struct TabularRow {
    line: u64,
    columns: Arc<[String]>,
    values: Vec<Option<String>>,
}

impl TabularRow {
    /// 1-based source line of this row.
    pub fn line(&self) -> u64 {
        self.line
    }

    /// Value of `column`, or `None` if it is absent or nullish.
    pub fn get(&self, column: &str) -> Option<&str> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.values.get(idx)?.as_deref()
    }

    /// Owned copy of [`TabularRow::get`].
    pub fn get_owned(&self, column: &str) -> Option<String> {
        self.get(column).map(str::to_string)
    }

    /// Value of `column`, failing if it is absent or nullish.
    pub fn required(&self, column: &str) -> Result<&str> {
        self.get(column).ok_or_else(|| {
            CivicError::validation(format!(
                "CSV line {}: required column {column} is empty",
                self.line
            ))
        })
    }
}
