use std::collections::HashMap;

use csv::{ByteRecord, ReaderBuilder};
use orderlake_bucket::{BucketError, BucketStore, ObjectLocation};
use polars::prelude::*;
use tracing::{info, warn};

use crate::error::{EtlError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsvOptions {
    pub delimiter: u8,
    pub quote: u8,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: b'"',
        }
    }
}

#[derive(Debug)]
pub struct ReadOutcome {
    /// Every column is `String`; empty fields are null.
    pub frame: DataFrame,
    pub rows_read: usize,
    pub malformed_rows: usize,
}

pub async fn read_csv(
    store: &dyn BucketStore,
    location: &ObjectLocation,
    options: &CsvOptions,
) -> Result<ReadOutcome> {
    let bytes = store
        .get_object(location)
        .await
        .map_err(|err| source_error(location, err))?;

    let outcome = parse_csv(&bytes, options, &location.to_string())?;
    info!(
        source = %location,
        rows = outcome.rows_read,
        malformed_rows = outcome.malformed_rows,
        columns = outcome.frame.width(),
        "read source csv"
    );
    Ok(outcome)
}

fn source_error(location: &ObjectLocation, err: BucketError) -> EtlError {
    EtlError::SourceNotFound {
        location: location.to_string(),
        reason: err.to_string(),
    }
}

/// Parse delimited text with a header row. Rows with the wrong field count or
/// invalid UTF-8 are skipped and counted rather than failing the read.
pub fn parse_csv(contents: &[u8], options: &CsvOptions, label: &str) -> Result<ReadOutcome> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(options.delimiter)
        .quote(options.quote)
        .from_reader(contents);

    let mut records = reader.byte_records();
    let header = match records.next() {
        Some(Ok(record)) => record,
        Some(Err(err)) => {
            return Err(EtlError::Parse {
                location: label.to_string(),
                message: format!("unreadable header row: {err}"),
            })
        }
        None => {
            return Err(EtlError::Parse {
                location: label.to_string(),
                message: "input is empty; expected a header row".into(),
            })
        }
    };
    let names = header_names(&header).map_err(|message| EtlError::Parse {
        location: label.to_string(),
        message,
    })?;

    let mut columns: Vec<Vec<Option<String>>> = vec![Vec::new(); names.len()];
    let mut malformed_rows = 0usize;

    for (line_index, record) in records.enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(err) if err.is_io_error() => {
                return Err(EtlError::Parse {
                    location: label.to_string(),
                    message: err.to_string(),
                })
            }
            Err(err) => {
                warn!(source = label, line = line_index + 2, error = %err, "skipping malformed row");
                malformed_rows += 1;
                continue;
            }
        };

        if record.len() != names.len() {
            warn!(
                source = label,
                line = line_index + 2,
                expected = names.len(),
                found = record.len(),
                "skipping row with wrong field count"
            );
            malformed_rows += 1;
            continue;
        }

        let Some(fields) = decode_fields(&record) else {
            warn!(source = label, line = line_index + 2, "skipping row with invalid UTF-8");
            malformed_rows += 1;
            continue;
        };

        for (column, field) in columns.iter_mut().zip(fields) {
            column.push(field);
        }
    }

    let rows_read = columns.first().map_or(0, Vec::len);
    let series: Vec<Column> = names
        .iter()
        .zip(columns)
        .map(|(name, values)| Series::new(name.as_str().into(), values).into())
        .collect();
    let frame = DataFrame::new(series)?;

    Ok(ReadOutcome {
        frame,
        rows_read,
        malformed_rows,
    })
}

fn decode_fields(record: &ByteRecord) -> Option<Vec<Option<String>>> {
    record
        .iter()
        .map(|field| {
            std::str::from_utf8(field).ok().map(|text| {
                if text.is_empty() {
                    None
                } else {
                    Some(text.to_string())
                }
            })
        })
        .collect()
}

/// Blank names become `_c<index>`; every occurrence of a duplicated name gets its
/// column index appended.
fn header_names(header: &ByteRecord) -> std::result::Result<Vec<String>, String> {
    let mut raw = Vec::with_capacity(header.len());
    for (idx, field) in header.iter().enumerate() {
        let text = std::str::from_utf8(field)
            .map_err(|_| format!("header column {idx} is not valid UTF-8"))?;
        let text = if idx == 0 {
            text.trim_start_matches('\u{feff}')
        } else {
            text
        };
        let trimmed = text.trim();
        raw.push(if trimmed.is_empty() {
            format!("_c{idx}")
        } else {
            trimmed.to_string()
        });
    }

    let mut counts: HashMap<String, usize> = HashMap::new();
    for name in &raw {
        *counts.entry(name.to_lowercase()).or_default() += 1;
    }

    Ok(raw
        .into_iter()
        .enumerate()
        .map(|(idx, name)| {
            if counts.get(&name.to_lowercase()).copied().unwrap_or(0) > 1 {
                format!("{name}{idx}")
            } else {
                name
            }
        })
        .collect())
}
