//! Tabular normalization: turns a staged spreadsheet into the canonical CSV
//! artifact the statement generator consumes.
//!
//! Normalization renames the leading column to the canonical reading-time
//! field, renames the measurement column when its heading matches a known
//! label exactly, and rewrites every all-timestamp column in the canonical
//! minute-precision format. Anything the reader cannot parse is reported as
//! an outcome, not an error; the staged source is left untouched for
//! inspection.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use log::info;

use crate::data::{
    COMPACT_DATE_FORMAT, ENERGY_FIELD, ENERGY_SOURCE_LABEL, POWER_FIELD, POWER_SOURCE_LABEL,
    READING_TIME_FIELD, READING_TIME_FORMAT, Value, parse_reading_time,
};
use crate::sheet::{self, RowTable};

#[derive(Debug, Clone, PartialEq)]
pub enum NormalizeOutcome {
    Normalized { rows: usize },
    /// The source could not be read as a spreadsheet. The staged file stays
    /// in place and no artifact is written.
    Unparsable { reason: String },
}

/// Name of the normalized artifact for an attachment staged from a message
/// sent on `message_date`.
pub fn artifact_name(attachment: &Path, message_date: NaiveDate) -> String {
    let stem = attachment
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("attachment");
    format!(
        "{stem}_{}.csv",
        message_date.format(COMPACT_DATE_FORMAT)
    )
}

/// Reads `source` and writes the normalized table to `artifact`. The
/// artifact is only created once the whole source has parsed; a parse
/// failure leaves no partial output behind.
pub fn normalize_attachment(source: &Path, artifact: &Path) -> Result<NormalizeOutcome> {
    let mut table = match sheet::read_table(source) {
        Ok(table) => table,
        Err(err) => {
            return Ok(NormalizeOutcome::Unparsable {
                reason: format!("{err:#}"),
            });
        }
    };
    if table.headers.is_empty() {
        return Ok(NormalizeOutcome::Unparsable {
            reason: format!("{source:?} has no columns"),
        });
    }

    rename_headers(&mut table.headers);
    let timestamp_columns = timestamp_columns(&table);

    let mut writer = csv::WriterBuilder::new()
        .from_path(artifact)
        .with_context(|| format!("Creating normalized artifact {artifact:?}"))?;
    writer
        .write_record(&table.headers)
        .with_context(|| format!("Writing header row of {artifact:?}"))?;
    for row in &table.rows {
        let rendered: Vec<String> = row
            .iter()
            .zip(&timestamp_columns)
            .map(|(value, is_timestamp)| render_cell(value, *is_timestamp))
            .collect();
        writer
            .write_record(&rendered)
            .with_context(|| format!("Writing data row of {artifact:?}"))?;
    }
    writer
        .flush()
        .with_context(|| format!("Flushing normalized artifact {artifact:?}"))?;

    let rows = table.rows.len();
    info!("Normalized {source:?} into {artifact:?} ({rows} rows)");
    Ok(NormalizeOutcome::Normalized { rows })
}

fn rename_headers(headers: &mut [String]) {
    headers[0] = READING_TIME_FIELD.to_string();
    if let Some(measurement) = headers.get_mut(1) {
        if measurement == ENERGY_SOURCE_LABEL {
            *measurement = ENERGY_FIELD.to_string();
        } else if measurement == POWER_SOURCE_LABEL {
            *measurement = POWER_FIELD.to_string();
        }
    }
}

/// A column is a timestamp column when every non-empty value parses as a
/// reading timestamp and at least one value does. The candidate flag starts
/// true and is cleared by the first value that disqualifies the column.
fn timestamp_columns(table: &RowTable) -> Vec<bool> {
    let width = table.width();
    let mut candidate = vec![true; width];
    let mut seen_value = vec![false; width];
    for row in &table.rows {
        for (idx, value) in row.iter().enumerate().take(width) {
            if !candidate[idx] {
                continue;
            }
            match value {
                Value::Empty => {}
                Value::DateTime(_) => seen_value[idx] = true,
                Value::Text(text) => {
                    if parse_reading_time(text).is_ok() {
                        seen_value[idx] = true;
                    } else {
                        candidate[idx] = false;
                    }
                }
                _ => candidate[idx] = false,
            }
        }
    }
    candidate
        .into_iter()
        .zip(seen_value)
        .map(|(candidate, seen)| candidate && seen)
        .collect()
}

fn render_cell(value: &Value, is_timestamp: bool) -> String {
    if !is_timestamp {
        return value.as_display();
    }
    match value {
        Value::Empty => String::new(),
        Value::DateTime(dt) => dt.format(READING_TIME_FORMAT).to_string(),
        Value::Text(text) => match parse_reading_time(text) {
            Ok(parsed) => parsed.format(READING_TIME_FORMAT).to_string(),
            Err(_) => value.as_display(),
        },
        other => other.as_display(),
    }
}
