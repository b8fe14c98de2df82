//! Loading of harvested attachments into in-memory row tables.
//!
//! Workbook formats (`.xlsx`, `.xls`) are read through `calamine`; delimited
//! text (`.csv`) goes through the `csv` crate with a strict UTF-8 decode.
//! Only the first worksheet of a workbook is read.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use calamine::{Data, Reader, open_workbook_auto};
use encoding_rs::{Encoding, UTF_8};

use crate::data::{Value, parse_naive_datetime};

/// Attachment extensions the pipeline recognizes as spreadsheets.
pub const SPREADSHEET_EXTENSIONS: &[&str] = &["xlsx", "xls", "csv"];

#[derive(Debug, Clone, PartialEq)]
pub struct RowTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl RowTable {
    pub fn width(&self) -> usize {
        self.headers.len()
    }
}

pub fn is_spreadsheet_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            SPREADSHEET_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

/// Reads the first worksheet (or the delimited file body) into a table whose
/// first row becomes the header row.
pub fn read_table(path: &Path) -> Result<RowTable> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .ok_or_else(|| anyhow!("File {path:?} has no recognizable extension"))?;
    match extension.as_str() {
        "xlsx" | "xls" => read_workbook_table(path),
        "csv" => read_delimited_table(path),
        other => Err(anyhow!("Unsupported spreadsheet extension '{other}'")),
    }
}

fn read_workbook_table(path: &Path) -> Result<RowTable> {
    let mut workbook =
        open_workbook_auto(path).with_context(|| format!("Opening workbook {path:?}"))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| anyhow!("Workbook {path:?} contains no worksheets"))?
        .with_context(|| format!("Reading first worksheet of {path:?}"))?;

    let mut rows = range.rows();
    let headers: Vec<String> = rows
        .next()
        .ok_or_else(|| anyhow!("Worksheet in {path:?} is empty"))?
        .iter()
        .map(|cell| cell_to_value(cell).as_display())
        .collect();
    let rows = rows
        .map(|row| row.iter().map(cell_to_value).collect())
        .collect();
    Ok(RowTable { headers, rows })
}

fn read_delimited_table(path: &Path) -> Result<RowTable> {
    let bytes = fs::read(path).with_context(|| format!("Reading delimited file {path:?}"))?;
    let text = decode_bytes(&bytes, UTF_8)
        .with_context(|| format!("Decoding delimited file {path:?}"))?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .double_quote(true)
        .flexible(false)
        .from_reader(text.as_bytes());

    let mut records = reader.records();
    let headers: Vec<String> = records
        .next()
        .ok_or_else(|| anyhow!("Delimited file {path:?} is empty"))?
        .with_context(|| format!("Reading header row of {path:?}"))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    for record in records {
        let record = record.with_context(|| format!("Reading data row of {path:?}"))?;
        rows.push(record.iter().map(text_to_value).collect());
    }
    Ok(RowTable { headers, rows })
}

fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(anyhow!(
            "Failed to decode text with encoding {}",
            encoding.name()
        ))
    } else {
        Ok(text.into_owned())
    }
}

fn text_to_value(field: &str) -> Value {
    if field.is_empty() {
        Value::Empty
    } else {
        Value::Text(field.to_string())
    }
}

fn cell_to_value(cell: &Data) -> Value {
    match cell {
        Data::Empty => Value::Empty,
        Data::String(s) if s.is_empty() => Value::Empty,
        Data::String(s) => Value::Text(s.clone()),
        Data::Int(i) => Value::Integer(*i),
        Data::Float(f) => Value::Float(*f),
        Data::Bool(b) => Value::Boolean(*b),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(parsed) => Value::DateTime(parsed),
            None => Value::Float(dt.as_f64()),
        },
        Data::DateTimeIso(s) => match parse_naive_datetime(s) {
            Ok(parsed) => Value::DateTime(parsed),
            Err(_) => Value::Text(s.clone()),
        },
        Data::DurationIso(s) => Value::Text(s.clone()),
        // Formula errors surface like blank cells rather than poisoning the
        // whole attachment.
        Data::Error(_) => Value::Empty,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn recognizes_spreadsheet_extensions_case_insensitively() {
        assert!(is_spreadsheet_name("readings.xlsx"));
        assert!(is_spreadsheet_name("READINGS.XLS"));
        assert!(is_spreadsheet_name("daily.Csv"));
        assert!(!is_spreadsheet_name("notes.txt"));
        assert!(!is_spreadsheet_name("archive.zip"));
        assert!(!is_spreadsheet_name("no_extension"));
    }

    #[test]
    fn reads_delimited_table_with_typed_empties() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daily.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "Date,Energy Usage(kWh)").unwrap();
        writeln!(file, "2024-05-01 00:00,12.5").unwrap();
        writeln!(file, "2024-05-02 00:00,").unwrap();
        drop(file);

        let table = read_table(&path).unwrap();
        assert_eq!(table.headers, vec!["Date", "Energy Usage(kWh)"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0][1], Value::Text("12.5".to_string()));
        assert_eq!(table.rows[1][1], Value::Empty);
    }

    #[test]
    fn invalid_utf8_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.csv");
        // 0xB0 is not valid standalone UTF-8.
        std::fs::write(&path, b"Temp \xb0C\n21\n").unwrap();
        assert!(read_table(&path).is_err());
    }

    #[test]
    fn ragged_delimited_rows_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ragged.csv");
        std::fs::write(&path, "a,b\n1,2,3\n").unwrap();
        assert!(read_table(&path).is_err());
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        assert!(read_table(Path::new("/nonexistent/notes.txt")).is_err());
    }
}
