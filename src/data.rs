use std::fmt;

use anyhow::{Result, anyhow};
use chrono::{NaiveDate, NaiveDateTime};

/// Column heading written for the leading timestamp column of every
/// normalized table, regardless of what the source spreadsheet called it.
pub const READING_TIME_FIELD: &str = "ReadingDate";

/// Source heading for daily energy readings and the normalized name it maps to.
pub const ENERGY_SOURCE_LABEL: &str = "Energy Usage(kWh)";
pub const ENERGY_FIELD: &str = "EnergyUsage_kWh";

/// Source heading for power readings and the normalized name it maps to.
pub const POWER_SOURCE_LABEL: &str = "Power(W)";
pub const POWER_FIELD: &str = "Power_W";

/// Rendering applied to every recognized timestamp value. Seconds are
/// deliberately truncated; downstream tables key readings by the minute.
pub const READING_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Compact message-date suffix baked into normalized artifact names.
pub const COMPACT_DATE_FORMAT: &str = "%Y%m%d";

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Empty,
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    DateTime(NaiveDateTime),
}

impl Value {
    pub fn as_display(&self) -> String {
        match self {
            Value::Empty => String::new(),
            Value::Text(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => {
                if f.fract() == 0.0 {
                    (*f as i64).to_string()
                } else {
                    f.to_string()
                }
            }
            Value::Boolean(b) => b.to_string(),
            Value::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

pub fn parse_naive_date(value: &str) -> Result<NaiveDate> {
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%Y/%m/%d", "%d-%m-%Y"];
    for fmt in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as date"))
}

pub fn parse_naive_datetime(value: &str) -> Result<NaiveDateTime> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%d/%m/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as datetime"))
}

/// Parses a cell as a reading timestamp. Bare dates are accepted and pinned
/// to midnight, matching how spreadsheet date cells surface without a time
/// component.
pub fn parse_reading_time(value: &str) -> Result<NaiveDateTime> {
    if let Ok(parsed) = parse_naive_datetime(value) {
        return Ok(parsed);
    }
    if let Ok(parsed) = parse_naive_date(value)
        && let Some(at_midnight) = parsed.and_hms_opt(0, 0, 0)
    {
        return Ok(at_midnight);
    }
    Err(anyhow!("Failed to parse '{value}' as reading timestamp"))
}
