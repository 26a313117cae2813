//! Shared utilities for the reconciliation pipeline.
//!
//! Column extraction helpers that turn polars columns into plain vectors,
//! quantity parsing, and small identifier checks.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use polars::prelude::*;
use regex::Regex;

// =============================================================================
// Column Extraction Utilities
// =============================================================================

/// Read a column as optional strings, casting non-string columns first.
pub fn str_values(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<String>>> {
    let series = df.column(name)?.as_materialized_series().cast(&DataType::String)?;
    Ok(series
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect())
}

/// Read a column as optional f64 values. Unparseable values become null.
pub fn f64_values(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<f64>>> {
    let series = df
        .column(name)?
        .as_materialized_series()
        .cast(&DataType::Float64)?;
    Ok(series.f64()?.into_iter().collect())
}

/// Read a boolean column.
pub fn bool_values(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<bool>>> {
    let series = df.column(name)?.as_materialized_series().cast(&DataType::Boolean)?;
    Ok(series.bool()?.into_iter().collect())
}

/// Read a `Date` column as days since the Unix epoch.
pub fn date_days(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<i32>>> {
    let series = df.column(name)?.as_materialized_series().cast(&DataType::Int32)?;
    Ok(series.i32()?.into_iter().collect())
}

/// Build a `Date` column from days since the Unix epoch.
pub fn date_column(name: &str, days: Vec<Option<i32>>) -> PolarsResult<Column> {
    Column::new(name.into(), days).cast(&DataType::Date)
}

/// The Unix epoch as a calendar date.
pub fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

/// Days since the Unix epoch for a calendar date.
pub fn days_from_date(date: NaiveDate) -> i32 {
    (date - epoch()).num_days() as i32
}

/// Calendar date for a count of days since the Unix epoch.
pub fn date_from_days(days: i32) -> Option<NaiveDate> {
    epoch().checked_add_signed(chrono::Duration::days(days as i64))
}

// =============================================================================
// String Parsing Utilities
// =============================================================================

/// Characters commonly used in numeric formatting that should be stripped.
pub const NUMERIC_FORMAT_CHARS: [char; 3] = [',', '_', ' '];

/// Common error/missing value markers in spreadsheet exports.
pub const ERROR_MARKERS: [&str; 9] = [
    "error", "unknown", "n/a", "na", "null", "missing", "none", "#n/a", "nan",
];

/// Clean a string for numeric parsing by removing grouping characters.
pub fn clean_numeric_string(s: &str) -> String {
    let mut result = s.trim().to_string();
    for c in NUMERIC_FORMAT_CHARS {
        result = result.replace(c, "");
    }
    result
}

/// Check if a string is an error/missing value marker.
pub fn is_error_marker(s: &str) -> bool {
    let lower = s.trim().to_ascii_lowercase();
    ERROR_MARKERS.iter().any(|&marker| lower == marker)
}

/// Parse a quantity cell. Returns `None` for anything that is not a finite number.
pub fn parse_quantity(s: &str) -> Option<f64> {
    if is_error_marker(s) {
        return None;
    }
    let cleaned = clean_numeric_string(s);
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

// =============================================================================
// Identifier Utilities
// =============================================================================

static TABLE_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$")
        .expect("table name pattern is valid")
});

/// Check that a (optionally schema-qualified) table name is a plain identifier.
pub fn is_valid_table_name(name: &str) -> bool {
    TABLE_NAME_RE.is_match(name)
}
