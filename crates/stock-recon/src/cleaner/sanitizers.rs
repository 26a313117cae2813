//! Row normalization for wide spreadsheet exports.
//!
//! Turns a raw grid of text cells (header row included as data) into a
//! rectangular table with one header row and stable column identities.

use crate::error::{ReconError, Result};
use once_cell::sync::Lazy;
use polars::prelude::*;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use tracing::debug;

static NUMERIC_HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+(\.\d+)?$").expect("numeric header pattern is valid"));

/// Separator used when hashing whole rows.
const ROW_KEY_SEPARATOR: char = '\u{1f}';

/// Normalize a raw wide grid whose first row holds the headers.
///
/// - headers are trimmed; repeated headers get `.1`, `.2`, ... suffixes and
///   blank headers become `Unnamed: <index>`
/// - every cell has its whitespace removed; empty cells become null
/// - column 0 is always kept; other columns are dropped when their header is
///   blank, `Unnamed...`, or purely numeric
/// - exact duplicate rows are dropped, then only the first row per item id is kept
pub fn normalize_wide_table(raw: DataFrame) -> Result<DataFrame> {
    if raw.height() == 0 || raw.width() == 0 {
        return Err(ReconError::EmptyInput("no header row".to_string()));
    }

    let headers = disambiguate_headers(&read_header_row(&raw)?);
    let data = raw.slice(1, raw.height().saturating_sub(1));

    let mut columns = Vec::with_capacity(headers.len());
    for (idx, (col, header)) in data.get_columns().iter().zip(&headers).enumerate() {
        if idx > 0 && !is_kept_header(header) {
            debug!("Dropping column '{}'", header);
            continue;
        }
        let stripped = strip_whitespace(col.as_materialized_series())?;
        columns.push(stripped.with_name(header.as_str().into()).into_column());
    }

    let df = DataFrame::new(columns)?;
    let df = drop_duplicate_rows(df)?;
    drop_duplicate_items(df)
}

/// Read the first row of the raw grid as header text.
fn read_header_row(raw: &DataFrame) -> Result<Vec<String>> {
    raw.get_columns()
        .iter()
        .map(|col| -> Result<String> {
            let series = col.as_materialized_series().cast(&DataType::String)?;
            Ok(series
                .str()?
                .get(0)
                .map(|s| s.trim().to_string())
                .unwrap_or_default())
        })
        .collect()
}

/// Give every header a unique name the way spreadsheet readers do.
pub(crate) fn disambiguate_headers(headers: &[String]) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut taken: HashSet<String> = HashSet::new();
    let mut result = Vec::with_capacity(headers.len());

    for (idx, header) in headers.iter().enumerate() {
        let base = if header.is_empty() {
            format!("Unnamed: {idx}")
        } else {
            header.clone()
        };

        let mut name = base.clone();
        if taken.contains(&name) {
            let counter = seen.entry(base.clone()).or_insert(0);
            loop {
                *counter += 1;
                name = format!("{base}.{counter}");
                if !taken.contains(&name) {
                    break;
                }
            }
        }
        taken.insert(name.clone());
        result.push(name);
    }

    result
}

/// Whether a non-item column survives header filtering.
pub(crate) fn is_kept_header(header: &str) -> bool {
    let trimmed = header.trim();
    !(trimmed.is_empty() || trimmed.starts_with("Unnamed") || NUMERIC_HEADER_RE.is_match(trimmed))
}

/// Remove all whitespace from every cell; cells that end up empty become null.
fn strip_whitespace(series: &Series) -> Result<Series> {
    let series = series.cast(&DataType::String)?;
    let cleaned: Vec<Option<String>> = series
        .str()?
        .into_iter()
        .map(|opt| {
            opt.map(|v| v.chars().filter(|c| !c.is_whitespace()).collect::<String>())
                .filter(|v| !v.is_empty())
        })
        .collect();
    Ok(Series::new(series.name().clone(), cleaned))
}

fn row_values(df: &DataFrame) -> Result<Vec<Vec<Option<String>>>> {
    df.get_columns()
        .iter()
        .map(|col| -> Result<Vec<Option<String>>> {
            let series = col.as_materialized_series().cast(&DataType::String)?;
            Ok(series
                .str()?
                .into_iter()
                .map(|v| v.map(str::to_string))
                .collect())
        })
        .collect()
}

fn drop_duplicate_rows(df: DataFrame) -> Result<DataFrame> {
    let columns = row_values(&df)?;
    let mut seen = HashSet::with_capacity(df.height());
    let mut mask = Vec::with_capacity(df.height());

    for row in 0..df.height() {
        let key: String = columns
            .iter()
            .map(|col| col[row].as_deref().unwrap_or("\u{0}"))
            .collect::<Vec<_>>()
            .join(&ROW_KEY_SEPARATOR.to_string());
        mask.push(seen.insert(key));
    }

    let removed = mask.iter().filter(|keep| !**keep).count();
    if removed > 0 {
        debug!("Removed {} duplicate rows", removed);
    }
    Ok(df.filter(&BooleanChunked::from_slice("mask".into(), &mask))?)
}

fn drop_duplicate_items(df: DataFrame) -> Result<DataFrame> {
    let Some(first) = df.get_columns().first() else {
        return Ok(df);
    };
    let items = first.as_materialized_series().cast(&DataType::String)?;
    let mut seen: HashSet<Option<String>> = HashSet::new();
    let mask: Vec<bool> = items
        .str()?
        .into_iter()
        .map(|v| seen.insert(v.map(str::to_string)))
        .collect();

    let removed = mask.iter().filter(|keep| !**keep).count();
    if removed > 0 {
        debug!("Removed {} repeated item rows", removed);
    }
    Ok(df.filter(&BooleanChunked::from_slice("mask".into(), &mask))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_grid(rows: &[&[&str]]) -> DataFrame {
        let width = rows[0].len();
        let columns = (0..width)
            .map(|c| {
                let values: Vec<Option<&str>> = rows
                    .iter()
                    .map(|r| Some(r[c]).filter(|v| !v.is_empty()))
                    .collect();
                Column::new(format!("column_{}", c + 1).into(), values)
            })
            .collect();
        DataFrame::new(columns).unwrap()
    }

    fn names(df: &DataFrame) -> Vec<String> {
        df.get_column_names().iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_disambiguate_headers() {
        let headers: Vec<String> = ["ItemCode", "W01", "Date", "W01", "Date", ""]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            disambiguate_headers(&headers),
            vec!["ItemCode", "W01", "Date", "W01.1", "Date.1", "Unnamed: 5"]
        );
    }

    #[test]
    fn test_is_kept_header() {
        assert!(is_kept_header("W01"));
        assert!(is_kept_header("Date.1"));
        assert!(!is_kept_header("Unnamed: 4"));
        assert!(!is_kept_header("2024"));
        assert!(!is_kept_header("12.5"));
        assert!(!is_kept_header("  "));
    }

    #[test]
    fn test_normalize_filters_columns_and_strips_cells() {
        let raw = raw_grid(&[
            &["ItemCode", "W01", "7", "Date", ""],
            &[" A 1 ", "1 0", "x", "2024-Jan-02", "junk"],
            &["B", " ", "y", "2024-Jan-02", "junk"],
        ]);

        let df = normalize_wide_table(raw).unwrap();
        assert_eq!(names(&df), vec!["ItemCode", "W01", "Date"]);

        let items = df.column("ItemCode").unwrap().as_materialized_series().str().unwrap().clone();
        assert_eq!(items.get(0), Some("A1"));
        let w01 = df.column("W01").unwrap().as_materialized_series().str().unwrap().clone();
        assert_eq!(w01.get(0), Some("10"));
        assert_eq!(w01.get(1), None);
    }

    #[test]
    fn test_normalize_drops_duplicate_rows_and_items() {
        let raw = raw_grid(&[
            &["ItemCode", "W01", "Date"],
            &["A", "1", "2024-Jan-02"],
            &["A", "1", "2024-Jan-02"],
            &["A", "2", "2024-Jan-02"],
            &["B", "3", "2024-Jan-02"],
        ]);

        let df = normalize_wide_table(raw).unwrap();
        assert_eq!(df.height(), 2);
        let w01 = df.column("W01").unwrap().as_materialized_series().str().unwrap().clone();
        assert_eq!(w01.get(0), Some("1"));
        assert_eq!(w01.get(1), Some("3"));
    }

    #[test]
    fn test_normalize_empty_grid_is_structural() {
        let raw = DataFrame::new(vec![Column::new(
            "column_1".into(),
            Vec::<Option<&str>>::new(),
        )])
        .unwrap();
        let err = normalize_wide_table(raw).unwrap_err();
        assert!(err.is_structural());
    }
}
