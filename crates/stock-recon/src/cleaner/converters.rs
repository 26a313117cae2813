//! Type conversion functions for the structural cleaner.

use crate::utils::{days_from_date, parse_quantity};
use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime};
use polars::prelude::*;

/// Date layouts accepted in a block's date cell, tried in order.
///
/// Slash dates with the year last are read day-first.
const DATE_FORMATS: [&str; 10] = [
    "%Y-%m-%d",
    "%Y-%b-%d",
    "%Y-%B-%d",
    "%d-%b-%Y",
    "%d-%B-%Y",
    "%Y/%m/%d",
    "%d/%m/%Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%b%d,%Y",
];

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// Parse a record date from any accepted textual form.
pub(crate) fn parse_record_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Some(date);
        }
    }

    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(dt.date());
        }
    }

    // Anything longer that starts with an ISO date (e.g. a timezone suffix)
    trimmed
        .get(..10)
        .filter(|_| trimmed.len() > 10)
        .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
}

/// Convert a text date series to a `Date` series.
///
/// Returns the converted series and the number of non-null inputs that could
/// not be parsed (those become null).
pub(crate) fn string_to_date(series: &Series) -> Result<(Series, usize)> {
    let str_series = series.str()?;
    let mut unparseable = 0;
    let mut days: Vec<Option<i32>> = Vec::with_capacity(str_series.len());

    for opt_val in str_series.into_iter() {
        match opt_val {
            Some(val) => match parse_record_date(val) {
                Some(date) => days.push(Some(days_from_date(date))),
                None => {
                    unparseable += 1;
                    days.push(None);
                }
            },
            None => days.push(None),
        }
    }

    let result = Series::new(series.name().clone(), days).cast(&DataType::Date)?;
    Ok((result, unparseable))
}

/// Convert a text quantity series to Float64.
///
/// Returns the converted series and the number of non-null inputs that were
/// not numeric (those become null).
pub(crate) fn string_to_quantity(series: &Series) -> Result<(Series, usize)> {
    let str_series = series.str()?;
    let mut non_numeric = 0;
    let mut values: Vec<Option<f64>> = Vec::with_capacity(str_series.len());

    for opt_val in str_series.into_iter() {
        match opt_val {
            Some(val) => {
                let parsed = parse_quantity(val);
                if parsed.is_none() {
                    non_numeric += 1;
                }
                values.push(parsed);
            }
            None => values.push(None),
        }
    }

    Ok((Series::new(series.name().clone(), values), non_numeric))
}
