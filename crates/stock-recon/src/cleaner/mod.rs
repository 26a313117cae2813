//! Structural cleaning of the long table.
//!
//! This module provides functionality for:
//! - Normalizing raw wide exports before reshaping
//! - Dropping rows that could not be formed
//! - Separating discontinued markers from quantities
//! - Casting quantities and normalizing record dates
//! - Business-key deduplication

mod converters;
mod dedup;
mod sanitizers;

pub use dedup::dedup_by_business_key;
pub use sanitizers::normalize_wide_table;

use crate::error::{ReconError, Result};
use crate::types::{
    AVG_PRICE, CleanStats, IS_COMMITED, ITEM_CODE, LONG_COLUMNS, ON_HAND, ON_ORDER, RECORD_DATE,
    VALID_FOR, ValidFor, WHS_CODE,
};
use converters::{string_to_date, string_to_quantity};
use polars::prelude::*;
use tracing::{debug, info, warn};

/// Columns of the cleaned quantity table, in order.
pub const CLEANED_COLUMNS: [&str; 8] = [
    ITEM_CODE,
    WHS_CODE,
    ON_HAND,
    IS_COMMITED,
    ON_ORDER,
    AVG_PRICE,
    VALID_FOR,
    RECORD_DATE,
];

/// Columns of the discontinued-marker table.
pub const DISCONTINUED_COLUMNS: [&str; 4] = [ITEM_CODE, WHS_CODE, RECORD_DATE, VALID_FOR];

/// Output of one cleaning pass.
#[derive(Debug, Clone)]
pub struct CleanOutput {
    /// Typed quantity rows, unique on the business key.
    pub table: DataFrame,
    /// Rows whose quantity was the discontinued sentinel.
    pub discontinued: DataFrame,
    pub stats: CleanStats,
}

/// Structural cleaner for the long table produced by the reshaper.
#[derive(Debug, Clone)]
pub struct StructuralCleaner {
    sentinel: String,
}

impl Default for StructuralCleaner {
    fn default() -> Self {
        Self::new("DC")
    }
}

impl StructuralCleaner {
    pub fn new(sentinel: impl Into<String>) -> Self {
        Self {
            sentinel: sentinel.into(),
        }
    }

    /// Clean a long table of text columns `ItemCode, WhsCode, OnHand, RecordDate`.
    ///
    /// Steps run in order:
    /// 1. drop rows with a null key field
    /// 2. split off discontinued markers (`ValidFor = N`)
    /// 3. cast `OnHand` to f64 and drop exact zeros
    /// 4. initialize auxiliary columns to 0.0
    /// 5. normalize `RecordDate` to a calendar date
    /// 6. deduplicate on the business key
    pub fn clean(&self, long: &DataFrame) -> Result<CleanOutput> {
        for name in LONG_COLUMNS {
            if long.column(name).is_err() {
                return Err(ReconError::ColumnNotFound(name.to_string()));
            }
        }

        info!("Cleaning {} long rows...", long.height());
        let mut stats = CleanStats {
            rows_in: long.height(),
            ..Default::default()
        };

        // 1. Null keys
        let df = long.select(LONG_COLUMNS)?;
        let df = df.filter(&not_null_mask(&df, &LONG_COLUMNS)?)?;
        stats.null_key_dropped = stats.rows_in - df.height();
        debug!("Dropped {} rows with a null key field", stats.null_key_dropped);

        // 2. Discontinued markers
        let is_sentinel: Vec<bool> = df
            .column(ON_HAND)?
            .as_materialized_series()
            .str()?
            .into_iter()
            .map(|v| v == Some(self.sentinel.as_str()))
            .collect();
        let is_quantity: Vec<bool> = is_sentinel.iter().map(|s| !s).collect();
        let markers = df.filter(&BooleanChunked::from_slice("mask".into(), &is_sentinel))?;
        let df = df.filter(&BooleanChunked::from_slice("mask".into(), &is_quantity))?;
        stats.discontinued = markers.height();
        let discontinued = self.discontinued_table(markers, &mut stats)?;

        // 3. Quantities
        let (on_hand, non_numeric) = string_to_quantity(df.column(ON_HAND)?.as_materialized_series())
            .map_err(|e| ReconError::CleaningFailed(e.to_string()))?;
        stats.non_numeric_nulled = non_numeric;
        if non_numeric > 0 {
            warn!("{} non-numeric quantities set to null", non_numeric);
        }
        let mut df = df;
        df.with_column(on_hand)?;
        let not_zero: BooleanChunked = df
            .column(ON_HAND)?
            .as_materialized_series()
            .f64()?
            .into_iter()
            .map(|v| v != Some(0.0))
            .collect();
        let before = df.height();
        let df = df.filter(&not_zero)?;
        stats.zero_dropped = before - df.height();

        // 4. Auxiliary columns
        let mut df = df;
        let height = df.height();
        for name in [IS_COMMITED, ON_ORDER, AVG_PRICE] {
            df.with_column(Column::new(name.into(), vec![0.0f64; height]))?;
        }
        df.with_column(Column::new(
            VALID_FOR.into(),
            vec![ValidFor::Y.as_str(); height],
        ))?;

        // 5. Record dates
        let (df, unparseable) = normalize_dates(df)?;
        stats.unparseable_dates += unparseable;

        // 6. Business-key deduplication, keyed on the parsed date
        let (df, removed) = dedup_by_business_key(&df)?;
        stats.duplicates_removed = removed;

        let table = df.select(CLEANED_COLUMNS)?;
        stats.rows_out = table.height();
        info!(
            "Cleaning complete: {} -> {} rows ({} discontinued, {} zero, {} duplicates)",
            stats.rows_in, stats.rows_out, stats.discontinued, stats.zero_dropped, removed
        );

        Ok(CleanOutput {
            table,
            discontinued,
            stats,
        })
    }

    fn discontinued_table(&self, markers: DataFrame, stats: &mut CleanStats) -> Result<DataFrame> {
        let mut markers = markers;
        let height = markers.height();
        markers.with_column(Column::new(
            VALID_FOR.into(),
            vec![ValidFor::N.as_str(); height],
        ))?;
        let (markers, unparseable) = normalize_dates(markers)?;
        stats.unparseable_dates += unparseable;
        let (markers, _) = dedup_by_business_key(&markers)?;
        let markers = markers.select(DISCONTINUED_COLUMNS)?;
        debug!("{} discontinued markers", markers.height());
        Ok(markers)
    }
}

/// Parse the text `RecordDate` column, dropping rows whose date did not parse.
fn normalize_dates(df: DataFrame) -> Result<(DataFrame, usize)> {
    let (dates, unparseable) = string_to_date(df.column(RECORD_DATE)?.as_materialized_series())
        .map_err(|e| ReconError::CleaningFailed(e.to_string()))?;
    if unparseable > 0 {
        warn!("Dropping {} rows with an unparseable record date", unparseable);
    }
    let mut df = df;
    df.with_column(dates)?;
    let df = df.filter(&not_null_mask(&df, &[RECORD_DATE])?)?;
    Ok((df, unparseable))
}

/// Rows where every named column is non-null.
fn not_null_mask(df: &DataFrame, columns: &[&str]) -> Result<BooleanChunked> {
    let mut mask = BooleanChunked::full("mask".into(), true, df.height());
    for name in columns {
        let present = df.column(name)?.as_materialized_series().is_not_null();
        mask = &mask & &present;
    }
    Ok(mask)
}
