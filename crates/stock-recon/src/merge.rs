//! Merging of curated period tables into one history.

use crate::cleaner::dedup_by_business_key;
use crate::error::{ReconError, Result, ResultExt};
use crate::types::{
    AVG_PRICE, CURATED_COLUMNS, IS_COMMITED, ITEM_CODE, ON_HAND, ON_HAND_RAW, ON_ORDER,
    OUTLIER_FLAG, RECORD_DATE, VALID_FOR, WHS_CODE,
};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Counters for one merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStats {
    pub sources: usize,
    pub rows_in: usize,
    pub duplicates_removed: usize,
    pub rows_out: usize,
}

/// Canonical dtype of every curated column.
fn curated_dtype(name: &str) -> DataType {
    match name {
        ITEM_CODE | WHS_CODE | VALID_FOR => DataType::String,
        RECORD_DATE => DataType::Date,
        OUTLIER_FLAG => DataType::Boolean,
        ON_HAND | ON_HAND_RAW | IS_COMMITED | ON_ORDER | AVG_PRICE => DataType::Float64,
        _ => DataType::String,
    }
}

/// Unions curated tables and keeps one row per business key.
#[derive(Debug, Clone, Copy, Default)]
pub struct SeriesMerger;

impl SeriesMerger {
    /// Merge named curated tables.
    ///
    /// Tables are matched by column name, so column order may differ, but
    /// every table must carry exactly the curated columns. Collisions keep the
    /// highest `OnHand`; among equals the earlier source wins.
    pub fn merge(&self, inputs: &[(String, DataFrame)]) -> Result<(DataFrame, MergeStats)> {
        let mut stats = MergeStats {
            sources: inputs.len(),
            ..Default::default()
        };

        let mut merged: Option<DataFrame> = None;
        for (source, table) in inputs {
            check_schema(source, table)?;
            let aligned = align(table).context(format!("Aligning '{source}'"))?;
            stats.rows_in += aligned.height();
            debug!("Merging {} rows from '{}'", aligned.height(), source);

            merged = Some(match merged {
                None => aligned,
                Some(mut acc) => {
                    acc.vstack_mut(&aligned)?;
                    acc
                }
            });
        }

        let merged = match merged {
            Some(df) => df,
            None => empty_curated()?,
        };

        let (merged, removed) = dedup_by_business_key(&merged)?;
        stats.duplicates_removed = removed;
        stats.rows_out = merged.height();
        info!(
            "Merged {} tables: {} -> {} rows ({} duplicates)",
            stats.sources, stats.rows_in, stats.rows_out, removed
        );

        Ok((merged, stats))
    }
}

fn check_schema(source: &str, table: &DataFrame) -> Result<()> {
    let expected: BTreeSet<String> = CURATED_COLUMNS.iter().map(|s| s.to_string()).collect();
    let found: BTreeSet<String> = table
        .get_column_names()
        .iter()
        .map(|s| s.to_string())
        .collect();

    if expected != found {
        return Err(ReconError::SchemaMismatch {
            source_name: source.to_string(),
            expected: expected.into_iter().collect(),
            found: found.into_iter().collect(),
        });
    }
    Ok(())
}

/// Reorder to the curated layout and cast to canonical dtypes.
fn align(table: &DataFrame) -> PolarsResult<DataFrame> {
    let columns = CURATED_COLUMNS
        .iter()
        .map(|name| table.column(name)?.cast(&curated_dtype(name)))
        .collect::<PolarsResult<Vec<_>>>()?;
    DataFrame::new(columns)
}

/// A curated table with no rows.
pub fn empty_curated() -> Result<DataFrame> {
    let columns = CURATED_COLUMNS
        .iter()
        .map(|name| Column::new_empty((*name).into(), &curated_dtype(name)))
        .collect();
    Ok(DataFrame::new(columns)?)
}
