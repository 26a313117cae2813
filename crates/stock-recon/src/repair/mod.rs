//! Gap-aware outlier detection and repair.
//!
//! Every (item, warehouse) series is ordered by date and repaired from its own
//! nearest valid neighbors. Only rows that exist are touched; no date is ever
//! added to a series.

mod neighbors;

pub use neighbors::{
    OutlierReason, RepairAction, SeriesRepair, choose_action, detect_outlier, next_valid,
    prev_valid, repair_series,
};

use crate::cleaner::dedup_by_business_key;
use crate::config::{DEFAULT_ABS_JUMP, DEFAULT_REL_JUMP};
use crate::error::{ReconError, Result};
use crate::types::{
    AVG_PRICE, CURATED_COLUMNS, IS_COMMITED, ITEM_CODE, ON_HAND, ON_HAND_RAW, ON_ORDER,
    OUTLIER_FLAG, RECORD_DATE, RepairStats, VALID_FOR, ValidFor, WHS_CODE,
};
use crate::utils::{date_days, f64_values, str_values};
use polars::prelude::*;
use rayon::ThreadPool;
use rayon::prelude::*;
use tracing::{debug, info};

/// Repaired curated table plus counters.
#[derive(Debug, Clone)]
pub struct RepairOutput {
    pub table: DataFrame,
    pub stats: RepairStats,
}

/// Row positions of one (item, warehouse) series, in date order.
struct SeriesGroup {
    rows: Vec<usize>,
}

/// Detects and repairs outliers and nulls per (item, warehouse) series.
#[derive(Debug, Clone, Copy)]
pub struct OutlierRepairer {
    abs_jump: f64,
    rel_jump: f64,
}

impl Default for OutlierRepairer {
    fn default() -> Self {
        Self::new(DEFAULT_ABS_JUMP, DEFAULT_REL_JUMP)
    }
}

impl OutlierRepairer {
    pub fn new(abs_jump: f64, rel_jump: f64) -> Self {
        Self { abs_jump, rel_jump }
    }

    /// Repair a cleaned table and return it in curated form.
    ///
    /// The input is first deduplicated on the business key so that every
    /// series holds one row per date. Surviving rows keep their input order.
    /// Series are repaired in parallel, on `pool` when one is given and on the
    /// global rayon pool otherwise.
    pub fn repair(&self, df: &DataFrame, pool: Option<&ThreadPool>) -> Result<RepairOutput> {
        for name in [ITEM_CODE, WHS_CODE, ON_HAND, RECORD_DATE] {
            if df.column(name).is_err() {
                return Err(ReconError::ColumnNotFound(name.to_string()));
            }
        }

        let (df, removed) = dedup_by_business_key(df)?;
        if removed > 0 {
            debug!("Safety deduplication removed {} rows", removed);
        }
        let df = &df;

        let on_hand = f64_values(df, ON_HAND)?;
        let groups = group_series(df)?;
        info!(
            "Repairing {} rows across {} series (abs_jump={}, rel_jump={})",
            df.height(),
            groups.len(),
            self.abs_jump,
            self.rel_jump
        );

        let run = || {
            groups
                .par_iter()
                .map(|group| {
                    let values: Vec<Option<f64>> =
                        group.rows.iter().map(|&row| on_hand[row]).collect();
                    repair_series(&values, self.abs_jump, self.rel_jump)
                })
                .collect::<Vec<_>>()
        };
        let repaired = match pool {
            Some(pool) => pool.install(run),
            None => run(),
        };

        let mut values = on_hand.clone();
        let mut flags = vec![false; df.height()];
        let mut stats = RepairStats {
            duplicates_removed: removed,
            ..Default::default()
        };
        for (group, result) in groups.iter().zip(&repaired) {
            for (pos, &row) in group.rows.iter().enumerate() {
                values[row] = result.values[pos];
                flags[row] = result.flags[pos];
            }
            stats.absorb(&result.stats);
        }

        let mut table = df.clone();
        table.with_column(Column::new(ON_HAND.into(), values))?;
        table.with_column(Column::new(OUTLIER_FLAG.into(), flags))?;
        table.with_column(Column::new(ON_HAND_RAW.into(), on_hand))?;
        fill_defaults(&mut table)?;
        let table = table.select(CURATED_COLUMNS)?;

        info!(
            "Repair complete: {} outliers flagged ({} abs, {} rel, {} both), {} nulls filled, {} left null",
            stats.outliers_flagged(),
            stats.outliers_abs_only,
            stats.outliers_rel_only,
            stats.outliers_both,
            stats.nulls_filled,
            stats.nulls_remaining
        );

        Ok(RepairOutput { table, stats })
    }
}

/// Partition rows by (item, warehouse), each partition ordered by date.
fn group_series(df: &DataFrame) -> Result<Vec<SeriesGroup>> {
    let items = str_values(df, ITEM_CODE)?;
    let whs = str_values(df, WHS_CODE)?;
    let dates = date_days(df, RECORD_DATE)?;

    let mut order: Vec<usize> = (0..df.height()).collect();
    order.sort_by(|&a, &b| {
        (&items[a], &whs[a], dates[a], a).cmp(&(&items[b], &whs[b], dates[b], b))
    });

    let mut groups: Vec<SeriesGroup> = Vec::new();
    for row in order {
        match groups.last_mut() {
            Some(group)
                if group
                    .rows
                    .first()
                    .is_some_and(|&first| items[first] == items[row] && whs[first] == whs[row]) =>
            {
                group.rows.push(row);
            }
            _ => groups.push(SeriesGroup { rows: vec![row] }),
        }
    }
    Ok(groups)
}

/// Auxiliary columns default to 0.0 and `ValidFor` to `Y` when absent or null.
fn fill_defaults(df: &mut DataFrame) -> Result<()> {
    let height = df.height();
    for name in [IS_COMMITED, ON_ORDER, AVG_PRICE] {
        let filled: Vec<f64> = if df.column(name).is_ok() {
            f64_values(df, name)?
                .into_iter()
                .map(|v| v.unwrap_or(0.0))
                .collect()
        } else {
            vec![0.0; height]
        };
        df.with_column(Column::new(name.into(), filled))?;
    }

    let valid: Vec<String> = if df.column(VALID_FOR).is_ok() {
        str_values(df, VALID_FOR)?
            .into_iter()
            .map(|v| v.unwrap_or_else(|| ValidFor::Y.as_str().to_string()))
            .collect()
    } else {
        vec![ValidFor::Y.as_str().to_string(); height]
    };
    df.with_column(Column::new(VALID_FOR.into(), valid))?;
    Ok(())
}
