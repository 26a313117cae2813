//! Business-key deduplication shared by the cleaner, the repairer and the merger.

use crate::types::{BUSINESS_KEY, ON_HAND};
use crate::utils::{f64_values, str_values};
use polars::prelude::*;
use std::collections::HashMap;
use std::collections::hash_map::Entry;

type BusinessKey = (Option<String>, Option<String>, Option<String>);

/// Keep one row per (item, warehouse, date).
///
/// Among colliding rows the highest `OnHand` wins, with null ranked lowest.
/// Remaining ties keep the earliest row. Surviving rows keep their relative
/// input order. Returns the deduplicated table and the number of rows removed.
pub fn dedup_by_business_key(df: &DataFrame) -> PolarsResult<(DataFrame, usize)> {
    let [item_col, whs_col, date_col] = BUSINESS_KEY;
    let items = str_values(df, item_col)?;
    let whs = str_values(df, whs_col)?;
    let dates = str_values(df, date_col)?;
    let on_hand = f64_values(df, ON_HAND)?;

    let mut winners: HashMap<BusinessKey, usize> = HashMap::with_capacity(df.height());
    for row in 0..df.height() {
        let key = (items[row].clone(), whs[row].clone(), dates[row].clone());
        match winners.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(row);
            }
            Entry::Occupied(mut slot) => {
                if outranks(on_hand[row], on_hand[*slot.get()]) {
                    slot.insert(row);
                }
            }
        }
    }

    let removed = df.height() - winners.len();
    if removed == 0 {
        return Ok((df.clone(), 0));
    }

    let mut kept: Vec<IdxSize> = winners.into_values().map(|row| row as IdxSize).collect();
    kept.sort_unstable();
    let idx = IdxCa::from_vec("idx".into(), kept);
    Ok((df.take(&idx)?, removed))
}

/// Strictly greater, with null below every value. Equal values do not outrank.
fn outranks(candidate: Option<f64>, current: Option<f64>) -> bool {
    match (candidate, current) {
        (Some(c), Some(k)) => c > k,
        (Some(_), None) => true,
        _ => false,
    }
}
