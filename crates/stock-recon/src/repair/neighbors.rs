//! Neighbor lookups and per-series repair.
//!
//! All lookups read the pre-repair values, so each row's outcome depends only
//! on the original series and the rows can be evaluated in any order.

use crate::types::RepairStats;
use serde::{Deserialize, Serialize};

/// Which threshold(s) flagged a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierReason {
    Absolute,
    Relative,
    Both,
}

/// What happened to one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairAction {
    Unchanged,
    OutlierFromPrev(OutlierReason),
    OutlierFromNext(OutlierReason),
    NullFromPrev,
    NullFromNext,
    NullUnfilled,
}

impl RepairAction {
    pub fn is_outlier(&self) -> bool {
        matches!(self, Self::OutlierFromPrev(_) | Self::OutlierFromNext(_))
    }
}

/// Nearest earlier non-null value for every position.
pub fn prev_valid(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(values.len());
    let mut last = None;
    for value in values {
        out.push(last);
        if value.is_some() {
            last = *value;
        }
    }
    out
}

/// Nearest later non-null value for every position.
pub fn next_valid(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    let mut next = None;
    for (idx, value) in values.iter().enumerate().rev() {
        out[idx] = next;
        if value.is_some() {
            next = *value;
        }
    }
    out
}

/// Decide whether `value` jumped too far from `prev`.
///
/// The relative change is only defined for a non-zero `prev`. Without a
/// previous value nothing can be an outlier.
pub fn detect_outlier(
    value: Option<f64>,
    prev: Option<f64>,
    abs_jump: f64,
    rel_jump: f64,
) -> Option<OutlierReason> {
    let (value, prev) = (value?, prev?);
    let abs_change = (value - prev).abs();
    let by_abs = abs_change > abs_jump;
    let by_rel = prev != 0.0 && abs_change / prev.abs() > rel_jump;

    match (by_abs, by_rel) {
        (true, true) => Some(OutlierReason::Both),
        (true, false) => Some(OutlierReason::Absolute),
        (false, true) => Some(OutlierReason::Relative),
        (false, false) => None,
    }
}

/// Choose the repair for one row; the first matching rule wins.
pub fn choose_action(
    value: Option<f64>,
    prev: Option<f64>,
    next: Option<f64>,
    abs_jump: f64,
    rel_jump: f64,
) -> RepairAction {
    let outlier = detect_outlier(value, prev, abs_jump, rel_jump);
    match (outlier, value, prev, next) {
        (Some(reason), _, Some(_), _) => RepairAction::OutlierFromPrev(reason),
        (Some(reason), _, None, Some(_)) => RepairAction::OutlierFromNext(reason),
        (None, None, Some(_), _) => RepairAction::NullFromPrev,
        (None, None, None, Some(_)) => RepairAction::NullFromNext,
        (None, None, None, None) => RepairAction::NullUnfilled,
        _ => RepairAction::Unchanged,
    }
}

/// Repaired values and flags for one date-ordered series.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesRepair {
    pub values: Vec<Option<f64>>,
    pub flags: Vec<bool>,
    pub stats: RepairStats,
}

/// Repair one series already ordered by date.
pub fn repair_series(values: &[Option<f64>], abs_jump: f64, rel_jump: f64) -> SeriesRepair {
    let prev = prev_valid(values);
    let next = next_valid(values);
    let mut stats = RepairStats {
        series: 1,
        ..Default::default()
    };
    let mut repaired = Vec::with_capacity(values.len());
    let mut flags = Vec::with_capacity(values.len());

    for idx in 0..values.len() {
        let action = choose_action(values[idx], prev[idx], next[idx], abs_jump, rel_jump);
        let value = match action {
            RepairAction::OutlierFromPrev(_) | RepairAction::NullFromPrev => prev[idx],
            RepairAction::OutlierFromNext(_) | RepairAction::NullFromNext => next[idx],
            RepairAction::Unchanged | RepairAction::NullUnfilled => values[idx],
        };
        record(&mut stats, action);
        repaired.push(value);
        flags.push(action.is_outlier());
    }

    SeriesRepair {
        values: repaired,
        flags,
        stats,
    }
}

fn record(stats: &mut RepairStats, action: RepairAction) {
    let reason = match action {
        RepairAction::OutlierFromPrev(reason) => {
            stats.replaced_from_prev += 1;
            reason
        }
        RepairAction::OutlierFromNext(reason) => {
            stats.replaced_from_next += 1;
            reason
        }
        RepairAction::NullFromPrev | RepairAction::NullFromNext => {
            stats.nulls_filled += 1;
            return;
        }
        RepairAction::NullUnfilled => {
            stats.nulls_remaining += 1;
            return;
        }
        RepairAction::Unchanged => return,
    };
    match reason {
        OutlierReason::Absolute => stats.outliers_abs_only += 1,
        OutlierReason::Relative => stats.outliers_rel_only += 1,
        OutlierReason::Both => stats.outliers_both += 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const ABS: f64 = 500.0;
    const REL: f64 = 5.0;

    #[test]
    fn test_prev_and_next_valid() {
        let values = [None, Some(1.0), None, Some(3.0), None];
        assert_eq!(
            prev_valid(&values),
            vec![None, None, Some(1.0), Some(1.0), Some(3.0)]
        );
        assert_eq!(
            next_valid(&values),
            vec![Some(1.0), Some(3.0), Some(3.0), None, None]
        );
    }

    #[test]
    fn test_detect_outlier_reasons() {
        assert_eq!(detect_outlier(Some(5000.0), Some(10.0), ABS, REL), Some(OutlierReason::Both));
        assert_eq!(
            detect_outlier(Some(2000.0), Some(1000.0), ABS, REL),
            Some(OutlierReason::Absolute)
        );
        assert_eq!(
            detect_outlier(Some(70.0), Some(10.0), ABS, REL),
            Some(OutlierReason::Relative)
        );
        assert_eq!(detect_outlier(Some(12.0), Some(10.0), ABS, REL), None);
    }

    #[test]
    fn test_detect_outlier_boundaries_are_exclusive() {
        assert_eq!(detect_outlier(Some(1500.0), Some(1000.0), ABS, REL), None);
        assert_eq!(detect_outlier(Some(60.0), Some(10.0), ABS, REL), None);
    }

    #[test]
    fn test_detect_outlier_zero_prev_uses_absolute_only() {
        assert_eq!(detect_outlier(Some(400.0), Some(0.0), ABS, REL), None);
        assert_eq!(
            detect_outlier(Some(600.0), Some(0.0), ABS, REL),
            Some(OutlierReason::Absolute)
        );
    }

    #[test]
    fn test_detect_outlier_negative_prev() {
        assert_eq!(
            detect_outlier(Some(-100.0), Some(-10.0), ABS, REL),
            Some(OutlierReason::Relative)
        );
    }

    #[test]
    fn test_no_prev_never_outlier() {
        assert_eq!(detect_outlier(Some(1e9), None, ABS, REL), None);
        assert_eq!(detect_outlier(None, Some(10.0), ABS, REL), None);
    }

    #[test]
    fn test_spike_replaced_from_prev() {
        let values = [Some(10.0), Some(10.0), Some(5000.0), Some(12.0), Some(11.0)];
        let out = repair_series(&values, ABS, REL);

        assert_eq!(out.values[2], Some(10.0));
        assert!(out.flags[2]);
        assert_eq!(out.values[..2].to_vec(), vec![Some(10.0), Some(10.0)]);
        assert!(!out.flags[0] && !out.flags[1]);
    }

    #[test]
    fn test_row_after_spike_compares_against_raw_spike() {
        let values = [Some(10.0), Some(10.0), Some(5000.0), Some(12.0), Some(11.0)];
        let out = repair_series(&values, ABS, REL);

        assert_eq!(
            out.values,
            vec![Some(10.0), Some(10.0), Some(10.0), Some(5000.0), Some(11.0)]
        );
        assert_eq!(out.flags, vec![false, false, true, true, false]);
        assert_eq!(out.stats.outliers_both, 1);
        assert_eq!(out.stats.outliers_abs_only, 1);
        assert_eq!(out.stats.replaced_from_prev, 2);
    }

    #[test]
    fn test_leading_nulls_filled_from_next() {
        let values = [None, None, Some(20.0), Some(22.0)];
        let out = repair_series(&values, ABS, REL);

        assert_eq!(out.values, vec![Some(20.0), Some(20.0), Some(20.0), Some(22.0)]);
        assert_eq!(out.flags, vec![false; 4]);
        assert_eq!(out.stats.nulls_filled, 2);
    }

    #[test]
    fn test_inner_null_filled_from_prev() {
        let values = [Some(5.0), None, Some(7.0)];
        let out = repair_series(&values, ABS, REL);
        assert_eq!(out.values, vec![Some(5.0), Some(5.0), Some(7.0)]);
        assert_eq!(out.flags, vec![false; 3]);
    }

    #[test]
    fn test_single_null_left_alone() {
        let out = repair_series(&[None], ABS, REL);
        assert_eq!(out.values, vec![None]);
        assert_eq!(out.flags, vec![false]);
        assert_eq!(out.stats.nulls_remaining, 1);
    }

    #[test]
    fn test_neighbors_use_pre_repair_values() {
        // The second spike compares against the first spike, not its repair
        let values = [Some(10.0), Some(5000.0), Some(5001.0)];
        let out = repair_series(&values, ABS, REL);
        assert_eq!(out.values, vec![Some(10.0), Some(10.0), Some(5001.0)]);
        assert_eq!(out.flags, vec![false, true, false]);
    }

    #[test]
    fn test_repaired_trailing_spike_is_stable() {
        let values = [Some(10.0), Some(10.0), Some(5000.0)];
        let first = repair_series(&values, ABS, REL);
        assert_eq!(first.values, vec![Some(10.0); 3]);

        let second = repair_series(&first.values, ABS, REL);
        assert_eq!(second.stats.outliers_flagged(), 0);
        assert_eq!(second.values, first.values);
    }
}
