use crate::utils::{
    bool_values, date_column, date_days, date_from_days, days_from_date, f64_values, str_values,
};
use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

// ============================================================================
// Column names
// ============================================================================

pub const ITEM_CODE: &str = "ItemCode";
pub const WHS_CODE: &str = "WhsCode";
pub const ON_HAND: &str = "OnHand";
pub const IS_COMMITED: &str = "IsCommited";
pub const ON_ORDER: &str = "OnOrder";
pub const AVG_PRICE: &str = "AvgPrice";
pub const VALID_FOR: &str = "ValidFor";
pub const RECORD_DATE: &str = "RecordDate";
pub const OUTLIER_FLAG: &str = "OutlierFlag";
pub const ON_HAND_RAW: &str = "OnHand_raw";

/// The business key: one observation per (item, warehouse, date).
pub const BUSINESS_KEY: [&str; 3] = [ITEM_CODE, WHS_CODE, RECORD_DATE];

/// Columns of the long table produced by the reshaper.
pub const LONG_COLUMNS: [&str; 4] = [ITEM_CODE, WHS_CODE, ON_HAND, RECORD_DATE];

/// Columns of the curated table, in output order.
pub const CURATED_COLUMNS: [&str; 10] = [
    ITEM_CODE,
    WHS_CODE,
    ON_HAND,
    IS_COMMITED,
    ON_ORDER,
    AVG_PRICE,
    VALID_FOR,
    RECORD_DATE,
    OUTLIER_FLAG,
    ON_HAND_RAW,
];

// ============================================================================
// Stock records
// ============================================================================

/// Whether a raw quantity cell was a real quantity (`Y`) or the
/// discontinued sentinel (`N`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ValidFor {
    #[default]
    Y,
    N,
}

impl ValidFor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Y => "Y",
            Self::N => "N",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "Y" | "y" => Some(Self::Y),
            "N" | "n" => Some(Self::N),
            _ => None,
        }
    }
}

/// One row of the curated table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockRecord {
    pub item_code: String,
    pub warehouse_code: String,
    pub record_date: NaiveDate,
    pub on_hand: Option<f64>,
    pub on_hand_raw: Option<f64>,
    pub outlier_flag: bool,
    pub valid_for: ValidFor,
    pub is_committed: f64,
    pub on_order: f64,
    pub avg_price: f64,
}

impl StockRecord {
    /// A freshly observed quantity with auxiliary fields defaulted.
    pub fn observed(
        item_code: impl Into<String>,
        warehouse_code: impl Into<String>,
        record_date: NaiveDate,
        on_hand: Option<f64>,
    ) -> Self {
        Self {
            item_code: item_code.into(),
            warehouse_code: warehouse_code.into(),
            record_date,
            on_hand,
            on_hand_raw: on_hand,
            outlier_flag: false,
            valid_for: ValidFor::Y,
            is_committed: 0.0,
            on_order: 0.0,
            avg_price: 0.0,
        }
    }

    /// Decode a curated table into records.
    ///
    /// Rows with a null key (which a curated table never contains) are skipped.
    pub fn from_frame(df: &DataFrame) -> PolarsResult<Vec<StockRecord>> {
        let items = str_values(df, ITEM_CODE)?;
        let whs = str_values(df, WHS_CODE)?;
        let dates = date_days(df, RECORD_DATE)?;
        let on_hand = f64_values(df, ON_HAND)?;
        let raw = f64_values(df, ON_HAND_RAW)?;
        let flags = bool_values(df, OUTLIER_FLAG)?;
        let valid = str_values(df, VALID_FOR)?;
        let committed = f64_values(df, IS_COMMITED)?;
        let on_order = f64_values(df, ON_ORDER)?;
        let avg_price = f64_values(df, AVG_PRICE)?;

        let mut records = Vec::with_capacity(df.height());
        for i in 0..df.height() {
            let (Some(item), Some(wh), Some(date)) = (
                items[i].clone(),
                whs[i].clone(),
                dates[i].and_then(date_from_days),
            ) else {
                continue;
            };
            records.push(StockRecord {
                item_code: item,
                warehouse_code: wh,
                record_date: date,
                on_hand: on_hand[i],
                on_hand_raw: raw[i],
                outlier_flag: flags[i].unwrap_or(false),
                valid_for: valid[i]
                    .as_deref()
                    .and_then(ValidFor::parse)
                    .unwrap_or_default(),
                is_committed: committed[i].unwrap_or(0.0),
                on_order: on_order[i].unwrap_or(0.0),
                avg_price: avg_price[i].unwrap_or(0.0),
            });
        }
        Ok(records)
    }

    /// Encode records as a curated table.
    pub fn to_frame(records: &[StockRecord]) -> PolarsResult<DataFrame> {
        let items: Vec<&str> = records.iter().map(|r| r.item_code.as_str()).collect();
        let whs: Vec<&str> = records.iter().map(|r| r.warehouse_code.as_str()).collect();
        let on_hand: Vec<Option<f64>> = records.iter().map(|r| r.on_hand).collect();
        let committed: Vec<f64> = records.iter().map(|r| r.is_committed).collect();
        let on_order: Vec<f64> = records.iter().map(|r| r.on_order).collect();
        let avg_price: Vec<f64> = records.iter().map(|r| r.avg_price).collect();
        let valid: Vec<&str> = records.iter().map(|r| r.valid_for.as_str()).collect();
        let dates: Vec<Option<i32>> = records
            .iter()
            .map(|r| Some(days_from_date(r.record_date)))
            .collect();
        let flags: Vec<bool> = records.iter().map(|r| r.outlier_flag).collect();
        let raw: Vec<Option<f64>> = records.iter().map(|r| r.on_hand_raw).collect();

        DataFrame::new(vec![
            Column::new(ITEM_CODE.into(), items),
            Column::new(WHS_CODE.into(), whs),
            Column::new(ON_HAND.into(), on_hand),
            Column::new(IS_COMMITED.into(), committed),
            Column::new(ON_ORDER.into(), on_order),
            Column::new(AVG_PRICE.into(), avg_price),
            Column::new(VALID_FOR.into(), valid),
            date_column(RECORD_DATE, dates)?,
            Column::new(OUTLIER_FLAG.into(), flags),
            Column::new(ON_HAND_RAW.into(), raw),
        ])
    }
}

// ============================================================================
// Run summaries
// ============================================================================

/// Counters produced by the structural cleaner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanStats {
    /// Rows entering the cleaner.
    pub rows_in: usize,
    /// Rows dropped because a key field was null.
    pub null_key_dropped: usize,
    /// Rows whose quantity was the discontinued sentinel.
    pub discontinued: usize,
    /// Quantities that did not parse as a number and became null.
    pub non_numeric_nulled: usize,
    /// Rows dropped because the quantity was exactly zero.
    pub zero_dropped: usize,
    /// Rows removed by business-key deduplication.
    pub duplicates_removed: usize,
    /// Rows dropped because their date could not be normalized.
    pub unparseable_dates: usize,
    /// Rows leaving the cleaner.
    pub rows_out: usize,
}

/// Counters produced by the outlier repairer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairStats {
    /// Number of (item, warehouse) series processed.
    pub series: usize,
    /// Outliers flagged only by the absolute threshold.
    pub outliers_abs_only: usize,
    /// Outliers flagged only by the relative threshold.
    pub outliers_rel_only: usize,
    /// Outliers flagged by both thresholds.
    pub outliers_both: usize,
    /// Outliers replaced with the previous valid value.
    pub replaced_from_prev: usize,
    /// Outliers replaced with the next valid value.
    pub replaced_from_next: usize,
    /// Null values filled from a neighbor.
    pub nulls_filled: usize,
    /// Null values with no valid neighbor, left null.
    pub nulls_remaining: usize,
    /// Rows removed by the safety deduplication ahead of repair.
    pub duplicates_removed: usize,
}

impl RepairStats {
    /// Total number of rows flagged as outliers.
    pub fn outliers_flagged(&self) -> usize {
        self.outliers_abs_only + self.outliers_rel_only + self.outliers_both
    }

    /// Fold another partition's counters into this one.
    pub fn absorb(&mut self, other: &RepairStats) {
        self.series += other.series;
        self.outliers_abs_only += other.outliers_abs_only;
        self.outliers_rel_only += other.outliers_rel_only;
        self.outliers_both += other.outliers_both;
        self.replaced_from_prev += other.replaced_from_prev;
        self.replaced_from_next += other.replaced_from_next;
        self.nulls_filled += other.nulls_filled;
        self.nulls_remaining += other.nulls_remaining;
        self.duplicates_removed += other.duplicates_removed;
    }
}

/// Summary of one period's run through the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    /// Period label (usually the year).
    pub period: String,
    /// Total execution time in milliseconds.
    pub duration_ms: u64,
    /// Item rows in the normalized wide table.
    pub items: usize,
    /// Date blocks found in the wide table.
    pub blocks: usize,
    /// Long rows produced by the reshaper.
    pub rows_reshaped: usize,
    /// Structural cleaning counters.
    pub clean: CleanStats,
    /// Outlier repair counters.
    pub repair: RepairStats,
    /// Rows in the curated output.
    pub rows_out: usize,
    /// Warnings raised during processing.
    pub warnings: Vec<String>,
}

impl RunSummary {
    pub fn new(period: impl Into<String>) -> Self {
        Self {
            period: period.into(),
            ..Default::default()
        }
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }
}
