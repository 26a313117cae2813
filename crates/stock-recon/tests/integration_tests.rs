//! Integration tests for the stock reconciliation pipeline.
//!
//! These tests run wide CSV fixtures end to end through the pipeline.

use chrono::NaiveDate;
use pretty_assertions::assert_eq;
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use stock_recon::storage::read_parquet;
use stock_recon::types::{ON_HAND, OUTLIER_FLAG};
use stock_recon::utils::{bool_values, f64_values, str_values};
use stock_recon::{
    CancellationToken, OutlierRepairer, Pipeline, PipelineConfig, PipelineResult, PipelineStage,
    ReconError, RunReport, StockRecord, ValidFor,
};
use tempfile::TempDir;

// ============================================================================
// Helper Functions
// ============================================================================

fn fixtures_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn date(m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, m, d).unwrap()
}

fn pipeline_into(dir: &Path) -> Pipeline {
    let config = PipelineConfig::builder()
        .output_dir(dir)
        .num_threads(2)
        .build()
        .unwrap();
    Pipeline::builder().config(config).build().unwrap()
}

fn run_fixture(dir: &Path) -> PipelineResult {
    pipeline_into(dir)
        .process_file(&fixtures_path().join("2024.csv"), None)
        .unwrap()
}

/// Curated records of one (item, warehouse) series, in date order.
fn series(records: &[StockRecord], item: &str, whs: &str) -> Vec<StockRecord> {
    let mut out: Vec<StockRecord> = records
        .iter()
        .filter(|r| r.item_code == item && r.warehouse_code == whs)
        .cloned()
        .collect();
    out.sort_by_key(|r| r.record_date);
    out
}

// ============================================================================
// Full period runs
// ============================================================================

#[test]
fn test_fixture_summary_counts() {
    let dir = TempDir::new().unwrap();
    let result = run_fixture(dir.path());
    let s = &result.summary;

    assert_eq!(s.period, "2024");
    assert_eq!(s.items, 3);
    assert_eq!(s.blocks, 5);
    assert_eq!(s.rows_reshaped, 30);
    assert_eq!(s.clean.null_key_dropped, 9);
    assert_eq!(s.clean.discontinued, 1);
    assert_eq!(s.clean.zero_dropped, 1);
    assert_eq!(s.clean.non_numeric_nulled, 3);
    assert_eq!(s.clean.unparseable_dates, 0);
    assert_eq!(s.repair.series, 5);
    assert_eq!(s.repair.nulls_filled, 2);
    assert_eq!(s.repair.nulls_remaining, 1);
    assert_eq!(s.rows_out, 19);
}

#[test]
fn test_business_key_is_unique() {
    let dir = TempDir::new().unwrap();
    let result = run_fixture(dir.path());
    let records = StockRecord::from_frame(&result.curated).unwrap();

    let keys: HashSet<(String, String, NaiveDate)> = records
        .iter()
        .map(|r| (r.item_code.clone(), r.warehouse_code.clone(), r.record_date))
        .collect();
    assert_eq!(keys.len(), records.len());
    assert_eq!(records.len(), 19);
}

#[test]
fn test_no_dates_are_fabricated() {
    let dir = TempDir::new().unwrap();
    let result = run_fixture(dir.path());
    let records = StockRecord::from_frame(&result.curated).unwrap();

    let dates = |item: &str, whs: &str| -> Vec<NaiveDate> {
        series(&records, item, whs)
            .iter()
            .map(|r| r.record_date)
            .collect()
    };

    // The DC cell on Jan 3 and the zero on Jan 6 leave gaps that stay gaps
    assert_eq!(
        dates("A", "WH2"),
        vec![date(1, 2), date(1, 4), date(1, 5), date(1, 6)]
    );
    assert_eq!(
        dates("B", "WH1"),
        vec![date(1, 2), date(1, 3), date(1, 4), date(1, 5)]
    );
    assert_eq!(dates("B", "WH2"), vec![date(1, 2)]);
    assert!(dates("C", "WH2").is_empty());
}

#[test]
fn test_spike_replaced_and_raw_kept() {
    let dir = TempDir::new().unwrap();
    let result = run_fixture(dir.path());
    let records = StockRecord::from_frame(&result.curated).unwrap();
    let a = series(&records, "A", "WH1");

    let raw: Vec<Option<f64>> = a.iter().map(|r| r.on_hand_raw).collect();
    assert_eq!(
        raw,
        vec![Some(10.0), Some(10.0), Some(5000.0), Some(12.0), Some(11.0)]
    );

    let spike = &a[2];
    assert_eq!(spike.record_date, date(1, 4));
    assert_eq!(spike.on_hand, Some(10.0));
    assert!(spike.outlier_flag);
    assert!(!a[0].outlier_flag);
    assert!(!a[1].outlier_flag);
    assert_eq!(a[4].on_hand, Some(11.0));
    assert!(result.summary.repair.outliers_both >= 1);
}

#[test]
fn test_leading_nulls_take_first_valid_value() {
    let dir = TempDir::new().unwrap();
    let result = run_fixture(dir.path());
    let records = StockRecord::from_frame(&result.curated).unwrap();
    let b = series(&records, "B", "WH1");

    let on_hand: Vec<Option<f64>> = b.iter().map(|r| r.on_hand).collect();
    assert_eq!(on_hand, vec![Some(20.0), Some(20.0), Some(20.0), Some(22.0)]);
    assert!(b.iter().all(|r| !r.outlier_flag));
    assert_eq!(b[0].on_hand_raw, None);
}

#[test]
fn test_single_null_row_stays_null() {
    let dir = TempDir::new().unwrap();
    let result = run_fixture(dir.path());
    let records = StockRecord::from_frame(&result.curated).unwrap();
    let b = series(&records, "B", "WH2");

    assert_eq!(b.len(), 1);
    assert_eq!(b[0].on_hand, None);
    assert!(!b[0].outlier_flag);
}

#[test]
fn test_discontinued_marker_reported_not_observed() {
    let dir = TempDir::new().unwrap();
    let result = run_fixture(dir.path());

    let dc = &result.discontinued;
    assert_eq!(dc.height(), 1);
    assert_eq!(str_values(dc, "ItemCode").unwrap(), vec![Some("A".to_string())]);
    assert_eq!(str_values(dc, "WhsCode").unwrap(), vec![Some("WH2".to_string())]);
    assert_eq!(
        str_values(dc, "ValidFor").unwrap(),
        vec![Some(ValidFor::N.as_str().to_string())]
    );

    let records = StockRecord::from_frame(&result.curated).unwrap();
    assert!(records.iter().all(|r| r.valid_for == ValidFor::Y));
    assert!(
        !series(&records, "A", "WH2")
            .iter()
            .any(|r| r.record_date == date(1, 3))
    );
}

#[test]
fn test_outputs_written_and_readable() {
    let dir = TempDir::new().unwrap();
    let result = run_fixture(dir.path());

    let output = result.output_path.clone().unwrap();
    assert_eq!(output, dir.path().join("cleaned_stock_2024.parquet"));
    let back = read_parquet(&output).unwrap();
    assert!(back.equals_missing(&result.curated));

    let report_text = fs::read_to_string(result.report_path.unwrap()).unwrap();
    let report: RunReport = serde_json::from_str(&report_text).unwrap();
    assert_eq!(report.summary.rows_out, 19);
    assert_eq!(report.blocks.len(), 5);
    assert!(report.input_file.unwrap().ends_with("2024.csv"));

    // No temporary siblings left behind
    let leftovers: Vec<String> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .filter(|n| n.ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
}

// ============================================================================
// Repair properties
// ============================================================================

#[test]
fn test_repaired_trailing_spike_is_stable() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("2023.csv");
    fs::write(
        &input,
        "ItemCode,W1,Date,W1,Date,W1,Date\nA,10,2023-01-02,10,2023-01-03,5000,2023-01-04\n",
    )
    .unwrap();

    let config = PipelineConfig::builder()
        .output_dir(dir.path())
        .save_to_disk(false)
        .build()
        .unwrap();
    let pipeline = Pipeline::builder().config(config).build().unwrap();
    let first = pipeline.process_file(&input, None).unwrap();
    assert_eq!(
        f64_values(&first.curated, ON_HAND).unwrap(),
        vec![Some(10.0), Some(10.0), Some(10.0)]
    );

    let second = OutlierRepairer::default()
        .repair(&first.curated, None)
        .unwrap();
    assert_eq!(
        f64_values(&second.table, ON_HAND).unwrap(),
        vec![Some(10.0), Some(10.0), Some(10.0)]
    );
    assert_eq!(second.stats.outliers_flagged(), 0);
    assert_eq!(
        bool_values(&second.table, OUTLIER_FLAG).unwrap(),
        vec![Some(false), Some(false), Some(false)]
    );
}

#[test]
fn test_interior_spike_moves_on_second_pass() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("2022.csv");
    fs::write(
        &input,
        "ItemCode,W1,Date,W1,Date,W1,Date,W1,Date,W1,Date\n\
         A,10,2022-01-02,10,2022-01-03,5000,2022-01-04,12,2022-01-05,11,2022-01-06\n",
    )
    .unwrap();

    let config = PipelineConfig::builder()
        .output_dir(dir.path())
        .save_to_disk(false)
        .build()
        .unwrap();
    let pipeline = Pipeline::builder().config(config).build().unwrap();
    let first = pipeline.process_file(&input, None).unwrap();

    // Neighbors come from pre-repair values, so the 12 sees the 5000 as its
    // previous value and takes it over
    assert_eq!(
        f64_values(&first.curated, ON_HAND).unwrap(),
        vec![Some(10.0), Some(10.0), Some(10.0), Some(5000.0), Some(11.0)]
    );
    assert_eq!(
        bool_values(&first.curated, OUTLIER_FLAG).unwrap(),
        vec![Some(false), Some(false), Some(true), Some(true), Some(false)]
    );

    let second = OutlierRepairer::default()
        .repair(&first.curated, None)
        .unwrap();
    assert_eq!(
        f64_values(&second.table, ON_HAND).unwrap(),
        vec![Some(10.0), Some(10.0), Some(10.0), Some(10.0), Some(5000.0)]
    );
    assert_eq!(second.stats.outliers_both, 1);
    assert_eq!(second.stats.outliers_abs_only, 1);
}

#[test]
fn test_one_date_in_two_spellings_keeps_highest() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("2024.csv");
    fs::write(
        &input,
        "ItemCode,W1,Date,W1,Date\nA,10,2024-Jan-02,5000,2024-01-02\n",
    )
    .unwrap();

    let result = pipeline_into(dir.path())
        .process_file(&input, None)
        .unwrap();

    let records = StockRecord::from_frame(&result.curated).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].record_date, date(1, 2));
    assert_eq!(records[0].on_hand, Some(5000.0));
    assert_eq!(records[0].on_hand_raw, Some(5000.0));
    assert!(!records[0].outlier_flag);
    assert_eq!(result.summary.clean.duplicates_removed, 1);
    assert_eq!(result.summary.repair.outliers_flagged(), 0);
}

#[test]
fn test_thresholds_come_from_config() {
    let dir = TempDir::new().unwrap();
    let config = PipelineConfig::builder()
        .output_dir(dir.path())
        .abs_jump(10_000.0)
        .rel_jump(1_000.0)
        .save_to_disk(false)
        .build()
        .unwrap();
    let result = Pipeline::builder()
        .config(config)
        .build()
        .unwrap()
        .process_file(&fixtures_path().join("2024.csv"), None)
        .unwrap();

    assert_eq!(result.summary.repair.outliers_flagged(), 0);
    assert!(result.output_path.is_none());
}

// ============================================================================
// Structural errors
// ============================================================================

#[test]
fn test_no_date_columns_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline_into(dir.path());

    let err = pipeline
        .process_file(&fixtures_path().join("no_dates.csv"), Some("2023"))
        .unwrap_err();
    assert!(err.is_structural());
    assert_eq!(err.error_code(), "NO_DATE_COLUMNS");
    assert!(!dir.path().join("cleaned_stock_2023.parquet").exists());
}

#[test]
fn test_missing_block_date_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline_into(dir.path());

    let err = pipeline
        .process_file(&fixtures_path().join("missing_date.csv"), Some("2023"))
        .unwrap_err();
    assert_eq!(err.error_code(), "MISSING_BLOCK_DATE");
    assert!(fs::read_dir(dir.path()).map(|d| d.count()).unwrap_or(0) == 0);
}

#[test]
fn test_missing_input_file() {
    let dir = TempDir::new().unwrap();
    let err = pipeline_into(dir.path())
        .process_file(&dir.path().join("1999.csv"), None)
        .unwrap_err();
    assert_eq!(err.error_code(), "IO_ERROR");
}

// ============================================================================
// Batch and merge
// ============================================================================

#[test]
fn test_batch_then_merge_keeps_highest_overlap() {
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline_into(dir.path());

    let batch = pipeline
        .process_dir(&fixtures_path().join("periods"))
        .unwrap();
    assert!(batch.failures.is_empty());
    let periods: Vec<&str> = batch
        .results
        .iter()
        .map(|r| r.summary.period.as_str())
        .collect();
    assert_eq!(periods, vec!["2024", "2025"]);

    let merged = pipeline.merge_outputs().unwrap().unwrap();
    assert_eq!(merged.sources.len(), 2);
    assert_eq!(merged.stats.rows_in, 4);
    assert_eq!(merged.stats.duplicates_removed, 1);
    assert_eq!(merged.stats.rows_out, 3);

    let output = merged.output_path.unwrap();
    assert!(output.ends_with("final_cleaned_stock.parquet"));
    let records = StockRecord::from_frame(&read_parquet(&output).unwrap()).unwrap();
    let overlap: Vec<Option<f64>> = records
        .iter()
        .filter(|r| r.record_date == date(12, 31))
        .map(|r| r.on_hand)
        .collect();
    assert_eq!(overlap, vec![Some(9.0)]);

    let all_dates: BTreeSet<NaiveDate> = records.iter().map(|r| r.record_date).collect();
    assert_eq!(all_dates.len(), 3);
}

#[test]
fn test_merge_with_nothing_to_merge() {
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline_into(dir.path());
    assert!(pipeline.merge_outputs().unwrap().is_none());
}

#[test]
fn test_batch_without_inputs() {
    let dir = TempDir::new().unwrap();
    let err = pipeline_into(dir.path())
        .process_dir(dir.path())
        .unwrap_err();
    assert_eq!(err.error_code(), "NO_INPUTS");
}

// ============================================================================
// Progress and cancellation
// ============================================================================

#[test]
fn test_progress_stages_reported_in_order() {
    let dir = TempDir::new().unwrap();
    let stages = Arc::new(Mutex::new(Vec::new()));
    let seen = stages.clone();

    let config = PipelineConfig::builder()
        .output_dir(dir.path())
        .build()
        .unwrap();
    Pipeline::builder()
        .config(config)
        .on_progress(move |update| {
            let mut stages = seen.lock().unwrap();
            if stages.last() != Some(&update.stage) {
                stages.push(update.stage);
            }
        })
        .build()
        .unwrap()
        .process_file(&fixtures_path().join("2024.csv"), None)
        .unwrap();

    let stages = stages.lock().unwrap();
    assert_eq!(
        *stages,
        vec![
            PipelineStage::Initializing,
            PipelineStage::Normalizing,
            PipelineStage::Reshaping,
            PipelineStage::Cleaning,
            PipelineStage::OutlierRepair,
            PipelineStage::Writing,
            PipelineStage::Complete,
        ]
    );
}

#[test]
fn test_cancellation_before_start() {
    let dir = TempDir::new().unwrap();
    let token = CancellationToken::new();
    token.cancel();

    let config = PipelineConfig::builder()
        .output_dir(dir.path())
        .build()
        .unwrap();
    let result = Pipeline::builder()
        .config(config)
        .cancellation_token(token)
        .build()
        .unwrap()
        .process_file(&fixtures_path().join("2024.csv"), None);

    assert!(matches!(result, Err(ReconError::Cancelled)));
    assert!(!dir.path().join("cleaned_stock_2024.parquet").exists());
}
