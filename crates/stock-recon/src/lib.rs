//! Warehouse Stock Reconciliation Library
//!
//! Turns wide, spreadsheet-shaped daily stock snapshots into a clean long
//! time series keyed by (item, warehouse, date), built with Rust and Polars.
//!
//! # Overview
//!
//! - **Row Normalization**: repeated headers disambiguated, junk columns and duplicate items dropped
//! - **Reshaping**: date-blocked warehouse columns stacked into long rows
//! - **Structural Cleaning**: null keys, discontinued markers, zeros and duplicates removed
//! - **Outlier Repair**: per-series gap-aware repair from the nearest valid neighbors
//! - **Merging**: curated periods combined into one history
//! - **Sink**: transactional append to PostgreSQL
//! - **Progress Reporting**: stage updates with cancellation support
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use stock_recon::{Pipeline, PipelineConfig};
//!
//! let config = PipelineConfig::builder()
//!     .abs_jump(500.0)
//!     .rel_jump(5.0)
//!     .output_dir("output")
//!     .build()?;
//!
//! let pipeline = Pipeline::builder().config(config).build()?;
//! let result = pipeline.process_file("data/2024.csv".as_ref(), None)?;
//!
//! println!("{} curated rows", result.summary.rows_out);
//! println!("{} outliers repaired", result.summary.repair.outliers_flagged());
//!
//! // Combine every cleaned_stock_<year>.parquet in the output directory
//! if let Some(merged) = pipeline.merge_outputs()? {
//!     println!("{} rows in the merged history", merged.stats.rows_out);
//! }
//! ```
//!
//! # Stages
//!
//! Each stage is usable on its own with fixture tables:
//!
//! ```rust,ignore
//! use stock_recon::{OutlierRepairer, Reshaper, StructuralCleaner, normalize_wide_table};
//!
//! let wide = normalize_wide_table(raw)?;
//! let long = Reshaper::default().reshape(&wide)?;
//! let cleaned = StructuralCleaner::default().clean(&long.table)?;
//! let repaired = OutlierRepairer::new(500.0, 5.0).repair(&cleaned.table, None)?;
//! ```

pub mod cleaner;
pub mod config;
pub mod error;
pub mod merge;
pub mod pipeline;
pub mod repair;
pub mod reporting;
pub mod reshape;
pub mod sink;
pub mod storage;
pub mod types;
pub mod utils;

// Re-exports for convenient access
pub use cleaner::{CleanOutput, StructuralCleaner, dedup_by_business_key, normalize_wide_table};
pub use config::{ConfigValidationError, PipelineConfig, PipelineConfigBuilder, SinkConfig};
pub use error::{ReconError, Result as ReconResult, ResultExt};
pub use merge::{MergeStats, SeriesMerger};
pub use pipeline::{
    BatchResult, CancellationToken, ClosureProgressReporter, MergeResult, PeriodFailure, Pipeline,
    PipelineBuilder, PipelineResult, PipelineStage, ProgressReporter, ProgressUpdate, Session,
};
pub use repair::{OutlierReason, OutlierRepairer, RepairAction, RepairOutput};
pub use reporting::{MergeReport, ReportGenerator, RunReport};
pub use reshape::{DateBlock, ReshapeOutput, Reshaper};
pub use sink::PostgresSink;
pub use types::{CleanStats, RepairStats, RunSummary, StockRecord, ValidFor};
