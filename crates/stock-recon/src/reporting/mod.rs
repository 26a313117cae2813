//! Report generation module.
//!
//! Run and merge reports are plain serde structs, so the same value is
//! printed to stdout with `--json` and written next to the curated table.
//!
//! # Example
//!
//! ```rust,ignore
//! use stock_recon::reporting::ReportGenerator;
//!
//! let report = ReportGenerator::build_run_report(
//!     &config,
//!     Some(Path::new("data/2024.csv")),
//!     result.output_path.as_deref(),
//!     &result.blocks,
//!     &result.summary,
//! );
//! println!("{}", serde_json::to_string_pretty(&report)?);
//! ```

mod generator;

pub use generator::{BlockReport, MergeReport, ReportGenerator, RunReport, RunSettings};
