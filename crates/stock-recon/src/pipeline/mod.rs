//! Pipeline module.
//!
//! This module provides the reconciliation pipeline, its execution session,
//! and the progress and cancellation seams.

mod builder;
pub mod progress;
mod session;

pub use builder::{
    BatchResult, MergeResult, PeriodFailure, Pipeline, PipelineBuilder, PipelineResult,
};
pub use progress::{
    CancellationToken, ClosureProgressReporter, PipelineStage, ProgressReporter, ProgressUpdate,
};
pub use session::Session;
