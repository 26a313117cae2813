//! Main reconciliation pipeline module.
//!
//! This module provides the core `Pipeline` struct and builder for
//! orchestrating one period run and the merge of curated periods.

use crate::cleaner::{StructuralCleaner, normalize_wide_table};
use crate::config::PipelineConfig;
use crate::error::{ReconError, Result, ResultExt};
use crate::merge::{MergeStats, SeriesMerger};
use crate::pipeline::progress::{
    CancellationToken, ClosureProgressReporter, PipelineStage, ProgressReporter, ProgressUpdate,
};
use crate::pipeline::session::Session;
use crate::repair::OutlierRepairer;
use crate::reporting::ReportGenerator;
use crate::reshape::{DateBlock, Reshaper};
use crate::storage::{
    discover_period_inputs, list_period_outputs, period_from_path, read_parquet, read_wide_csv,
    write_parquet_atomic,
};
use crate::types::RunSummary;
use polars::prelude::*;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Output of one period run.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    /// Curated table, unique on (ItemCode, WhsCode, RecordDate).
    pub curated: DataFrame,
    /// Discontinued markers: `ItemCode, WhsCode, RecordDate, ValidFor`.
    pub discontinued: DataFrame,
    /// Date blocks detected in the wide table.
    pub blocks: Vec<DateBlock>,
    pub summary: RunSummary,
    /// Where the curated table was written, when saving is enabled.
    pub output_path: Option<PathBuf>,
    pub report_path: Option<PathBuf>,
}

/// Output of merging the curated period tables.
#[derive(Debug, Clone)]
pub struct MergeResult {
    pub table: DataFrame,
    pub stats: MergeStats,
    pub sources: Vec<PathBuf>,
    pub output_path: Option<PathBuf>,
}

/// A period that failed during a batch run.
#[derive(Debug)]
pub struct PeriodFailure {
    pub period: String,
    pub path: PathBuf,
    pub error: ReconError,
}

/// Output of a batch run over a directory of period inputs.
#[derive(Debug, Default)]
pub struct BatchResult {
    pub results: Vec<PipelineResult>,
    pub failures: Vec<PeriodFailure>,
}

/// The reconciliation pipeline.
///
/// Use [`Pipeline::builder()`] to create a new pipeline with custom configuration.
///
/// # Example
///
/// ```rust,ignore
/// use stock_recon::{Pipeline, PipelineConfig, CancellationToken};
///
/// let token = CancellationToken::new();
///
/// let result = Pipeline::builder()
///     .config(PipelineConfig::builder().abs_jump(250.0).build()?)
///     .cancellation_token(token.clone())
///     .on_progress(|update| {
///         println!("[{:.0}%] {}", update.progress * 100.0, update.message);
///     })
///     .build()?
///     .process_file("data/2024.csv".as_ref(), None)?;
/// ```
pub struct Pipeline {
    config: PipelineConfig,
    session: Arc<Session>,
    progress_reporter: Option<Arc<dyn ProgressReporter>>,
    cancellation_token: CancellationToken,
    reshaper: Reshaper,
    cleaner: StructuralCleaner,
    repairer: OutlierRepairer,
    merger: SeriesMerger,
}

// Runs are often driven from a worker thread
static_assertions::assert_impl_all!(Pipeline: Send);

impl Pipeline {
    /// Create a new pipeline builder.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process one period from an already-read wide grid.
    ///
    /// `wide_raw` holds every cell as text with the header row as row 0, as
    /// returned by [`read_wide_csv`].
    ///
    /// # Errors
    ///
    /// Returns `Err(ReconError::Cancelled)` if the token was cancelled
    /// between stages; nothing is written in that case. Structural errors
    /// abort the period before any output exists.
    pub fn process(&self, wide_raw: DataFrame, period: &str) -> Result<PipelineResult> {
        self.finish(self.process_internal(wide_raw, period, None))
    }

    /// Read a `yyyy.csv` file and process it.
    ///
    /// When `period` is `None` it is inferred from the file name.
    pub fn process_file(&self, path: &Path, period: Option<&str>) -> Result<PipelineResult> {
        self.finish(self.process_file_internal(path, period))
    }

    /// Process every `yyyy.csv` input in `dir`, oldest period first.
    ///
    /// A period that fails is recorded and the batch moves on; cancellation
    /// stops the whole batch.
    pub fn process_dir(&self, dir: &Path) -> Result<BatchResult> {
        let inputs = discover_period_inputs(dir)?;
        if inputs.is_empty() {
            return Err(ReconError::NoInputs(format!(
                "no yyyy.csv files in {}",
                dir.display()
            )));
        }

        info!("Processing {} periods from {}", inputs.len(), dir.display());
        let total = inputs.len();
        let mut batch = BatchResult::default();

        for (idx, (period, path)) in inputs.into_iter().enumerate() {
            self.check_cancelled()?;
            self.report_progress(ProgressUpdate::with_items(
                PipelineStage::Initializing,
                format!("Period {period}"),
                idx,
                total,
                format!("Processing {}", path.display()),
            ));

            match self.process_file(&path, Some(&period)) {
                Ok(result) => batch.results.push(result),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => batch.failures.push(PeriodFailure {
                    period,
                    path,
                    error: e,
                }),
            }
        }

        if !batch.failures.is_empty() {
            warn!(
                "{} of {} periods failed",
                batch.failures.len(),
                batch.results.len() + batch.failures.len()
            );
        }
        Ok(batch)
    }

    /// Merge every `cleaned_stock_<period>.parquet` in the output directory.
    ///
    /// Returns `Ok(None)` when there is nothing to merge.
    pub fn merge_outputs(&self) -> Result<Option<MergeResult>> {
        let sources = list_period_outputs(&self.config.output_dir)?;
        if sources.is_empty() {
            info!(
                "No curated period tables in {}, nothing to merge",
                self.config.output_dir.display()
            );
            return Ok(None);
        }

        let inputs = sources
            .iter()
            .map(|path| -> Result<(String, DataFrame)> {
                self.check_cancelled()?;
                let name = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_else(|| path.display().to_string());
                Ok((name, read_parquet(path)?))
            })
            .collect::<Result<Vec<_>>>()?;

        let (mut table, stats) = self.merger.merge(&inputs)?;
        self.check_cancelled()?;

        let output_path = if self.config.save_to_disk {
            let path = self.config.merged_output_path();
            let report = self.config.write_report.then(|| {
                ReportGenerator::build_merge_report(&sources, Some(path.as_path()), &stats)
            });
            let report_path = self.config.merged_report_path();
            publish(
                &mut table,
                &path,
                report.as_ref().map(|r| (r, report_path.as_path())),
            )?;
            Some(path)
        } else {
            None
        };

        Ok(Some(MergeResult {
            table,
            stats,
            sources,
            output_path,
        }))
    }

    fn finish(&self, outcome: Result<PipelineResult>) -> Result<PipelineResult> {
        match outcome {
            Ok(result) => {
                self.report_progress(ProgressUpdate::complete(format!(
                    "Period {} complete: {} rows",
                    result.summary.period, result.summary.rows_out
                )));
                Ok(result)
            }
            Err(e) => {
                if e.is_cancelled() {
                    self.report_progress(ProgressUpdate::cancelled());
                } else {
                    self.report_progress(ProgressUpdate::failed(e.to_string()));
                }
                error!("Pipeline error: {}", e);
                Err(e)
            }
        }
    }

    /// Check if cancellation has been requested.
    fn check_cancelled(&self) -> Result<()> {
        if self.cancellation_token.is_cancelled() {
            return Err(ReconError::Cancelled);
        }
        Ok(())
    }

    /// Report progress if a reporter is configured.
    fn report_progress(&self, update: ProgressUpdate) {
        if let Some(reporter) = &self.progress_reporter {
            reporter.report(update);
        }
    }

    fn process_file_internal(&self, path: &Path, period: Option<&str>) -> Result<PipelineResult> {
        let period = match period {
            Some(p) => p.to_string(),
            None => period_from_path(path).ok_or_else(|| {
                ReconError::InvalidConfig(format!(
                    "cannot infer a period from '{}'; name the file yyyy.csv or pass the year",
                    path.display()
                ))
            })?,
        };
        validate_period(&period)?;
        self.check_cancelled()?;

        self.report_progress(ProgressUpdate::new(
            PipelineStage::Initializing,
            0.0,
            format!("Reading {}", path.display()),
        ));
        let raw = read_wide_csv(path)?;
        self.process_internal(raw, &period, Some(path))
    }

    fn process_internal(
        &self,
        wide_raw: DataFrame,
        period: &str,
        input: Option<&Path>,
    ) -> Result<PipelineResult> {
        let start_time = Instant::now();
        validate_period(period)?;

        info!("Starting reconciliation for period {}...", period);
        self.report_progress(ProgressUpdate::new(
            PipelineStage::Initializing,
            1.0,
            format!("Starting period {period}"),
        ));
        let mut summary = RunSummary::new(period);

        self.check_cancelled()?;

        // Step 1: Normalize the wide grid
        self.report_progress(ProgressUpdate::new(
            PipelineStage::Normalizing,
            0.0,
            "Normalizing wide table...",
        ));
        let wide = normalize_wide_table(wide_raw).context(format!("Normalizing period {period}"))?;
        debug!("Normalized wide table: {} x {}", wide.height(), wide.width());

        self.check_cancelled()?;

        // Step 2: Reshape date blocks into long rows
        self.report_progress(ProgressUpdate::new(
            PipelineStage::Reshaping,
            0.0,
            "Reshaping date blocks...",
        ));
        let reshaped = self
            .reshaper
            .reshape(&wide)
            .context(format!("Reshaping period {period}"))?;
        summary.items = reshaped.items;
        summary.blocks = reshaped.blocks.len();
        summary.rows_reshaped = reshaped.table.height();
        for block in reshaped.blocks.iter().filter(|b| b.is_empty()) {
            summary.add_warning(format!(
                "Date marker '{}' has no warehouse columns",
                block.marker
            ));
        }

        self.check_cancelled()?;

        // Step 3: Structural cleaning
        self.report_progress(ProgressUpdate::new(
            PipelineStage::Cleaning,
            0.0,
            "Cleaning long rows...",
        ));
        let cleaned = self
            .cleaner
            .clean(&reshaped.table)
            .context(format!("Cleaning period {period}"))?;
        if cleaned.stats.unparseable_dates > 0 {
            summary.add_warning(format!(
                "{} rows dropped for an unparseable record date",
                cleaned.stats.unparseable_dates
            ));
        }
        if cleaned.stats.non_numeric_nulled > 0 {
            summary.add_warning(format!(
                "{} non-numeric quantities set to null",
                cleaned.stats.non_numeric_nulled
            ));
        }
        summary.clean = cleaned.stats;

        self.check_cancelled()?;

        // Step 4: Outlier detection and repair
        self.report_progress(ProgressUpdate::new(
            PipelineStage::OutlierRepair,
            0.0,
            format!(
                "Repairing series on {} threads...",
                self.session.num_threads()
            ),
        ));
        let repaired = self
            .repairer
            .repair(&cleaned.table, Some(self.session.pool()))
            .context(format!("Repairing period {period}"))?;
        summary.repair = repaired.stats;
        let mut curated = repaired.table;
        summary.rows_out = curated.height();

        // Last point where a cancelled run leaves nothing behind
        self.check_cancelled()?;

        // Step 5: Write outputs
        self.report_progress(ProgressUpdate::new(
            PipelineStage::Writing,
            0.0,
            "Writing curated table...",
        ));
        summary.duration_ms = start_time.elapsed().as_millis() as u64;
        let (output_path, report_path) = if self.config.save_to_disk {
            let path = self.config.period_output_path(period);
            let report = self.config.write_report.then(|| {
                ReportGenerator::build_run_report(
                    &self.config,
                    input,
                    Some(path.as_path()),
                    &reshaped.blocks,
                    &summary,
                )
            });
            let report_path = self.config.period_report_path(period);
            let written = publish(
                &mut curated,
                &path,
                report.as_ref().map(|r| (r, report_path.as_path())),
            )?;
            (Some(path), written)
        } else {
            (None, None)
        };

        info!(
            "Period {} complete in {}ms: {} rows reshaped -> {} curated ({} outliers, {} nulls filled)",
            period,
            summary.duration_ms,
            summary.rows_reshaped,
            summary.rows_out,
            summary.repair.outliers_flagged(),
            summary.repair.nulls_filled
        );

        Ok(PipelineResult {
            curated,
            discontinued: cleaned.discontinued,
            blocks: reshaped.blocks,
            summary,
            output_path,
            report_path,
        })
    }
}

/// Period labels become part of file names.
fn validate_period(period: &str) -> Result<()> {
    let ok = !period.is_empty()
        && period
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(ReconError::InvalidConfig(format!(
            "'{period}' is not a valid period label"
        )))
    }
}

/// Builder for creating a [`Pipeline`] instance.
///
/// Use [`Pipeline::builder()`] to get started.
#[derive(Default)]
pub struct PipelineBuilder {
    config: Option<PipelineConfig>,
    session: Option<Arc<Session>>,
    progress_reporter: Option<Arc<dyn ProgressReporter>>,
    cancellation_token: Option<CancellationToken>,
}

static_assertions::assert_impl_all!(PipelineBuilder: Send);

impl PipelineBuilder {
    /// Set the pipeline configuration.
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Run on an existing session instead of creating one from the config.
    ///
    /// Sharing a session lets several pipelines use one worker pool.
    pub fn session(mut self, session: Arc<Session>) -> Self {
        self.session = Some(session);
        self
    }

    /// Set a progress reporter for receiving updates during processing.
    pub fn progress_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.progress_reporter = Some(reporter);
        self
    }

    /// Set a progress callback closure.
    ///
    /// For more complex scenarios, use [`progress_reporter`](Self::progress_reporter).
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        self.progress_reporter = Some(Arc::new(ClosureProgressReporter::new(callback)));
        self
    }

    /// Set a cancellation token for stopping the pipeline.
    ///
    /// Clone the token and call [`CancellationToken::cancel()`] from any
    /// thread. The pipeline checks it between stages and returns
    /// [`ReconError::Cancelled`].
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = Some(token);
        self
    }

    /// Build the pipeline.
    ///
    /// Fails on an invalid configuration or when the session pool cannot be
    /// created.
    pub fn build(self) -> Result<Pipeline> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let session = match self.session {
            Some(session) => session,
            None => Arc::new(Session::from_config(&config)?),
        };

        Ok(Pipeline {
            reshaper: Reshaper::new(
                config.date_token.clone(),
                config.warehouse_suffix_separator.clone(),
            ),
            cleaner: StructuralCleaner::new(config.discontinued_sentinel.clone()),
            repairer: OutlierRepairer::new(config.abs_jump, config.rel_jump),
            merger: SeriesMerger,
            config,
            session,
            progress_reporter: self.progress_reporter,
            cancellation_token: self.cancellation_token.unwrap_or_default(),
        })
    }
}

/// Write the report, then publish the table.
///
/// A failed table write removes the report again, so a run leaves either
/// both files or neither.
fn publish<T: Serialize>(
    table: &mut DataFrame,
    path: &Path,
    report: Option<(&T, &Path)>,
) -> Result<Option<PathBuf>> {
    let report_path = match report {
        Some((report, report_path)) => Some(ReportGenerator::write_report(report, report_path)?),
        None => None,
    };
    if let Err(e) = write_parquet_atomic(table, path) {
        if let Some(written) = &report_path {
            let _ = fs::remove_file(written);
        }
        return Err(e);
    }
    Ok(report_path)
}
