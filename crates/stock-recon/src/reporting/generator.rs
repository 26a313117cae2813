use crate::config::PipelineConfig;
use crate::error::Result;
use crate::merge::MergeStats;
use crate::reshape::DateBlock;
use crate::storage::write_text_atomic;
use crate::types::RunSummary;
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

// ============================================================================
// Report types
// ============================================================================

/// Report for one period run, printed with `--json` and written next to the
/// curated table when reports are enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Timestamp when the report was generated
    pub generated_at: String,
    /// Path to the wide input, when the run started from a file
    pub input_file: Option<String>,
    /// Path to the curated table (if written)
    pub output_file: Option<String>,
    /// Thresholds and tokens the run used
    pub settings: RunSettings,
    /// Date blocks detected in the wide table
    pub blocks: Vec<BlockReport>,
    /// Counters for every stage
    pub summary: RunSummary,
}

/// Settings echoed into a report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSettings {
    pub abs_jump: f64,
    pub rel_jump: f64,
    pub date_token: String,
    pub discontinued_sentinel: String,
}

impl From<&PipelineConfig> for RunSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            abs_jump: config.abs_jump,
            rel_jump: config.rel_jump,
            date_token: config.date_token.clone(),
            discontinued_sentinel: config.discontinued_sentinel.clone(),
        }
    }
}

/// One detected date block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockReport {
    pub marker: String,
    pub date: Option<String>,
    pub warehouses: usize,
}

impl From<&DateBlock> for BlockReport {
    fn from(block: &DateBlock) -> Self {
        Self {
            marker: block.marker.clone(),
            date: block.date.clone(),
            warehouses: block.warehouse_columns.len(),
        }
    }
}

/// Report for a merge of period tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeReport {
    pub generated_at: String,
    pub sources: Vec<String>,
    pub output_file: Option<String>,
    pub stats: MergeStats,
}

// ============================================================================
// Generator
// ============================================================================

/// Builds and writes run reports.
pub struct ReportGenerator;

impl ReportGenerator {
    /// Build a report for one period run.
    pub fn build_run_report(
        config: &PipelineConfig,
        input_file: Option<&Path>,
        output_file: Option<&Path>,
        blocks: &[DateBlock],
        summary: &RunSummary,
    ) -> RunReport {
        RunReport {
            generated_at: timestamp(),
            input_file: input_file.map(|p| p.display().to_string()),
            output_file: output_file.map(|p| p.display().to_string()),
            settings: RunSettings::from(config),
            blocks: blocks.iter().map(BlockReport::from).collect(),
            summary: summary.clone(),
        }
    }

    /// Build a report for a merge.
    pub fn build_merge_report(
        sources: &[PathBuf],
        output_file: Option<&Path>,
        stats: &MergeStats,
    ) -> MergeReport {
        MergeReport {
            generated_at: timestamp(),
            sources: sources.iter().map(|p| p.display().to_string()).collect(),
            output_file: output_file.map(|p| p.display().to_string()),
            stats: stats.clone(),
        }
    }

    /// Write any report as pretty JSON, atomically.
    pub fn write_report<T: Serialize>(report: &T, path: &Path) -> Result<PathBuf> {
        let json = serde_json::to_string_pretty(report)?;
        write_text_atomic(&json, path)?;
        info!("Report saved: {}", path.display());
        Ok(path.to_path_buf())
    }
}

fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
