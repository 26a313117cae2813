//! Configuration types for the reconciliation pipeline.
//!
//! This module provides configuration options using the builder pattern,
//! plus the environment-sourced connection settings for the relational sink.

use crate::error::{ReconError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Default absolute day-over-day jump (units) above which a value is an outlier.
pub const DEFAULT_ABS_JUMP: f64 = 500.0;

/// Default relative day-over-day jump (multiple of the previous value).
pub const DEFAULT_REL_JUMP: f64 = 5.0;

/// Configuration for the reconciliation pipeline.
///
/// Use [`PipelineConfig::builder()`] to create a new configuration
/// with fluent API.
///
/// # Example
///
/// ```rust,ignore
/// use stock_recon::config::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .abs_jump(250.0)
///     .rel_jump(3.0)
///     .output_dir("output")
///     .build()?;
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Absolute change versus the previous valid value that flags an outlier.
    /// Default: 500.0
    pub abs_jump: f64,

    /// Relative change versus the previous valid value that flags an outlier.
    /// 5.0 means a change of more than 5x the previous value.
    /// Default: 5.0
    pub rel_jump: f64,

    /// Token that marks a date-marker column header.
    /// Default: "Date"
    pub date_token: String,

    /// Separator after which a warehouse header carries a disambiguating suffix.
    /// Default: "."
    pub warehouse_suffix_separator: String,

    /// Literal quantity cell meaning "discontinued".
    /// Default: "DC"
    pub discontinued_sentinel: String,

    /// Worker threads for the session pool; 0 lets rayon decide.
    /// Default: 0
    pub num_threads: usize,

    /// Output directory for curated tables and reports.
    /// Default: "output"
    pub output_dir: PathBuf,

    /// Whether to write the curated table to disk.
    /// When false, results are kept in memory only.
    /// Default: true
    pub save_to_disk: bool,

    /// Whether to write a JSON run report next to the curated table.
    /// Default: true
    pub write_report: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            abs_jump: DEFAULT_ABS_JUMP,
            rel_jump: DEFAULT_REL_JUMP,
            date_token: "Date".to_string(),
            warehouse_suffix_separator: ".".to_string(),
            discontinued_sentinel: "DC".to_string(),
            num_threads: 0,
            output_dir: PathBuf::from("output"),
            save_to_disk: true,
            write_report: true,
        }
    }
}

impl PipelineConfig {
    /// Create a new configuration builder.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Validate the configuration and return errors if invalid.
    pub fn validate(&self) -> std::result::Result<(), ConfigValidationError> {
        for (field, value) in [("abs_jump", self.abs_jump), ("rel_jump", self.rel_jump)] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigValidationError::InvalidThreshold {
                    field: field.to_string(),
                    value,
                });
            }
        }

        if self.date_token.trim().is_empty() {
            return Err(ConfigValidationError::EmptyToken("date_token".to_string()));
        }

        if self.warehouse_suffix_separator.is_empty() {
            return Err(ConfigValidationError::EmptyToken(
                "warehouse_suffix_separator".to_string(),
            ));
        }

        if self.discontinued_sentinel.trim().is_empty() {
            return Err(ConfigValidationError::EmptyToken(
                "discontinued_sentinel".to_string(),
            ));
        }

        Ok(())
    }

    /// File name of the curated table for one period.
    pub fn period_output_path(&self, period: &str) -> PathBuf {
        self.output_dir
            .join(format!("{PERIOD_OUTPUT_PREFIX}{period}.parquet"))
    }

    /// File name of the JSON run report for one period.
    pub fn period_report_path(&self, period: &str) -> PathBuf {
        self.output_dir
            .join(format!("{PERIOD_OUTPUT_PREFIX}{period}_report.json"))
    }

    /// File name of the merged history table.
    pub fn merged_output_path(&self) -> PathBuf {
        self.output_dir.join(MERGED_OUTPUT_FILE)
    }

    /// File name of the JSON merge report.
    pub fn merged_report_path(&self) -> PathBuf {
        self.output_dir.join(MERGED_REPORT_FILE)
    }
}

/// Prefix shared by all per-period curated tables.
pub const PERIOD_OUTPUT_PREFIX: &str = "cleaned_stock_";

/// File name of the merged history.
pub const MERGED_OUTPUT_FILE: &str = "final_cleaned_stock.parquet";

pub const MERGED_REPORT_FILE: &str = "final_cleaned_stock_report.json";

/// Errors that can occur during configuration validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Invalid threshold for '{field}': {value} (must be a finite value >= 0)")]
    InvalidThreshold { field: String, value: f64 },

    #[error("'{0}' must not be empty")]
    EmptyToken(String),
}

impl From<ConfigValidationError> for ReconError {
    fn from(err: ConfigValidationError) -> Self {
        ReconError::InvalidConfig(err.to_string())
    }
}

/// Builder for [`PipelineConfig`] with fluent API.
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    abs_jump: Option<f64>,
    rel_jump: Option<f64>,
    date_token: Option<String>,
    warehouse_suffix_separator: Option<String>,
    discontinued_sentinel: Option<String>,
    num_threads: Option<usize>,
    output_dir: Option<PathBuf>,
    save_to_disk: Option<bool>,
    write_report: Option<bool>,
}

impl PipelineConfigBuilder {
    /// Set the absolute jump threshold (units).
    pub fn abs_jump(mut self, threshold: f64) -> Self {
        self.abs_jump = Some(threshold);
        self
    }

    /// Set the relative jump threshold (multiple of the previous value).
    pub fn rel_jump(mut self, threshold: f64) -> Self {
        self.rel_jump = Some(threshold);
        self
    }

    /// Set the token identifying date-marker columns.
    pub fn date_token(mut self, token: impl Into<String>) -> Self {
        self.date_token = Some(token.into());
        self
    }

    /// Set the separator stripped from repeated warehouse headers.
    pub fn warehouse_suffix_separator(mut self, separator: impl Into<String>) -> Self {
        self.warehouse_suffix_separator = Some(separator.into());
        self
    }

    /// Set the literal marking a discontinued item.
    pub fn discontinued_sentinel(mut self, sentinel: impl Into<String>) -> Self {
        self.discontinued_sentinel = Some(sentinel.into());
        self
    }

    /// Set the number of worker threads for the session pool.
    pub fn num_threads(mut self, threads: usize) -> Self {
        self.num_threads = Some(threads);
        self
    }

    /// Set the output directory for curated tables and reports.
    pub fn output_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(path.into());
        self
    }

    /// Enable or disable writing the curated table to disk.
    pub fn save_to_disk(mut self, save: bool) -> Self {
        self.save_to_disk = Some(save);
        self
    }

    /// Enable or disable the JSON run report.
    pub fn write_report(mut self, write: bool) -> Self {
        self.write_report = Some(write);
        self
    }

    /// Build the configuration.
    ///
    /// Returns a validated `PipelineConfig` or an error if validation fails.
    pub fn build(self) -> std::result::Result<PipelineConfig, ConfigValidationError> {
        let defaults = PipelineConfig::default();
        let config = PipelineConfig {
            abs_jump: self.abs_jump.unwrap_or(defaults.abs_jump),
            rel_jump: self.rel_jump.unwrap_or(defaults.rel_jump),
            date_token: self.date_token.unwrap_or(defaults.date_token),
            warehouse_suffix_separator: self
                .warehouse_suffix_separator
                .unwrap_or(defaults.warehouse_suffix_separator),
            discontinued_sentinel: self
                .discontinued_sentinel
                .unwrap_or(defaults.discontinued_sentinel),
            num_threads: self.num_threads.unwrap_or(defaults.num_threads),
            output_dir: self.output_dir.unwrap_or(defaults.output_dir),
            save_to_disk: self.save_to_disk.unwrap_or(defaults.save_to_disk),
            write_report: self.write_report.unwrap_or(defaults.write_report),
        };

        config.validate()?;
        Ok(config)
    }
}

// =============================================================================
// Sink configuration
// =============================================================================

pub const SINK_URL_VAR: &str = "STOCK_SINK_URL";
pub const SINK_USER_VAR: &str = "STOCK_SINK_USER";
pub const SINK_PASSWORD_VAR: &str = "STOCK_SINK_PASSWORD";
pub const SINK_TABLE_VAR: &str = "STOCK_SINK_TABLE";

/// Table used when `STOCK_SINK_TABLE` is unset.
pub const DEFAULT_SINK_TABLE: &str = "stock_history";

/// Connection parameters for the relational sink.
///
/// The password is deliberately excluded from `Debug` output.
#[derive(Clone)]
pub struct SinkConfig {
    pub url: String,
    pub user: String,
    pub password: String,
    pub table: String,
}

impl std::fmt::Debug for SinkConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkConfig")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl SinkConfig {
    /// Read the sink configuration from the process environment.
    ///
    /// Fails with [`ReconError::MissingEnvVars`] listing every required
    /// variable that is unset or blank.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read the sink configuration through an arbitrary lookup function.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let missing: Vec<String> = [SINK_URL_VAR, SINK_USER_VAR, SINK_PASSWORD_VAR]
            .iter()
            .filter(|key| get(key).is_none())
            .map(|key| key.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ReconError::MissingEnvVars(missing));
        }

        let table = get(SINK_TABLE_VAR).unwrap_or_else(|| DEFAULT_SINK_TABLE.to_string());
        if !crate::utils::is_valid_table_name(&table) {
            return Err(ReconError::InvalidConfig(format!(
                "'{table}' is not a valid table name"
            )));
        }

        Ok(Self {
            url: get(SINK_URL_VAR).unwrap_or_default(),
            user: get(SINK_USER_VAR).unwrap_or_default(),
            password: get(SINK_PASSWORD_VAR).unwrap_or_default(),
            table,
        })
    }
}
