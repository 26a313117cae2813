//! Custom error types for the stock reconciliation pipeline.
//!
//! Errors fall into three families: structural errors that abort a whole
//! period (the shape of the wide table could not be determined), configuration
//! errors that fail before any data moves, and wrapped I/O or library errors.
//! Row-level data problems never surface here; they are absorbed into the
//! table as nulls or dropped rows.
//!
//! Errors are serializable so they can be emitted as JSON by the CLI.

use serde::Serialize;
use serde::ser::SerializeStruct;
use thiserror::Error;

/// The main error type for the reconciliation pipeline.
#[derive(Error, Debug)]
pub enum ReconError {
    /// Pipeline was cancelled through its cancellation token.
    #[error("Pipeline cancelled")]
    Cancelled,

    /// Column was not found in the table.
    #[error("Column '{0}' not found in table")]
    ColumnNotFound(String),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The wide input has no data rows or no columns beyond the item id.
    #[error("Input table is empty: {0}")]
    EmptyInput(String),

    /// No column header contains the date token, so no block can be formed.
    #[error("No date-marker column found (looked for headers containing '{token}')")]
    NoDateColumns { token: String },

    /// A date-marker column carries no date in its first data row.
    #[error("Date-marker column '{column}' has no date value in the first data row")]
    MissingBlockDate { column: String },

    /// Curated tables being merged do not share the same columns.
    #[error("Schema mismatch in '{source_name}': expected columns {expected:?}, found {found:?}")]
    SchemaMismatch {
        source_name: String,
        expected: Vec<String>,
        found: Vec<String>,
    },

    /// Required environment variables for the sink are missing.
    #[error("Missing environment variables: {}", .0.join(", "))]
    MissingEnvVars(Vec<String>),

    /// Nothing to process (no period inputs discovered).
    #[error("No inputs found: {0}")]
    NoInputs(String),

    /// Structural cleaning failed.
    #[error("Failed to clean data: {0}")]
    CleaningFailed(String),

    /// Internal error (e.g., thread pool construction failure).
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Polars error wrapper.
    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Relational sink error.
    #[error("Sink error: {0}")]
    Sink(#[from] postgres::Error),

    /// Generic error with context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<ReconError>,
    },
}

impl ReconError {
    /// Add context to an error.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        ReconError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Stable error code for machine consumers.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Cancelled => "CANCELLED",
            Self::ColumnNotFound(_) => "COLUMN_NOT_FOUND",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::EmptyInput(_) => "EMPTY_INPUT",
            Self::NoDateColumns { .. } => "NO_DATE_COLUMNS",
            Self::MissingBlockDate { .. } => "MISSING_BLOCK_DATE",
            Self::SchemaMismatch { .. } => "SCHEMA_MISMATCH",
            Self::MissingEnvVars(_) => "MISSING_ENV_VARS",
            Self::NoInputs(_) => "NO_INPUTS",
            Self::CleaningFailed(_) => "CLEANING_FAILED",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Polars(_) => "POLARS_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Sink(_) => "SINK_ERROR",
            Self::WithContext { source, .. } => source.error_code(),
        }
    }

    /// Check if this error represents a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Structural errors mean the period's shape could not be determined.
    pub fn is_structural(&self) -> bool {
        match self {
            Self::EmptyInput(_) | Self::NoDateColumns { .. } | Self::MissingBlockDate { .. } => {
                true
            }
            Self::WithContext { source, .. } => source.is_structural(),
            _ => false,
        }
    }

    /// Configuration errors are raised before any data is read or written.
    pub fn is_configuration(&self) -> bool {
        match self {
            Self::InvalidConfig(_) | Self::MissingEnvVars(_) => true,
            Self::WithContext { source, .. } => source.is_configuration(),
            _ => false,
        }
    }
}

/// Errors are serialized as a struct with `code` and `message` fields.
impl Serialize for ReconError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("ReconError", 2)?;
        state.serialize_field("code", &self.error_code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Result type alias for reconciliation operations.
pub type Result<T> = std::result::Result<T, ReconError>;

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, polars::error::PolarsError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| ReconError::Polars(e).with_context(context))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| ReconError::Io(e).with_context(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        assert_eq!(ReconError::Cancelled.error_code(), "CANCELLED");
        assert_eq!(
            ReconError::MissingBlockDate {
                column: "Date.2".to_string()
            }
            .error_code(),
            "MISSING_BLOCK_DATE"
        );
    }

    #[test]
    fn test_is_structural() {
        assert!(
            ReconError::NoDateColumns {
                token: "Date".to_string()
            }
            .is_structural()
        );
        assert!(ReconError::EmptyInput("2024.csv".to_string()).is_structural());
        assert!(!ReconError::Cancelled.is_structural());
        assert!(
            ReconError::EmptyInput("x".to_string())
                .with_context("Reshaping period 2024")
                .is_structural()
        );
    }

    #[test]
    fn test_is_configuration() {
        let err = ReconError::MissingEnvVars(vec!["STOCK_SINK_URL".to_string()]);
        assert!(err.is_configuration());
        assert!(err.to_string().contains("STOCK_SINK_URL"));
        assert!(!ReconError::CleaningFailed("x".to_string()).is_configuration());
    }

    #[test]
    fn test_error_serialization() {
        let error = ReconError::ColumnNotFound("WhsCode".to_string());
        let json = serde_json::to_string(&error).unwrap();
        assert!(json.contains("COLUMN_NOT_FOUND"));
        assert!(json.contains("WhsCode"));
    }

    #[test]
    fn test_with_context() {
        let error = ReconError::ColumnNotFound("OnHand".to_string()).with_context("During merge");
        assert!(error.to_string().contains("During merge"));
        assert_eq!(error.error_code(), "COLUMN_NOT_FOUND");
    }
}
