//! Structured error kinds shared by every pipeline stage.
//!
//! Stage implementations return [`PipelineError`]; orchestration code at the
//! CLI boundary bridges into `anyhow::Result` the way the rest of this
//! workspace does.

use thiserror::Error;

/// The six error kinds a pipeline invocation can fail with.
///
/// Every variant maps to one of the kinds a failure event reports: the
/// orchestrator attaches the variant's name as `error_code` and re-raises
/// after publishing, so the event bus can redeliver.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Missing path, missing required request field, unknown write mode,
    /// UPSERT without keys, unknown column referenced. No retry.
    #[error("validation error: {0}")]
    Validation(String),

    /// UNKNOWN format, blank/empty file, unrepairable JSON.
    #[error("format error: {0}")]
    Format(String),

    /// Row-count mismatch after recovery, or JSONL repair left unrecoverable
    /// lines. The table is never registered.
    #[error(
        "atomic load failed: {message} (source_rows={source_rows}, loaded_rows={loaded_rows}, \
         empty_rows_removed={empty_rows_removed}, parse_strategy={parse_strategy})"
    )]
    AtomicLoad {
        message: String,
        source_rows: u64,
        loaded_rows: u64,
        empty_rows_removed: u64,
        parse_strategy: String,
    },

    /// The analytic engine reported a binder or execution failure. For
    /// column-binder errors `available_columns` is populated so the caller
    /// can suggest the right name.
    #[error("engine error: {message}{}", format_available_columns(.available_columns))]
    Engine {
        message: String,
        available_columns: Option<Vec<String>>,
    },

    /// Storage, classifier, or lakehouse I/O failed. No retry inside the
    /// core; the external event bus may redeliver.
    #[error("external error ({stage}): {source}")]
    External {
        stage: String,
        #[source]
        source: anyhow::Error,
    },

    /// Safe-execution refused a destructive statement.
    #[error("destructive SQL rejected: {rejected_sql}")]
    DestructiveSql { rejected_sql: String },
}

fn format_available_columns(columns: &Option<Vec<String>>) -> String {
    match columns {
        Some(cols) => format!(" (available columns: {})", cols.join(", ")),
        None => String::new(),
    }
}

impl PipelineError {
    /// The bare variant name, used as `error_code` in failure events,
    /// mirroring the source's use of the exception class name.
    pub fn error_code(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "ValidationError",
            PipelineError::Format(_) => "FormatError",
            PipelineError::AtomicLoad { .. } => "AtomicLoadError",
            PipelineError::Engine { .. } => "EngineError",
            PipelineError::External { .. } => "ExternalError",
            PipelineError::DestructiveSql { .. } => "DestructiveSQL",
        }
    }

    pub fn destructive_sql(rejected_sql: impl Into<String>) -> Self {
        PipelineError::DestructiveSql {
            rejected_sql: rejected_sql.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        PipelineError::Validation(message.into())
    }

    pub fn format(message: impl Into<String>) -> Self {
        PipelineError::Format(message.into())
    }

    pub fn external(stage: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        PipelineError::External {
            stage: stage.into(),
            source: source.into(),
        }
    }
}

impl From<datafusion::error::DataFusionError> for PipelineError {
    fn from(err: datafusion::error::DataFusionError) -> Self {
        PipelineError::Engine {
            message: err.to_string(),
            available_columns: None,
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::External {
            stage: "io".to_string(),
            source: err.into(),
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Format(err.to_string())
    }
}

impl From<object_store::Error> for PipelineError {
    fn from(err: object_store::Error) -> Self {
        PipelineError::External {
            stage: "object_store".to_string(),
            source: err.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
