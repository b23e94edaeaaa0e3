// Pipeline error taxonomy.
//
// Everything that escapes an adapter, the validator, or the loader lands in
// one of these variants so callers can decide between retry, abort, or
// manual remediation. Cleaning rules never raise: they degrade individual
// fields to absence instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Transient source failure (file missing, API unreachable after retries).
    /// Retryable at the adapter boundary.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// The source violated its contract (missing columns, malformed payload).
    /// Fatal for this ingestion run.
    #[error("source format error: {0}")]
    SourceFormat(String),

    /// The cleaned batch failed the quality gate; nothing was loaded.
    #[error("validation failed with {errors} error(s):\n{report}")]
    ValidationFailed { errors: usize, report: String },

    /// A load step failed. Prior steps' writes stand; the pipeline_log
    /// entry records how far the run got.
    #[error("load step '{step}' failed: {message}")]
    LoadStep { step: String, message: String },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
