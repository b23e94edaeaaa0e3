// Trial Warehouse - Core Library
// Clinical-trial ETL: CSV / ClinicalTrials.gov ingestion, cleaning,
// validation, and a normalized SQLite warehouse with per-run logging.

pub mod cleaner;
pub mod config;
pub mod error;
pub mod ingest;
pub mod loader;
pub mod pipeline;
pub mod record;
pub mod validator;

// Re-export commonly used types
pub use cleaner::{CleaningEngine, CleaningStats};
pub use error::{PipelineError, Result};
pub use ingest::{ApiIngestor, CsvIngestor, Ingestor};
pub use loader::{read_run_log, setup_schema, LoadReport, Loader, LogEntry};
pub use pipeline::{ingest, ingest_all, run_pipeline, run_with_loader, PipelineConfig, RunSummary};
pub use record::{
    BridgeRow, CanonicalRecord, CleanedBatch, LocationRecord, LocationRow, SourceType, StudyRecord,
};
pub use validator::{Finding, Severity, ValidationOutcome, Validator, ValidatorConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
