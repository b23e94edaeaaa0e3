// Pipeline orchestration: ingest -> clean -> validate -> load.
//
// A run takes one or more sources; their canonical batches are concatenated
// and go through a single clean/validate/load under one run id. Each stage
// is also callable on its own for external schedulers that want finer
// control.

use std::path::PathBuf;

use log::{info, warn};

use crate::cleaner::{CleaningEngine, CleaningStats};
use crate::config::generate_run_id;
use crate::error::{PipelineError, Result};
use crate::ingest::Ingestor;
use crate::loader::{LoadReport, Loader};
use crate::record::CanonicalRecord;
use crate::validator::{ValidationOutcome, Validator, ValidatorConfig};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub db_path: PathBuf,
    pub validator: ValidatorConfig,
}

impl PipelineConfig {
    pub fn new<P: Into<PathBuf>>(db_path: P) -> Self {
        PipelineConfig {
            db_path: db_path.into(),
            validator: ValidatorConfig::default(),
        }
    }
}

/// Everything one run produced, for the caller's summary output.
#[derive(Debug)]
pub struct RunSummary {
    pub run_id: String,
    pub rows_ingested: usize,
    pub cleaning: CleaningStats,
    pub validation: ValidationOutcome,
    pub load: LoadReport,
}

/// Ingestion stage for a single source.
pub fn ingest(source: &dyn Ingestor) -> Result<Vec<CanonicalRecord>> {
    let records = source.ingest()?;
    info!(
        "ingested {} records from {} source",
        records.len(),
        source.source_type().name()
    );
    Ok(records)
}

/// Ingest every source in order and concatenate into one canonical batch.
/// Any source failing fails the whole ingestion; a combined run never loads
/// a partial source set silently.
pub fn ingest_all(sources: &[&dyn Ingestor]) -> Result<Vec<CanonicalRecord>> {
    let mut records = Vec::new();
    for source in sources {
        records.extend(ingest(*source)?);
    }
    Ok(records)
}

/// Full run against a database file. Generates the run id, sequences the
/// stages, and aborts before any write when validation fails.
pub fn run_pipeline(sources: &[&dyn Ingestor], config: &PipelineConfig) -> Result<RunSummary> {
    let run_id = generate_run_id();
    let mut loader = Loader::open(&config.db_path, &run_id)?;
    run_with_loader(sources, &mut loader, &config.validator, run_id)
}

/// Same sequencing with a caller-owned Loader; the caller keeps the
/// connection for inspection afterwards.
pub fn run_with_loader(
    sources: &[&dyn Ingestor],
    loader: &mut Loader,
    validator_config: &ValidatorConfig,
    run_id: String,
) -> Result<RunSummary> {
    info!(
        "pipeline run {} starting ({} source(s))",
        run_id,
        sources.len()
    );

    let records = ingest_all(sources)?;
    let rows_ingested = records.len();

    let (batch, cleaning) = CleaningEngine::new().clean(records);
    info!("{}", cleaning.summary());

    let validation = Validator::with_config(validator_config.clone()).validate(&batch);
    for finding in &validation.findings {
        warn!("[{}] {}", finding.check, finding.message);
    }
    if !validation.passed {
        // Nothing has been written yet; the warehouse is untouched.
        return Err(PipelineError::ValidationFailed {
            errors: validation.errors().count(),
            report: validation.report(),
        });
    }

    let load = loader.load(&batch)?;
    info!("pipeline run {} complete", run_id);

    Ok(RunSummary {
        run_id,
        rows_ingested,
        cleaning,
        validation,
        load,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::read_run_log;
    use crate::record::SourceType;
    use rusqlite::Connection;

    /// In-memory source so end-to-end tests skip file and network IO.
    struct StubSource {
        records: Vec<CanonicalRecord>,
        source_type: SourceType,
    }

    impl StubSource {
        fn api(records: Vec<CanonicalRecord>) -> Self {
            StubSource {
                records,
                source_type: SourceType::Api,
            }
        }

        fn csv(records: Vec<CanonicalRecord>) -> Self {
            StubSource {
                records,
                source_type: SourceType::Csv,
            }
        }
    }

    impl Ingestor for StubSource {
        fn ingest(&self) -> Result<Vec<CanonicalRecord>> {
            Ok(self.records.clone())
        }

        fn source_type(&self) -> SourceType {
            self.source_type
        }
    }

    fn record(title: &str, date: &str) -> CanonicalRecord {
        CanonicalRecord {
            org_name: Some("NIH".into()),
            org_class: Some("NIH".into()),
            brief_title: Some(title.into()),
            study_type: Some("INTERVENTIONAL".into()),
            overall_status: Some("COMPLETED".into()),
            start_date: Some(date.into()),
            conditions: Some("Diabetes, Hypertension".into()),
            interventions: Some("Metformin".into()),
            age_groups: Some("ADULT OLDER_ADULT".into()),
            data_source: SourceType::Api,
            ..CanonicalRecord::default()
        }
    }

    #[test]
    fn test_end_to_end_date_handling() {
        let source = StubSource::api(vec![
            record("Exact", "2021-06-15"),
            record("YearMonth", "2021-06"),
            record("Garbage", "sometime in spring"),
        ]);

        let conn = Connection::open_in_memory().unwrap();
        let mut loader = Loader::with_connection(conn, "e2e-run").unwrap();
        let summary = run_with_loader(
            &[&source],
            &mut loader,
            &ValidatorConfig::default(),
            "e2e-run".into(),
        )
        .unwrap();

        assert_eq!(summary.rows_ingested, 3);
        assert_eq!(summary.load.studies_inserted, 3);
        assert!(summary.validation.passed);

        let conn = loader.connection();
        let rows: Vec<(Option<String>, Option<String>, bool)> = conn
            .prepare(
                "SELECT start_date, start_date_raw, start_date_is_approx
                 FROM studies ORDER BY study_id",
            )
            .unwrap()
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();

        assert_eq!(
            rows[0],
            (
                Some("2021-06-15".into()),
                Some("2021-06-15".into()),
                false
            )
        );
        // Month precision: day defaulted, flagged approximate
        assert_eq!(
            rows[1],
            (Some("2021-06-01".into()), Some("2021-06".into()), true)
        );
        // Unparseable: date NULL, raw text kept for audit
        assert_eq!(
            rows[2],
            (None, Some("sometime in spring".into()), false)
        );
    }

    #[test]
    fn test_end_to_end_bridges_and_log() {
        let source = StubSource::api(vec![record("Bridged", "2020-01-01")]);
        let conn = Connection::open_in_memory().unwrap();
        let mut loader = Loader::with_connection(conn, "bridge-run").unwrap();
        let summary = run_with_loader(
            &[&source],
            &mut loader,
            &ValidatorConfig::default(),
            "bridge-run".into(),
        )
        .unwrap();

        // 2 conditions + 1 intervention + 2 age groups
        assert_eq!(summary.load.bridge_rows_inserted, 5);

        let log = read_run_log(loader.connection(), "bridge-run").unwrap();
        assert!(log.iter().all(|e| e.status == "SUCCESS"));
        assert_eq!(log.len(), 5);
    }

    #[test]
    fn test_combined_sources_load_as_one_run() {
        let mut bulk_row = record("Bulk Study", "2019-03-01");
        bulk_row.data_source = SourceType::Csv;
        bulk_row.conditions = Some("Asthma".into());
        let csv_source = StubSource::csv(vec![bulk_row]);

        let mut api_row = record("Api Study", "2022-11");
        api_row.nct_id = Some("NCT07654321".into());
        let api_source = StubSource::api(vec![api_row]);

        let conn = Connection::open_in_memory().unwrap();
        let mut loader = Loader::with_connection(conn, "both-run").unwrap();
        let summary = run_with_loader(
            &[&csv_source as &dyn Ingestor, &api_source],
            &mut loader,
            &ValidatorConfig::default(),
            "both-run".into(),
        )
        .unwrap();

        assert_eq!(summary.rows_ingested, 2);
        assert_eq!(summary.load.studies_inserted, 2);
        assert!(summary.validation.passed);

        let conn = loader.connection();
        let tags: Vec<String> = conn
            .prepare("SELECT data_source FROM studies ORDER BY study_id")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(tags, vec!["csv".to_string(), "api".to_string()]);

        // One run log trail covers both sources
        let log = read_run_log(conn, "both-run").unwrap();
        assert_eq!(log.len(), 5);
        assert!(log.iter().all(|e| e.status == "SUCCESS"));
    }

    #[test]
    fn test_combined_run_keeps_bridges_per_row() {
        let mut bulk_row = record("Bulk Study", "2019-03-01");
        bulk_row.data_source = SourceType::Csv;
        bulk_row.conditions = Some("Asthma".into());
        let csv_source = StubSource::csv(vec![bulk_row]);
        let api_source = StubSource::api(vec![record("Api Study", "2022-11")]);

        let records = ingest_all(&[&csv_source as &dyn Ingestor, &api_source]).unwrap();
        let (batch, _) = CleaningEngine::new().clean(records);

        assert_eq!(batch.conditions_for(0), vec!["Asthma"]);
        assert_eq!(batch.conditions_for(1), vec!["Diabetes", "Hypertension"]);
    }

    #[test]
    fn test_failing_source_fails_combined_ingestion() {
        struct BrokenSource;
        impl Ingestor for BrokenSource {
            fn ingest(&self) -> Result<Vec<CanonicalRecord>> {
                Err(PipelineError::SourceUnavailable("offline".into()))
            }
            fn source_type(&self) -> SourceType {
                SourceType::Api
            }
        }

        let ok = StubSource::csv(vec![record("Fine", "2020-01-01")]);
        let err = ingest_all(&[&ok as &dyn Ingestor, &BrokenSource]).unwrap_err();
        assert!(matches!(err, PipelineError::SourceUnavailable(_)));
    }

    #[test]
    fn test_validation_failure_aborts_before_any_write() {
        let mut bad = record("", "2021-01-01");
        bad.brief_title = None;
        let source = StubSource::api(vec![bad]);

        let conn = Connection::open_in_memory().unwrap();
        let mut loader = Loader::with_connection(conn, "failed-run").unwrap();
        let err = run_with_loader(
            &[&source],
            &mut loader,
            &ValidatorConfig::default(),
            "failed-run".into(),
        )
        .unwrap_err();

        match err {
            PipelineError::ValidationFailed { errors, report } => {
                assert_eq!(errors, 1);
                assert!(report.contains("brief_title"));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let conn = loader.connection();
        let studies: i64 = conn
            .query_row("SELECT COUNT(*) FROM studies", [], |r| r.get(0))
            .unwrap();
        assert_eq!(studies, 0);
        assert!(read_run_log(conn, "failed-run").unwrap().is_empty());
    }
}
