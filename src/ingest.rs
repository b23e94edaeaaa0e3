// Ingestion adapters.
//
// Two sources feed the pipeline: a bulk CSV extract and the paginated
// ClinicalTrials.gov v2 API. Both emit the same CanonicalRecord shape so
// everything downstream is source-agnostic. Adapters do structural mapping
// only - semantic cleaning belongs to the cleaner.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use log::{info, warn};
use serde_json::Value;

use crate::config;
use crate::error::{PipelineError, Result};
use crate::record::{CanonicalRecord, LocationRecord, SourceType};

// ============================================================================
// INGESTOR TRAIT
// ============================================================================

/// Common interface for all data sources. One required operation: produce a
/// canonical batch. Adding a source means implementing this trait; nothing
/// downstream changes.
pub trait Ingestor {
    /// Read the source and return raw canonical records (no cleaning applied).
    fn ingest(&self) -> Result<Vec<CanonicalRecord>>;

    /// Which source this adapter reads.
    fn source_type(&self) -> SourceType;
}

// ============================================================================
// CSV INGESTOR
// ============================================================================

/// Columns the bulk extract must contain.
pub const EXPECTED_COLUMNS: &[&str] = &[
    "Organization Full Name",
    "Organization Class",
    "Responsible Party",
    "Brief Title",
    "Full Title",
    "Overall Status",
    "Start Date",
    "Standard Age",
    "Conditions",
    "Primary Purpose",
    "Interventions",
    "Intervention Description",
    "Study Type",
    "Phases",
    "Outcome Measure",
    "Medical Subject Headings",
];

/// Reads the fixed-schema bulk CSV. Performs column checks and structural
/// mapping only; stray columns (e.g. an unnamed positional index) are
/// dropped by the typed record and logged.
pub struct CsvIngestor {
    path: PathBuf,
}

impl CsvIngestor {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        CsvIngestor {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl Ingestor for CsvIngestor {
    fn ingest(&self) -> Result<Vec<CanonicalRecord>> {
        let file = File::open(&self.path).map_err(|e| {
            PipelineError::SourceUnavailable(format!(
                "cannot open CSV file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        info!("Reading CSV: {}", self.path.display());
        let records = read_canonical_csv(file)?;
        info!("CSV ingestion complete: {} rows", records.len());

        Ok(records)
    }

    fn source_type(&self) -> SourceType {
        SourceType::Csv
    }
}

/// Parse canonical records from any CSV reader. Split out from the file
/// adapter so tests can feed in-memory data.
pub fn read_canonical_csv<R: Read>(reader: R) -> Result<Vec<CanonicalRecord>> {
    let mut rdr = csv::Reader::from_reader(reader);

    // Schema check before deserializing anything
    let headers = rdr
        .headers()
        .map_err(|e| PipelineError::SourceFormat(format!("unreadable CSV header: {}", e)))?
        .clone();

    let present: Vec<&str> = headers.iter().collect();
    let missing: Vec<&str> = EXPECTED_COLUMNS
        .iter()
        .filter(|c| !present.contains(c))
        .copied()
        .collect();
    if !missing.is_empty() {
        return Err(PipelineError::SourceFormat(format!(
            "CSV is missing required columns: {}",
            missing.join(", ")
        )));
    }

    // Stray columns never make it into the canonical shape
    let stray: Vec<&str> = present
        .iter()
        .filter(|c| !EXPECTED_COLUMNS.contains(c))
        .copied()
        .collect();
    if !stray.is_empty() {
        info!("Dropping {} non-canonical column(s): {:?}", stray.len(), stray);
    }

    let mut records = Vec::new();
    for (i, result) in rdr.deserialize::<CanonicalRecord>().enumerate() {
        let mut record = result.map_err(|e| {
            PipelineError::SourceFormat(format!("CSV row {} does not match schema: {}", i + 2, e))
        })?;
        record.data_source = SourceType::Csv;
        records.push(record);
    }

    Ok(records)
}

// ============================================================================
// API INGESTOR
// ============================================================================

/// Fetches studies from the ClinicalTrials.gov v2 API.
///
/// Token-based pagination (`nextPageToken`), fixed inter-page delay to
/// respect the upstream rate limit, bounded per-page retries with linear
/// backoff. Nested per-study JSON is flattened into the same
/// delimiter-packed shape the CSV columns use.
pub struct ApiIngestor {
    base_url: String,
    condition: Option<String>,
    status: Option<String>,
    phase: Option<String>,
    max_studies: usize,
    page_size: usize,
    rate_limit: Duration,
    timeout: Duration,
    max_retries: u32,
}

impl ApiIngestor {
    pub fn new() -> Self {
        ApiIngestor {
            base_url: config::API_BASE_URL.to_string(),
            condition: None,
            status: None,
            phase: None,
            max_studies: config::API_DEFAULT_MAX_STUDIES,
            page_size: config::API_PAGE_SIZE,
            rate_limit: Duration::from_millis(config::API_RATE_LIMIT_MILLIS),
            timeout: Duration::from_secs(config::API_TIMEOUT_SECS),
            max_retries: config::API_MAX_RETRIES,
        }
    }

    /// Filter by condition/disease (e.g. "Breast Cancer").
    pub fn with_condition(mut self, condition: &str) -> Self {
        self.condition = Some(condition.to_string());
        self
    }

    /// Filter by overall status (e.g. "RECRUITING").
    pub fn with_status(mut self, status: &str) -> Self {
        self.status = Some(status.to_string());
        self
    }

    /// Filter by phase (e.g. "PHASE2").
    pub fn with_phase(mut self, phase: &str) -> Self {
        self.phase = Some(phase.to_string());
        self
    }

    pub fn with_max_studies(mut self, max_studies: usize) -> Self {
        self.max_studies = max_studies;
        self
    }

    /// Override the inter-page pacing delay (tests run against a local stub
    /// and skip the real rate limit).
    pub fn with_rate_limit(mut self, rate_limit: Duration) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Point at a different endpoint (testing against a local server).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }

    // ------------------------------------------------------------------
    // Pagination
    // ------------------------------------------------------------------
    fn fetch_all_pages(&self, client: &reqwest::blocking::Client) -> Result<Vec<Value>> {
        let mut all_studies: Vec<Value> = Vec::new();
        let mut page_token: Option<String> = None;
        let mut page_num = 0u32;

        while all_studies.len() < self.max_studies {
            page_num += 1;
            let remaining = self.max_studies - all_studies.len();
            let page_size = self.page_size.min(remaining);

            let mut params: Vec<(String, String)> = vec![
                ("format".into(), "json".into()),
                ("pageSize".into(), page_size.to_string()),
            ];
            if let Some(c) = &self.condition {
                params.push(("query.cond".into(), c.clone()));
            }
            if let Some(s) = &self.status {
                params.push(("filter.overallStatus".into(), s.clone()));
            }
            if let Some(p) = &self.phase {
                params.push(("filter.phase".into(), p.clone()));
            }
            if let Some(token) = &page_token {
                params.push(("pageToken".into(), token.clone()));
            }

            let data = self.fetch_page(client, &params, page_num)?;

            let studies = match data.get("studies").and_then(Value::as_array) {
                Some(arr) if !arr.is_empty() => arr.clone(),
                _ => {
                    info!("No more studies to fetch (page {})", page_num);
                    break;
                }
            };

            all_studies.extend(studies.iter().cloned());
            info!(
                "  Page {}: fetched {} studies (total so far: {})",
                page_num,
                studies.len(),
                all_studies.len()
            );

            page_token = data
                .get("nextPageToken")
                .and_then(Value::as_str)
                .map(str::to_string);
            if page_token.is_none() {
                info!("Reached last page");
                break;
            }

            thread::sleep(self.rate_limit);
        }

        all_studies.truncate(self.max_studies);
        Ok(all_studies)
    }

    /// One page, retried up to the attempt ceiling. The ceiling exhausting
    /// fails the whole ingestion rather than silently truncating data.
    fn fetch_page(
        &self,
        client: &reqwest::blocking::Client,
        params: &[(String, String)],
        page_num: u32,
    ) -> Result<Value> {
        let mut last_error = String::new();

        for attempt in 1..=self.max_retries {
            let response = client
                .get(&self.base_url)
                .query(params)
                .send()
                .and_then(|r| r.error_for_status())
                .and_then(|r| r.json::<Value>());

            match response {
                Ok(data) => return Ok(data),
                Err(e) => {
                    last_error = e.to_string();
                    warn!(
                        "API request failed on page {} (attempt {}/{}): {}",
                        page_num, attempt, self.max_retries, last_error
                    );
                    if attempt < self.max_retries {
                        // Linear backoff on top of the normal pacing delay
                        thread::sleep(self.rate_limit * attempt);
                    }
                }
            }
        }

        Err(PipelineError::SourceUnavailable(format!(
            "API page {} failed after {} attempts: {}",
            page_num, self.max_retries, last_error
        )))
    }
}

impl Default for ApiIngestor {
    fn default() -> Self {
        Self::new()
    }
}

impl Ingestor for ApiIngestor {
    fn ingest(&self) -> Result<Vec<CanonicalRecord>> {
        info!(
            "Fetching up to {} studies from {}",
            self.max_studies, self.base_url
        );

        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("trial-warehouse/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PipelineError::SourceUnavailable(format!("HTTP client init: {}", e)))?;

        let raw_studies = self.fetch_all_pages(&client)?;
        if raw_studies.is_empty() {
            warn!("No studies returned from API");
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        let mut skipped = 0usize;
        for study in &raw_studies {
            match flatten_study(study) {
                Some(record) => records.push(record),
                None => {
                    skipped += 1;
                    let nct = study
                        .pointer("/protocolSection/identificationModule/nctId")
                        .and_then(Value::as_str)
                        .unwrap_or("?");
                    warn!("Failed to flatten study {}", nct);
                }
            }
        }

        info!(
            "API ingestion complete: {} studies flattened, {} skipped",
            records.len(),
            skipped
        );
        Ok(records)
    }

    fn source_type(&self) -> SourceType {
        SourceType::Api
    }
}

// ============================================================================
// JSON → CANONICAL FLATTENING
// ============================================================================

fn str_at(v: &Value, pointer: &str) -> Option<String> {
    v.pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Join the string values of an array field, skipping non-strings.
/// Returns None when the array is missing or empty so the canonical
/// null convention holds.
fn join_at(v: &Value, pointer: &str, separator: &str) -> Option<String> {
    let items: Vec<&str> = v
        .pointer(pointer)?
        .as_array()?
        .iter()
        .filter_map(Value::as_str)
        .collect();
    if items.is_empty() {
        None
    } else {
        Some(items.join(separator))
    }
}

/// Join one string field from each object in an array (e.g. every
/// intervention's "name").
fn join_field_at(v: &Value, pointer: &str, field: &str, separator: &str) -> Option<String> {
    let items: Vec<&str> = v
        .pointer(pointer)?
        .as_array()?
        .iter()
        .filter_map(|o| o.get(field).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
        .collect();
    if items.is_empty() {
        None
    } else {
        Some(items.join(separator))
    }
}

/// Flatten one nested API study into the canonical shape. The API nests
/// everything under protocolSection modules; multi-value arrays become the
/// same delimiter-packed strings the bulk CSV carries so the cleaner treats
/// both sources identically.
///
/// Returns None when the study lacks the protocolSection envelope entirely.
fn flatten_study(study: &Value) -> Option<CanonicalRecord> {
    study.get("protocolSection")?;

    let locations = study
        .pointer("/protocolSection/contactsLocationsModule/locations")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .map(|loc| LocationRecord {
                    facility: loc.get("facility").and_then(Value::as_str).map(str::to_string),
                    city: loc.get("city").and_then(Value::as_str).map(str::to_string),
                    state: loc.get("state").and_then(Value::as_str).map(str::to_string),
                    country: loc.get("country").and_then(Value::as_str).map(str::to_string),
                    zip_code: loc.get("zip").and_then(Value::as_str).map(str::to_string),
                })
                .collect()
        })
        .unwrap_or_default();

    Some(CanonicalRecord {
        org_name: str_at(study, "/protocolSection/identificationModule/organization/fullName"),
        org_class: str_at(study, "/protocolSection/identificationModule/organization/class"),
        responsible_party: str_at(
            study,
            "/protocolSection/sponsorCollaboratorsModule/responsibleParty/type",
        ),
        brief_title: str_at(study, "/protocolSection/identificationModule/briefTitle"),
        full_title: str_at(study, "/protocolSection/identificationModule/officialTitle"),
        overall_status: str_at(study, "/protocolSection/statusModule/overallStatus"),
        start_date: str_at(study, "/protocolSection/statusModule/startDateStruct/date"),
        age_groups: join_at(study, "/protocolSection/eligibilityModule/stdAges", " "),
        conditions: join_at(study, "/protocolSection/conditionsModule/conditions", ", "),
        primary_purpose: str_at(
            study,
            "/protocolSection/designModule/designInfo/primaryPurpose",
        ),
        interventions: join_field_at(
            study,
            "/protocolSection/armsInterventionsModule/interventions",
            "name",
            ", ",
        ),
        intervention_description: join_field_at(
            study,
            "/protocolSection/armsInterventionsModule/interventions",
            "description",
            " | ",
        ),
        study_type: str_at(study, "/protocolSection/designModule/studyType"),
        phases: join_at(study, "/protocolSection/designModule/phases", ", "),
        outcome_measure: join_field_at(
            study,
            "/protocolSection/outcomesModule/primaryOutcomes",
            "measure",
            " | ",
        ),
        mesh_terms: join_at(study, "/protocolSection/conditionsModule/keywords", ", "),
        nct_id: str_at(study, "/protocolSection/identificationModule/nctId"),
        enrollment: study
            .pointer("/protocolSection/designModule/enrollmentInfo/count")
            .and_then(Value::as_i64),
        locations,
        data_source: SourceType::Api,
    })
}

// ============================================================================
// TESTS
// ============================================================================
