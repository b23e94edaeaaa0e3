// Validator - the quality gate between cleaning and loading.
//
// Structural and referential violations are ERRORs and block the load;
// statistical oddities are WARNINGs and load anyway, logged. The outcome is
// FAIL if and only if at least one ERROR finding exists.

use std::collections::{HashMap, HashSet};
use std::ops::RangeInclusive;

use log::{error, info};
use serde::{Deserialize, Serialize};

use crate::config::{
    VALID_AGE_GROUPS, VALID_ORG_CLASSES, VALID_RESPONSIBLE_PARTIES, VALID_STATUSES,
    VALID_STUDY_TYPES,
};
use crate::record::{BridgeRow, CleanedBatch, SourceType};

// ============================================================================
// FINDINGS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    /// Blocks the load.
    Error,
    /// Load proceeds; the finding is logged.
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    pub check: String,
    pub message: String,
}

impl Finding {
    fn error(check: &str, message: String) -> Self {
        Finding {
            severity: Severity::Error,
            check: check.to_string(),
            message,
        }
    }

    fn warning(check: &str, message: String) -> Self {
        Finding {
            severity: Severity::Warning,
            check: check.to_string(),
            message,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub passed: bool,
    pub findings: Vec<Finding>,
}

impl ValidationOutcome {
    pub fn errors(&self) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Warning)
    }

    /// Human-readable report, mirrored into the run log on failure.
    pub fn report(&self) -> String {
        let mut lines = Vec::new();
        lines.push("DATA VALIDATION REPORT".to_string());

        let errors: Vec<&Finding> = self.errors().collect();
        if !errors.is_empty() {
            lines.push(format!("  ERRORS ({}):", errors.len()));
            for f in errors {
                lines.push(format!("    ✗ [{}] {}", f.check, f.message));
            }
        }

        let warnings: Vec<&Finding> = self.warnings().collect();
        if !warnings.is_empty() {
            lines.push(format!("  WARNINGS ({}):", warnings.len()));
            for f in warnings {
                lines.push(format!("    ⚠ [{}] {}", f.check, f.message));
            }
        }

        if self.findings.is_empty() {
            lines.push("  ✓ All checks passed - no issues found".to_string());
        }

        lines.push(format!(
            "  Result: {}",
            if self.passed { "PASSED" } else { "FAILED" }
        ));
        lines.join("\n")
    }
}

// ============================================================================
// VALIDATOR
// ============================================================================

#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// WARNING when the absent overall_status fraction exceeds this.
    pub max_missing_status_ratio: f64,
    /// Expected row-count band for a CSV bulk batch.
    pub csv_row_band: RangeInclusive<usize>,
    /// Expected row-count band for an API batch.
    pub api_row_band: RangeInclusive<usize>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        ValidatorConfig {
            max_missing_status_ratio: 0.5,
            csv_row_band: 1_000..=10_000_000,
            api_row_band: 1..=100_000,
        }
    }
}

pub struct Validator {
    config: ValidatorConfig,
}

impl Validator {
    pub fn new() -> Self {
        Validator {
            config: ValidatorConfig::default(),
        }
    }

    pub fn with_config(config: ValidatorConfig) -> Self {
        Validator { config }
    }

    /// Run every check over the cleaned batch. Checks are independent of
    /// each other; order does not affect the outcome.
    pub fn validate(&self, batch: &CleanedBatch) -> ValidationOutcome {
        let mut findings = Vec::new();

        self.check_required_fields(batch, &mut findings);
        self.check_bridge_references(batch, &mut findings);
        self.check_row_count_band(batch, &mut findings);
        self.check_missing_status(batch, &mut findings);
        self.check_duplicate_nct_ids(batch, &mut findings);
        self.check_vocabularies(batch, &mut findings);
        self.check_bridge_presence(batch, &mut findings);

        let passed = !findings.iter().any(|f| f.severity == Severity::Error);
        let outcome = ValidationOutcome { passed, findings };

        if outcome.passed {
            info!(
                "Validation PASSED ({} warnings)",
                outcome.warnings().count()
            );
        } else {
            error!(
                "Validation FAILED: {} errors, {} warnings",
                outcome.errors().count(),
                outcome.warnings().count()
            );
        }
        outcome
    }

    // ------------------------------------------------------------------
    // ERROR checks
    // ------------------------------------------------------------------

    fn check_required_fields(&self, batch: &CleanedBatch, findings: &mut Vec<Finding>) {
        let missing_title = batch
            .studies
            .iter()
            .filter(|s| s.brief_title.is_none())
            .count();
        if missing_title > 0 {
            findings.push(Finding::error(
                "brief_title_not_null",
                format!("{} study rows have no brief_title", missing_title),
            ));
        }

        // The cleaner defaults study_type to UNKNOWN; an empty value here
        // means the cleaning contract was broken upstream.
        let missing_type = batch
            .studies
            .iter()
            .filter(|s| s.study_type.is_empty())
            .count();
        if missing_type > 0 {
            findings.push(Finding::error(
                "study_type_not_null",
                format!("{} study rows have an empty study_type", missing_type),
            ));
        }
    }

    fn check_bridge_references(&self, batch: &CleanedBatch, findings: &mut Vec<Finding>) {
        let known: HashSet<usize> = batch.studies.iter().map(|s| s.row_index).collect();

        let bridges: [(&str, &Vec<BridgeRow>); 4] = [
            ("conditions", &batch.conditions),
            ("interventions", &batch.interventions),
            ("age_groups", &batch.age_groups),
            ("mesh_terms", &batch.mesh_terms),
        ];
        for (name, rows) in bridges {
            let orphans = rows
                .iter()
                .filter(|b| !known.contains(&b.row_index))
                .count();
            if orphans > 0 {
                findings.push(Finding::error(
                    "bridge_references",
                    format!(
                        "{} {} rows reference a study not present in the batch",
                        orphans, name
                    ),
                ));
            }
        }

        let orphan_locations = batch
            .locations
            .iter()
            .filter(|l| !known.contains(&l.row_index))
            .count();
        if orphan_locations > 0 {
            findings.push(Finding::error(
                "bridge_references",
                format!(
                    "{} location rows reference a study not present in the batch",
                    orphan_locations
                ),
            ));
        }
    }

    // ------------------------------------------------------------------
    // WARNING checks
    // ------------------------------------------------------------------

    fn check_row_count_band(&self, batch: &CleanedBatch, findings: &mut Vec<Finding>) {
        let band = match predominant_source(batch) {
            SourceType::Csv => &self.config.csv_row_band,
            SourceType::Api => &self.config.api_row_band,
        };
        if !band.contains(&batch.len()) {
            findings.push(Finding::warning(
                "row_count_band",
                format!(
                    "batch has {} rows, outside the expected {}..={} band",
                    batch.len(),
                    band.start(),
                    band.end()
                ),
            ));
        }
    }

    fn check_missing_status(&self, batch: &CleanedBatch, findings: &mut Vec<Finding>) {
        if batch.is_empty() {
            return;
        }
        let missing = batch
            .studies
            .iter()
            .filter(|s| s.overall_status.is_none())
            .count();
        let ratio = missing as f64 / batch.len() as f64;
        if ratio > self.config.max_missing_status_ratio {
            findings.push(Finding::warning(
                "missing_status_ratio",
                format!(
                    "{:.1}% of rows have no overall_status (ceiling {:.1}%)",
                    ratio * 100.0,
                    self.config.max_missing_status_ratio * 100.0
                ),
            ));
        }
    }

    fn check_duplicate_nct_ids(&self, batch: &CleanedBatch, findings: &mut Vec<Finding>) {
        let mut seen: HashMap<&str, usize> = HashMap::new();
        for study in &batch.studies {
            if let Some(nct) = study.nct_id.as_deref() {
                *seen.entry(nct).or_insert(0) += 1;
            }
        }
        let duplicates: Vec<&str> = seen
            .iter()
            .filter(|(_, count)| **count > 1)
            .map(|(nct, _)| *nct)
            .collect();
        if !duplicates.is_empty() {
            // Not deduplicated here - the loader's upsert resolves these
            findings.push(Finding::warning(
                "duplicate_nct_id",
                format!(
                    "{} external identifier(s) appear on multiple rows",
                    duplicates.len()
                ),
            ));
        }
    }

    fn check_vocabularies(&self, batch: &CleanedBatch, findings: &mut Vec<Finding>) {
        self.check_vocab(
            findings,
            "study_type",
            VALID_STUDY_TYPES,
            batch
                .studies
                .iter()
                .map(|s| Some(s.study_type.as_str()))
                // UNKNOWN is the cleaner's own default, not a source value
                .filter(|v| *v != Some("UNKNOWN")),
        );
        self.check_vocab(
            findings,
            "overall_status",
            VALID_STATUSES,
            batch.studies.iter().map(|s| s.overall_status.as_deref()),
        );
        self.check_vocab(
            findings,
            "responsible_party",
            VALID_RESPONSIBLE_PARTIES,
            batch
                .studies
                .iter()
                .map(|s| s.responsible_party.as_deref()),
        );
        self.check_vocab(
            findings,
            "org_class",
            VALID_ORG_CLASSES,
            batch.studies.iter().map(|s| s.org_class.as_deref()),
        );
        self.check_vocab(
            findings,
            "age_group",
            VALID_AGE_GROUPS,
            batch.age_groups.iter().map(|b| Some(b.value.as_str())),
        );
    }

    /// Non-null values outside the expected vocabulary are a warning; null
    /// is legitimate missing data.
    fn check_vocab<'a>(
        &self,
        findings: &mut Vec<Finding>,
        column: &str,
        valid: &[&str],
        values: impl Iterator<Item = Option<&'a str>>,
    ) {
        let mut invalid = 0usize;
        let mut examples: Vec<String> = Vec::new();
        for value in values.flatten() {
            if !valid.contains(&value) {
                invalid += 1;
                if examples.len() < 10 && !examples.iter().any(|e| e == value) {
                    examples.push(value.to_string());
                }
            }
        }
        if invalid > 0 {
            findings.push(Finding::warning(
                "vocabulary",
                format!(
                    "column '{}' has {} unexpected value(s). Examples: {:?}",
                    column, invalid, examples
                ),
            ));
        }
    }

    fn check_bridge_presence(&self, batch: &CleanedBatch, findings: &mut Vec<Finding>) {
        if batch.is_empty() {
            return;
        }
        for (name, empty) in [
            ("conditions", batch.conditions.is_empty()),
            ("interventions", batch.interventions.is_empty()),
            ("age_groups", batch.age_groups.is_empty()),
        ] {
            if empty {
                findings.push(Finding::warning(
                    "bridge_presence",
                    format!("bridge table '{}' is empty for this batch", name),
                ));
            }
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

/// The source most rows carry; decides which row-count band applies.
fn predominant_source(batch: &CleanedBatch) -> SourceType {
    let api = batch
        .studies
        .iter()
        .filter(|s| s.data_source == SourceType::Api)
        .count();
    if api * 2 > batch.len() {
        SourceType::Api
    } else {
        SourceType::Csv
    }
}

// ============================================================================
// TESTS
// ============================================================================
