// Row shapes shared across the pipeline.
//
// CanonicalRecord is what every ingestion adapter emits: one row per trial,
// same field set and null conventions regardless of source, so the cleaner
// never needs to know where a batch came from. CleanedBatch is what comes
// out of the cleaner: single-valued study rows plus exploded bridge rows
// keyed by the study's position in the batch.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ============================================================================
// SOURCE TYPE
// ============================================================================

/// Which ingestion path produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SourceType {
    #[default]
    Csv,
    Api,
}

impl SourceType {
    /// Human-readable name for logging.
    pub fn name(&self) -> &str {
        match self {
            SourceType::Csv => "CSV bulk extract",
            SourceType::Api => "ClinicalTrials.gov API",
        }
    }

    /// Tag stored in the studies.data_source column.
    pub fn code(&self) -> &str {
        match self {
            SourceType::Csv => "csv",
            SourceType::Api => "api",
        }
    }
}

// ============================================================================
// CANONICAL RECORD (post-ingestion, pre-cleaning)
// ============================================================================

/// One nested location from the API, pre-cleaning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub facility: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub zip_code: Option<String>,
}

/// Source-agnostic raw row. Serde renames match the bulk CSV headers so the
/// csv reader deserializes straight into this shape; the API adapter builds
/// it by hand from flattened JSON.
///
/// `None` means the cell was truly empty. Sentinel strings ("Unknown",
/// "N/A", ...) are still present at this stage - nullifying them is the
/// cleaner's first rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CanonicalRecord {
    #[serde(rename = "Organization Full Name")]
    pub org_name: Option<String>,

    #[serde(rename = "Organization Class")]
    pub org_class: Option<String>,

    #[serde(rename = "Responsible Party")]
    pub responsible_party: Option<String>,

    #[serde(rename = "Brief Title")]
    pub brief_title: Option<String>,

    #[serde(rename = "Full Title")]
    pub full_title: Option<String>,

    #[serde(rename = "Overall Status")]
    pub overall_status: Option<String>,

    #[serde(rename = "Start Date")]
    pub start_date: Option<String>,

    #[serde(rename = "Standard Age")]
    pub age_groups: Option<String>,

    #[serde(rename = "Conditions")]
    pub conditions: Option<String>,

    #[serde(rename = "Primary Purpose")]
    pub primary_purpose: Option<String>,

    #[serde(rename = "Interventions")]
    pub interventions: Option<String>,

    #[serde(rename = "Intervention Description")]
    pub intervention_description: Option<String>,

    #[serde(rename = "Study Type")]
    pub study_type: Option<String>,

    #[serde(rename = "Phases")]
    pub phases: Option<String>,

    #[serde(rename = "Outcome Measure")]
    pub outcome_measure: Option<String>,

    #[serde(rename = "Medical Subject Headings")]
    pub mesh_terms: Option<String>,

    // ------------------------------------------------------------------
    // API-only fields; absent on the CSV path
    // ------------------------------------------------------------------
    #[serde(default)]
    pub nct_id: Option<String>,

    #[serde(default)]
    pub enrollment: Option<i64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<LocationRecord>,

    #[serde(default)]
    pub data_source: SourceType,
}

impl CanonicalRecord {
    pub fn new(data_source: SourceType) -> Self {
        CanonicalRecord {
            data_source,
            ..Default::default()
        }
    }
}

// ============================================================================
// CLEANED BATCH
// ============================================================================

/// One cleaned study row. `row_index` is the record's position in the input
/// batch and is what bridge rows reference until the loader assigns real
/// study_ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyRecord {
    pub row_index: usize,

    pub org_name: Option<String>,
    pub org_class: Option<String>,
    pub responsible_party: Option<String>,
    pub brief_title: Option<String>,
    pub full_title: Option<String>,
    pub overall_status: Option<String>,

    /// Parsed start date, absent when unparseable or out of range.
    pub start_date: Option<NaiveDate>,
    /// The source's date string, preserved verbatim for audit.
    pub start_date_raw: Option<String>,
    /// True when the day-of-month was defaulted (YYYY-MM input).
    pub start_date_is_approx: bool,

    pub primary_purpose: Option<String>,
    /// Never empty: defaulted to "UNKNOWN" when the source had nothing.
    pub study_type: String,
    pub phase: Option<String>,
    pub outcome_measure: Option<String>,
    pub intervention_description: Option<String>,

    pub nct_id: Option<String>,
    pub enrollment: Option<i64>,
    pub data_source: SourceType,
}

/// One exploded multi-value atom tied back to its study.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeRow {
    pub row_index: usize,
    pub value: String,
}

/// One trial site, API path only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationRow {
    pub row_index: usize,
    pub facility: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub zip_code: Option<String>,
}

/// Output of the cleaning engine, input to the validator and loader.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleanedBatch {
    pub studies: Vec<StudyRecord>,
    pub conditions: Vec<BridgeRow>,
    pub interventions: Vec<BridgeRow>,
    pub age_groups: Vec<BridgeRow>,
    pub mesh_terms: Vec<BridgeRow>,
    pub locations: Vec<LocationRow>,
}

impl CleanedBatch {
    pub fn len(&self) -> usize {
        self.studies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.studies.is_empty()
    }

    /// Bridge rows for one study, by batch position.
    pub fn conditions_for(&self, row_index: usize) -> Vec<&str> {
        self.conditions
            .iter()
            .filter(|b| b.row_index == row_index)
            .map(|b| b.value.as_str())
            .collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_header_names_deserialize() {
        let data = "\
Organization Full Name,Organization Class,Responsible Party,Brief Title,Full Title,Overall Status,Start Date,Standard Age,Conditions,Primary Purpose,Interventions,Intervention Description,Study Type,Phases,Outcome Measure,Medical Subject Headings
Harvard,OTHER,SPONSOR,Study A,Full A,COMPLETED,2020-01-15,ADULT OLDER_ADULT,\"Diabetes, Obesity\",TREATMENT,\"Drug A, Drug B\",Desc A,INTERVENTIONAL,PHASE2,Survival,\"Diabetes Mellitus, Obesity\"
";
        let mut rdr = csv::Reader::from_reader(data.as_bytes());
        let rec: CanonicalRecord = rdr.deserialize().next().unwrap().unwrap();

        assert_eq!(rec.org_name.as_deref(), Some("Harvard"));
        assert_eq!(rec.start_date.as_deref(), Some("2020-01-15"));
        assert_eq!(rec.conditions.as_deref(), Some("Diabetes, Obesity"));
        assert_eq!(rec.data_source, SourceType::Csv);
        assert!(rec.nct_id.is_none());
        assert!(rec.locations.is_empty());
    }

    #[test]
    fn test_empty_csv_cell_is_none() {
        let data = "\
Organization Full Name,Organization Class,Responsible Party,Brief Title,Full Title,Overall Status,Start Date,Standard Age,Conditions,Primary Purpose,Interventions,Intervention Description,Study Type,Phases,Outcome Measure,Medical Subject Headings
Harvard,,SPONSOR,Study A,,COMPLETED,,ADULT,,,,,INTERVENTIONAL,,,
";
        let mut rdr = csv::Reader::from_reader(data.as_bytes());
        let rec: CanonicalRecord = rdr.deserialize().next().unwrap().unwrap();

        assert!(rec.org_class.is_none());
        assert!(rec.full_title.is_none());
        assert!(rec.start_date.is_none());
        assert!(rec.phases.is_none());
    }

    #[test]
    fn test_source_type_codes() {
        assert_eq!(SourceType::Csv.code(), "csv");
        assert_eq!(SourceType::Api.code(), "api");
    }

    #[test]
    fn test_conditions_for_filters_by_row() {
        let batch = CleanedBatch {
            conditions: vec![
                BridgeRow { row_index: 0, value: "Cancer".into() },
                BridgeRow { row_index: 1, value: "Stroke".into() },
                BridgeRow { row_index: 0, value: "Diabetes".into() },
            ],
            ..Default::default()
        };
        assert_eq!(batch.conditions_for(0), vec!["Cancer", "Diabetes"]);
        assert_eq!(batch.conditions_for(1), vec!["Stroke"]);
    }
}
