// Pipeline configuration: sentinel values, date bounds, vocabularies,
// API client settings, run-id generation.

use chrono::{Datelike, Utc};

// ============================================================================
// DATA CLEANING RULES
// ============================================================================

/// Sentinel strings that mean "no value" in the source data.
/// Matched case-insensitively against the trimmed field value.
pub const SENTINEL_NULL_VALUES: &[&str] = &[
    "unknown",
    "none",
    "null",
    "n/a",
    "na",
    "not applicable",
    "not available",
    "missing",
    "no phases listed",
    "-",
    "--",
    "---",
    ".",
    "..",
];

/// Check whether a raw field value is a sentinel null.
pub fn is_sentinel_null(value: &str) -> bool {
    let trimmed = value.trim();
    SENTINEL_NULL_VALUES
        .iter()
        .any(|s| trimmed.eq_ignore_ascii_case(s))
}

/// Start dates before this year are treated as data-entry errors.
pub const DATE_MIN_YEAR: i32 = 1950;

/// Upper bound for plausible start dates: the year cleaning runs in.
pub fn date_max_year() -> i32 {
    Utc::now().year()
}

// ============================================================================
// ENUM VOCABULARIES (used by the validator, warnings only)
// ============================================================================

pub const VALID_ORG_CLASSES: &[&str] = &[
    "OTHER", "INDUSTRY", "NIH", "OTHER_GOV", "FED", "NETWORK", "INDIV",
];

pub const VALID_STUDY_TYPES: &[&str] = &["INTERVENTIONAL", "OBSERVATIONAL", "EXPANDED_ACCESS"];

pub const VALID_STATUSES: &[&str] = &[
    "COMPLETED",
    "RECRUITING",
    "TERMINATED",
    "NOT_YET_RECRUITING",
    "ACTIVE_NOT_RECRUITING",
    "WITHDRAWN",
    "ENROLLING_BY_INVITATION",
    "SUSPENDED",
    "WITHHELD",
    "NO_LONGER_AVAILABLE",
    "AVAILABLE",
    "APPROVED_FOR_MARKETING",
    "TEMPORARILY_NOT_AVAILABLE",
];

pub const VALID_RESPONSIBLE_PARTIES: &[&str] =
    &["SPONSOR", "PRINCIPAL_INVESTIGATOR", "SPONSOR_INVESTIGATOR"];

pub const VALID_AGE_GROUPS: &[&str] = &["CHILD", "ADULT", "OLDER_ADULT"];

// ============================================================================
// API CLIENT SETTINGS
// ============================================================================

pub const API_BASE_URL: &str = "https://clinicaltrials.gov/api/v2/studies";

/// Studies per API request (server max is 1000).
pub const API_PAGE_SIZE: usize = 100;

/// Delay between page requests, keeps us under ~50 requests/minute.
pub const API_RATE_LIMIT_MILLIS: u64 = 1200;

/// Per-page request timeout.
pub const API_TIMEOUT_SECS: u64 = 30;

/// Attempts per page before the whole ingestion fails.
pub const API_MAX_RETRIES: u32 = 3;

/// Default cap on studies fetched in one run.
pub const API_DEFAULT_MAX_STUDIES: usize = 500;

// ============================================================================
// RUN IDENTITY
// ============================================================================

/// Unique id for one pipeline run, e.g. "3f9a2b1c-20260830-142501".
pub fn generate_run_id() -> String {
    let uuid = uuid::Uuid::new_v4().to_string();
    format!(
        "{}-{}",
        &uuid[..8],
        Utc::now().format("%Y%m%d-%H%M%S")
    )
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_matching_is_case_insensitive() {
        assert!(is_sentinel_null("Unknown"));
        assert!(is_sentinel_null("UNKNOWN"));
        assert!(is_sentinel_null("unknown"));
        assert!(is_sentinel_null("No phases listed"));
        assert!(is_sentinel_null("N/A"));
    }

    #[test]
    fn test_sentinel_matching_trims_whitespace() {
        assert!(is_sentinel_null("  Unknown  "));
        assert!(is_sentinel_null(" - "));
    }

    #[test]
    fn test_real_values_are_not_sentinels() {
        assert!(!is_sentinel_null("Harvard"));
        assert!(!is_sentinel_null("COMPLETED"));
        assert!(!is_sentinel_null("Unknown disease progression"));
    }

    #[test]
    fn test_run_id_format() {
        let id = generate_run_id();
        // 8 hex chars, date, time, separated by dashes
        assert_eq!(id.len(), 8 + 1 + 8 + 1 + 6);
        assert!(id.chars().filter(|c| *c == '-').count() >= 2);
    }

    #[test]
    fn test_date_bounds() {
        assert_eq!(DATE_MIN_YEAR, 1950);
        assert!(date_max_year() >= 2026);
    }
}
