// Cleaning Engine.
//
// Deterministic transformation rules that turn heterogeneous canonical rows
// into a cleaned batch fit for the warehouse schema. Rules run in a fixed
// order per row - later rules assume earlier ones already normalized
// sentinels. Every rule is total: a malformed field degrades to absence,
// never to a per-row error.
//
// Rule order:
//   1. Sentinel nullification ("Unknown", "N/A", "No phases listed", ... → None)
//   2. Whitespace trim on every surviving string field
//   3. Date parsing (YYYY-MM-DD as-is; YYYY-MM gets day 01 + approx flag;
//      out-of-range or unparseable → absent, raw preserved)
//   4. Multi-value explosion (conditions/interventions/MeSH on comma, age
//      groups on whitespace) with within-record dedup, plus batch-wide
//      intervention casing canonicalization
//   5. Required-field defaulting (study_type → "UNKNOWN")
//
// Column pruning (spec'd rule 6) is structural: the typed CanonicalRecord
// is the canonical schema, stray source columns never reach this module.

use std::collections::BTreeMap;
use std::collections::HashMap;

use chrono::NaiveDate;
use log::info;
use serde::{Deserialize, Serialize};

use crate::config::{date_max_year, is_sentinel_null, DATE_MIN_YEAR};
use crate::record::{BridgeRow, CanonicalRecord, CleanedBatch, LocationRow, StudyRecord};

// ============================================================================
// RULE IDENTIFIERS
// ============================================================================

pub const RULE_NULLIFY_SENTINELS: &str = "nullify_sentinels";
pub const RULE_TRIM_WHITESPACE: &str = "trim_whitespace";
pub const RULE_DATE_APPROXIMATED: &str = "date_approximated";
pub const RULE_DATE_OUT_OF_RANGE: &str = "date_out_of_range";
pub const RULE_DATE_UNPARSEABLE: &str = "date_unparseable";
pub const RULE_EXPLODE_CONDITIONS: &str = "explode_conditions";
pub const RULE_EXPLODE_INTERVENTIONS: &str = "explode_interventions";
pub const RULE_EXPLODE_AGE_GROUPS: &str = "explode_age_groups";
pub const RULE_EXPLODE_MESH_TERMS: &str = "explode_mesh_terms";
pub const RULE_CANONICALIZE_INTERVENTIONS: &str = "canonicalize_interventions";
pub const RULE_DEFAULT_STUDY_TYPE: &str = "default_study_type";

/// Every rule that alters rows. Informational counters (rows_input,
/// rows_output, dates_parsed) are tracked separately and never count as
/// alterations.
pub const ALL_RULES: &[&str] = &[
    RULE_NULLIFY_SENTINELS,
    RULE_TRIM_WHITESPACE,
    RULE_DATE_APPROXIMATED,
    RULE_DATE_OUT_OF_RANGE,
    RULE_DATE_UNPARSEABLE,
    RULE_EXPLODE_CONDITIONS,
    RULE_EXPLODE_INTERVENTIONS,
    RULE_EXPLODE_AGE_GROUPS,
    RULE_EXPLODE_MESH_TERMS,
    RULE_CANONICALIZE_INTERVENTIONS,
    RULE_DEFAULT_STUDY_TYPE,
];

pub const INFO_ROWS_INPUT: &str = "rows_input";
pub const INFO_ROWS_OUTPUT: &str = "rows_output";
pub const INFO_DATES_PARSED: &str = "dates_parsed";

// ============================================================================
// CLEANING STATISTICS
// ============================================================================

/// Per-rule counts of rows affected, accumulated over one cleaning run.
/// Returned by value with the batch - never shared, never global - so
/// repeated or concurrent runs cannot cross-contaminate counts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleaningStats {
    counts: BTreeMap<String, u64>,
}

impl CleaningStats {
    pub fn inc(&mut self, rule: &str) {
        self.add(rule, 1);
    }

    pub fn add(&mut self, rule: &str, n: u64) {
        *self.counts.entry(rule.to_string()).or_insert(0) += n;
    }

    pub fn count(&self, rule: &str) -> u64 {
        self.counts.get(rule).copied().unwrap_or(0)
    }

    /// Total rows altered across all cleaning rules. Zero means the batch
    /// was already clean.
    pub fn rows_altered(&self) -> u64 {
        ALL_RULES.iter().map(|r| self.count(r)).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.counts.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn summary(&self) -> String {
        let mut lines = vec!["CLEANING SUMMARY".to_string()];
        for (rule, count) in self.iter() {
            lines.push(format!("  {:<28} {:>10}", rule, count));
        }
        lines.join("\n")
    }
}

// ============================================================================
// CLEANING ENGINE
// ============================================================================

pub struct CleaningEngine;

impl CleaningEngine {
    pub fn new() -> Self {
        CleaningEngine
    }

    /// Run all cleaning rules over a canonical batch. Total over its input:
    /// never fails, never drops a row.
    pub fn clean(&self, batch: Vec<CanonicalRecord>) -> (CleanedBatch, CleaningStats) {
        let mut stats = CleaningStats::default();
        stats.add(INFO_ROWS_INPUT, batch.len() as u64);
        info!("Cleaning {} canonical rows", batch.len());

        // ------------------------------------------------------------------
        // Phase 1: per-row rules + intervention casing frequency table.
        // Rows cannot be finalized yet because canonicalization needs the
        // whole batch observed first.
        // ------------------------------------------------------------------
        let mut rows: Vec<WorkingRow> = Vec::with_capacity(batch.len());
        let mut casing = CasingTable::default();

        for (row_index, mut record) in batch.into_iter().enumerate() {
            apply_nullify_and_trim(&mut record, &mut stats);

            let date = parse_start_date(record.start_date.as_deref(), &mut stats);

            let (conditions, altered) = explode(record.conditions.as_deref(), Delimiter::Comma);
            if altered {
                stats.inc(RULE_EXPLODE_CONDITIONS);
            }
            let (interventions, altered) =
                explode(record.interventions.as_deref(), Delimiter::Comma);
            if altered {
                stats.inc(RULE_EXPLODE_INTERVENTIONS);
            }
            let (age_groups, altered) =
                explode(record.age_groups.as_deref(), Delimiter::Whitespace);
            if altered {
                stats.inc(RULE_EXPLODE_AGE_GROUPS);
            }
            let (mesh_terms, altered) = explode(record.mesh_terms.as_deref(), Delimiter::Comma);
            if altered {
                stats.inc(RULE_EXPLODE_MESH_TERMS);
            }

            for name in &interventions {
                casing.observe(name);
            }

            let study_type = match record.study_type.take() {
                Some(t) => t,
                None => {
                    stats.inc(RULE_DEFAULT_STUDY_TYPE);
                    "UNKNOWN".to_string()
                }
            };

            rows.push(WorkingRow {
                row_index,
                record,
                date,
                study_type,
                conditions,
                interventions,
                age_groups,
                mesh_terms,
            });
        }

        // ------------------------------------------------------------------
        // Phase 2: rewrite intervention names to their canonical casing,
        // then re-deduplicate within each record (folded duplicates like
        // "Placebo"/"placebo" collapse here).
        // ------------------------------------------------------------------
        for row in &mut rows {
            let rewritten = casing.canonicalize(&row.interventions);
            if rewritten != row.interventions {
                stats.inc(RULE_CANONICALIZE_INTERVENTIONS);
                row.interventions = rewritten;
            }
        }

        // ------------------------------------------------------------------
        // Assemble the cleaned batch
        // ------------------------------------------------------------------
        let mut cleaned = CleanedBatch::default();
        for row in rows {
            let idx = row.row_index;
            push_bridge(&mut cleaned.conditions, idx, row.conditions);
            push_bridge(&mut cleaned.interventions, idx, row.interventions);
            push_bridge(&mut cleaned.age_groups, idx, row.age_groups);
            push_bridge(&mut cleaned.mesh_terms, idx, row.mesh_terms);

            for loc in &row.record.locations {
                cleaned.locations.push(LocationRow {
                    row_index: idx,
                    facility: loc.facility.clone(),
                    city: loc.city.clone(),
                    state: loc.state.clone(),
                    country: loc.country.clone(),
                    zip_code: loc.zip_code.clone(),
                });
            }

            let r = row.record;
            cleaned.studies.push(StudyRecord {
                row_index: idx,
                org_name: r.org_name,
                org_class: r.org_class,
                responsible_party: r.responsible_party,
                brief_title: r.brief_title,
                full_title: r.full_title,
                overall_status: r.overall_status,
                start_date: row.date.parsed,
                start_date_raw: row.date.raw,
                start_date_is_approx: row.date.approximate,
                primary_purpose: r.primary_purpose,
                study_type: row.study_type,
                phase: r.phases,
                outcome_measure: r.outcome_measure,
                intervention_description: r.intervention_description,
                nct_id: r.nct_id,
                enrollment: r.enrollment,
                data_source: r.data_source,
            });
        }

        stats.add(INFO_ROWS_OUTPUT, cleaned.studies.len() as u64);
        info!("{}", stats.summary());

        (cleaned, stats)
    }
}

impl Default for CleaningEngine {
    fn default() -> Self {
        Self::new()
    }
}

struct WorkingRow {
    row_index: usize,
    record: CanonicalRecord,
    date: ParsedDate,
    study_type: String,
    conditions: Vec<String>,
    interventions: Vec<String>,
    age_groups: Vec<String>,
    mesh_terms: Vec<String>,
}

fn push_bridge(target: &mut Vec<BridgeRow>, row_index: usize, values: Vec<String>) {
    for value in values {
        target.push(BridgeRow { row_index, value });
    }
}

// ============================================================================
// RULES 1 + 2: SENTINEL NULLIFICATION AND TRIM
// ============================================================================

/// Apply sentinel nullification then whitespace trim to every string field
/// of one record, including nested location strings. A field emptied by
/// trimming becomes absent too.
fn apply_nullify_and_trim(record: &mut CanonicalRecord, stats: &mut CleaningStats) {
    let mut sentinel_hit = false;
    let mut trim_hit = false;

    {
        let fields: [&mut Option<String>; 17] = [
            &mut record.org_name,
            &mut record.org_class,
            &mut record.responsible_party,
            &mut record.brief_title,
            &mut record.full_title,
            &mut record.overall_status,
            &mut record.start_date,
            &mut record.age_groups,
            &mut record.conditions,
            &mut record.primary_purpose,
            &mut record.interventions,
            &mut record.intervention_description,
            &mut record.study_type,
            &mut record.phases,
            &mut record.outcome_measure,
            &mut record.mesh_terms,
            &mut record.nct_id,
        ];
        for field in fields {
            clean_string_field(field, &mut sentinel_hit, &mut trim_hit);
        }
    }

    for loc in &mut record.locations {
        for field in [
            &mut loc.facility,
            &mut loc.city,
            &mut loc.state,
            &mut loc.country,
            &mut loc.zip_code,
        ] {
            clean_string_field(field, &mut sentinel_hit, &mut trim_hit);
        }
    }

    if sentinel_hit {
        stats.inc(RULE_NULLIFY_SENTINELS);
    }
    if trim_hit {
        stats.inc(RULE_TRIM_WHITESPACE);
    }
}

fn clean_string_field(field: &mut Option<String>, sentinel_hit: &mut bool, trim_hit: &mut bool) {
    let Some(value) = field.as_ref() else {
        return;
    };

    if is_sentinel_null(value) {
        *field = None;
        *sentinel_hit = true;
        return;
    }

    let trimmed = value.trim();
    if trimmed.is_empty() {
        *field = None;
        *trim_hit = true;
    } else if trimmed.len() != value.len() {
        *field = Some(trimmed.to_string());
        *trim_hit = true;
    }
}

// ============================================================================
// RULE 3: DATE PARSING
// ============================================================================

struct ParsedDate {
    parsed: Option<NaiveDate>,
    raw: Option<String>,
    approximate: bool,
}

/// Parse a start date that has already been through sentinel nullification
/// and trimming. The raw string is preserved verbatim whether or not
/// parsing succeeds; a sentinel date reaches this rule as None, so its raw
/// copy is absent too.
fn parse_start_date(value: Option<&str>, stats: &mut CleaningStats) -> ParsedDate {
    let Some(s) = value else {
        return ParsedDate {
            parsed: None,
            raw: None,
            approximate: false,
        };
    };

    let raw = Some(s.to_string());
    let (candidate, approximate) = if is_year_month(s) {
        (format!("{}-01", s), true)
    } else {
        (s.to_string(), false)
    };

    let parsed = match NaiveDate::parse_from_str(&candidate, "%Y-%m-%d") {
        Ok(date) => date,
        Err(_) => {
            stats.inc(RULE_DATE_UNPARSEABLE);
            return ParsedDate {
                parsed: None,
                raw,
                approximate: false,
            };
        }
    };

    use chrono::Datelike;
    if parsed.year() < DATE_MIN_YEAR || parsed.year() > date_max_year() {
        stats.inc(RULE_DATE_OUT_OF_RANGE);
        return ParsedDate {
            parsed: None,
            raw,
            approximate: false,
        };
    }

    if approximate {
        stats.inc(RULE_DATE_APPROXIMATED);
    }
    stats.inc(INFO_DATES_PARSED);
    ParsedDate {
        parsed: Some(parsed),
        raw,
        approximate,
    }
}

/// "2004-10" style: exactly YYYY-MM, no day.
fn is_year_month(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() == 7
        && b[..4].iter().all(u8::is_ascii_digit)
        && b[4] == b'-'
        && b[5..].iter().all(u8::is_ascii_digit)
}

// ============================================================================
// RULE 4: MULTI-VALUE EXPLOSION
// ============================================================================

#[derive(Clone, Copy)]
enum Delimiter {
    Comma,
    Whitespace,
}

/// Split a packed multi-value field into atoms: trimmed, empties dropped,
/// within-record duplicates removed (case-sensitive - "Cancer" and "cancer"
/// are legitimately distinct condition terms). The altered flag reports
/// whether the atom set differs from the naive split, which is what the
/// rule counter counts.
fn explode(packed: Option<&str>, delimiter: Delimiter) -> (Vec<String>, bool) {
    let Some(s) = packed else {
        return (Vec::new(), false);
    };

    let naive: Vec<&str> = match delimiter {
        Delimiter::Comma => s.split(',').collect(),
        Delimiter::Whitespace => s.split_whitespace().collect(),
    };

    let mut atoms: Vec<String> = Vec::with_capacity(naive.len());
    for part in &naive {
        let trimmed = part.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !atoms.iter().any(|a| a == trimmed) {
            atoms.push(trimmed.to_string());
        }
    }

    let altered =
        atoms.len() != naive.len() || atoms.iter().zip(naive.iter()).any(|(a, n)| a != n);
    (atoms, altered)
}

// ============================================================================
// INTERVENTION CASING CANONICALIZATION (two-phase, whole batch)
// ============================================================================

/// Frequency table over intervention-name casings, keyed by case-folded
/// name. Built over the whole batch before any row is rewritten, so the
/// per-row pass stays parallel-safe.
#[derive(Default)]
struct CasingTable {
    // folded key → casings in first-seen order with occurrence counts
    observed: HashMap<String, Vec<(String, u64)>>,
}

impl CasingTable {
    fn observe(&mut self, name: &str) {
        let key = name.to_lowercase();
        let casings = self.observed.entry(key).or_default();
        match casings.iter_mut().find(|(c, _)| c == name) {
            Some((_, count)) => *count += 1,
            None => casings.push((name.to_string(), 1)),
        }
    }

    /// Most frequent casing for a folded key; first-seen order breaks ties.
    fn canonical(&self, name: &str) -> String {
        let key = name.to_lowercase();
        match self.observed.get(&key) {
            Some(casings) => {
                let mut best: &(String, u64) = &casings[0];
                for candidate in &casings[1..] {
                    if candidate.1 > best.1 {
                        best = candidate;
                    }
                }
                best.0.clone()
            }
            None => name.to_string(),
        }
    }

    /// Rewrite a record's intervention list to canonical casings and drop
    /// the duplicates the rewrite exposes.
    fn canonicalize(&self, names: &[String]) -> Vec<String> {
        let mut result: Vec<String> = Vec::with_capacity(names.len());
        for name in names {
            let canonical = self.canonical(name);
            if !result.contains(&canonical) {
                result.push(canonical);
            }
        }
        result
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::SourceType;

    fn record() -> CanonicalRecord {
        CanonicalRecord {
            org_name: Some("Harvard".into()),
            org_class: Some("OTHER".into()),
            responsible_party: Some("SPONSOR".into()),
            brief_title: Some("Study A".into()),
            full_title: Some("Full A".into()),
            overall_status: Some("COMPLETED".into()),
            start_date: Some("2020-03-15".into()),
            age_groups: Some("ADULT OLDER_ADULT".into()),
            conditions: Some("Diabetes, Obesity".into()),
            primary_purpose: Some("TREATMENT".into()),
            interventions: Some("Drug A, Drug B".into()),
            intervention_description: Some("Desc A".into()),
            study_type: Some("INTERVENTIONAL".into()),
            phases: Some("PHASE2".into()),
            outcome_measure: Some("Survival".into()),
            mesh_terms: Some("Diabetes Mellitus, Obesity".into()),
            nct_id: None,
            enrollment: None,
            locations: Vec::new(),
            data_source: SourceType::Csv,
        }
    }

    fn clean_one(r: CanonicalRecord) -> (CleanedBatch, CleaningStats) {
        CleaningEngine::new().clean(vec![r])
    }

    #[test]
    fn test_sentinels_become_absent() {
        let mut r = record();
        r.org_name = Some("Unknown".into());
        r.overall_status = Some("UNKNOWN".into());
        r.phases = Some("No phases listed".into());
        r.primary_purpose = Some("N/A".into());

        let (batch, stats) = clean_one(r);
        let study = &batch.studies[0];
        assert!(study.org_name.is_none());
        assert!(study.overall_status.is_none());
        assert!(study.phase.is_none());
        assert!(study.primary_purpose.is_none());
        assert_eq!(stats.count(RULE_NULLIFY_SENTINELS), 1);
    }

    #[test]
    fn test_real_values_survive_cleaning() {
        let (batch, _) = clean_one(record());
        let study = &batch.studies[0];
        assert_eq!(study.org_name.as_deref(), Some("Harvard"));
        assert_eq!(study.overall_status.as_deref(), Some("COMPLETED"));
        assert_eq!(study.phase.as_deref(), Some("PHASE2"));
    }

    #[test]
    fn test_whitespace_trimmed() {
        let mut r = record();
        r.brief_title = Some("  Study A  ".into());
        let (batch, stats) = clean_one(r);
        assert_eq!(batch.studies[0].brief_title.as_deref(), Some("Study A"));
        assert_eq!(stats.count(RULE_TRIM_WHITESPACE), 1);
    }

    #[test]
    fn test_full_date_parses_exact() {
        let (batch, stats) = clean_one(record());
        let study = &batch.studies[0];
        assert_eq!(
            study.start_date,
            Some(NaiveDate::from_ymd_opt(2020, 3, 15).unwrap())
        );
        assert!(!study.start_date_is_approx);
        assert_eq!(study.start_date_raw.as_deref(), Some("2020-03-15"));
        assert_eq!(stats.count(INFO_DATES_PARSED), 1);
        assert_eq!(stats.count(RULE_DATE_APPROXIMATED), 0);
    }

    #[test]
    fn test_year_month_gets_first_of_month() {
        let mut r = record();
        r.start_date = Some("2020-03".into());
        let (batch, stats) = clean_one(r);
        let study = &batch.studies[0];
        assert_eq!(
            study.start_date,
            Some(NaiveDate::from_ymd_opt(2020, 3, 1).unwrap())
        );
        assert!(study.start_date_is_approx);
        assert_eq!(study.start_date_raw.as_deref(), Some("2020-03"));
        assert_eq!(stats.count(RULE_DATE_APPROXIMATED), 1);
    }

    #[test]
    fn test_out_of_range_date_nulled_raw_preserved() {
        let mut r = record();
        r.start_date = Some("1940-01-01".into());
        let (batch, stats) = clean_one(r);
        let study = &batch.studies[0];
        assert!(study.start_date.is_none());
        assert_eq!(study.start_date_raw.as_deref(), Some("1940-01-01"));
        assert_eq!(stats.count(RULE_DATE_OUT_OF_RANGE), 1);
    }

    #[test]
    fn test_malformed_date_nulled_raw_preserved() {
        let mut r = record();
        r.start_date = Some("sometime in spring".into());
        let (batch, stats) = clean_one(r);
        let study = &batch.studies[0];
        assert!(study.start_date.is_none());
        assert_eq!(study.start_date_raw.as_deref(), Some("sometime in spring"));
        assert_eq!(stats.count(RULE_DATE_UNPARSEABLE), 1);
    }

    #[test]
    fn test_sentinel_date_has_no_raw_copy() {
        // Sentinel nullification runs before date parsing, so "Unknown"
        // leaves both the parsed date and the raw copy absent.
        let mut r = record();
        r.start_date = Some("Unknown".into());
        let (batch, stats) = clean_one(r);
        let study = &batch.studies[0];
        assert!(study.start_date.is_none());
        assert!(study.start_date_raw.is_none());
        assert_eq!(stats.count(RULE_DATE_UNPARSEABLE), 0);
    }

    #[test]
    fn test_condition_dedup_is_case_sensitive() {
        let mut r = record();
        r.conditions = Some("Cancer, cancer, Diabetes".into());
        let (batch, _) = clean_one(r);
        let values: Vec<&str> = batch.conditions.iter().map(|b| b.value.as_str()).collect();
        assert_eq!(values, vec!["Cancer", "cancer", "Diabetes"]);
    }

    #[test]
    fn test_condition_exact_duplicates_removed() {
        let mut r = record();
        r.conditions = Some("Cancer, Cancer, Diabetes".into());
        let (batch, stats) = clean_one(r);
        let values: Vec<&str> = batch.conditions.iter().map(|b| b.value.as_str()).collect();
        assert_eq!(values, vec!["Cancer", "Diabetes"]);
        assert_eq!(stats.count(RULE_EXPLODE_CONDITIONS), 1);
    }

    #[test]
    fn test_empty_atoms_dropped() {
        let mut r = record();
        r.conditions = Some("Cancer,, Diabetes,".into());
        let (batch, _) = clean_one(r);
        assert_eq!(batch.conditions.len(), 2);
    }

    #[test]
    fn test_age_groups_split_on_whitespace() {
        let (batch, _) = clean_one(record());
        let values: Vec<&str> = batch.age_groups.iter().map(|b| b.value.as_str()).collect();
        assert_eq!(values, vec!["ADULT", "OLDER_ADULT"]);
    }

    #[test]
    fn test_intervention_canonicalization_majority_wins() {
        let mut batch: Vec<CanonicalRecord> = Vec::new();
        for _ in 0..9 {
            let mut r = record();
            r.interventions = Some("Placebo".into());
            batch.push(r);
        }
        let mut r = record();
        r.interventions = Some("placebo".into());
        batch.push(r);

        let (cleaned, stats) = CleaningEngine::new().clean(batch);
        assert_eq!(cleaned.interventions.len(), 10);
        assert!(cleaned.interventions.iter().all(|b| b.value == "Placebo"));
        assert_eq!(stats.count(RULE_CANONICALIZE_INTERVENTIONS), 1);
    }

    #[test]
    fn test_intervention_tie_breaks_to_first_seen() {
        let mut a = record();
        a.interventions = Some("DrugX".into());
        let mut b = record();
        b.interventions = Some("drugx".into());

        let (cleaned, _) = CleaningEngine::new().clean(vec![a, b]);
        assert!(cleaned.interventions.iter().all(|b| b.value == "DrugX"));
    }

    #[test]
    fn test_intervention_folded_duplicates_collapse_within_record() {
        let mut r = record();
        r.interventions = Some("Placebo, placebo, Placebo".into());
        let (batch, _) = clean_one(r);
        let values: Vec<&str> = batch
            .interventions
            .iter()
            .map(|b| b.value.as_str())
            .collect();
        assert_eq!(values, vec!["Placebo"]);
    }

    #[test]
    fn test_study_type_defaulted_to_unknown() {
        let mut r = record();
        r.study_type = Some("Unknown".into());
        let (batch, stats) = clean_one(r);
        assert_eq!(batch.studies[0].study_type, "UNKNOWN");
        assert_eq!(stats.count(RULE_DEFAULT_STUDY_TYPE), 1);
    }

    #[test]
    fn test_combined_phase_kept_packed() {
        let mut r = record();
        r.phases = Some("PHASE1, PHASE2".into());
        let (batch, _) = clean_one(r);
        assert_eq!(batch.studies[0].phase.as_deref(), Some("PHASE1, PHASE2"));
    }

    #[test]
    fn test_locations_carried_through() {
        use crate::record::LocationRecord;
        let mut r = record();
        r.data_source = SourceType::Api;
        r.locations = vec![LocationRecord {
            facility: Some("City Hospital".into()),
            city: Some("Boston".into()),
            state: Some("MA".into()),
            country: Some("United States".into()),
            zip_code: Some("02101".into()),
        }];
        let (batch, _) = clean_one(r);
        assert_eq!(batch.locations.len(), 1);
        assert_eq!(batch.locations[0].row_index, 0);
        assert_eq!(batch.locations[0].city.as_deref(), Some("Boston"));
    }

    #[test]
    fn test_cleaning_already_clean_batch_is_noop_on_stats() {
        // A batch with normalized values, unpadded delimiters, and a full
        // date triggers no rule at all.
        let mut r = record();
        r.conditions = Some("Diabetes,Obesity".into());
        r.interventions = Some("Drug A".into());
        r.mesh_terms = Some("Diabetes Mellitus".into());

        let (_, stats) = clean_one(r);
        assert_eq!(stats.rows_altered(), 0, "stats: {}", stats.summary());
        assert_eq!(stats.count(INFO_ROWS_INPUT), 1);
        assert_eq!(stats.count(INFO_ROWS_OUTPUT), 1);
    }

    #[test]
    fn test_stats_are_per_run() {
        let engine = CleaningEngine::new();
        let mut r = record();
        r.org_name = Some("Unknown".into());
        let (_, stats1) = engine.clean(vec![r.clone()]);
        let (_, stats2) = engine.clean(vec![r]);
        // Second run starts from zero, no accumulation across runs
        assert_eq!(stats1.count(RULE_NULLIFY_SENTINELS), 1);
        assert_eq!(stats2.count(RULE_NULLIFY_SENTINELS), 1);
    }
}
