// Loader - writes a validated batch into the normalized SQLite warehouse.
//
// Five steps, each in its own transaction and each recorded in pipeline_log.
// A failing step rolls back, gets a FAILED log row, and aborts the run;
// steps already committed stand.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::time::Instant;

use chrono::Utc;
use log::{info, warn};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::record::{BridgeRow, CleanedBatch, SourceType};

pub const STEP_ORGANIZATIONS: &str = "load_organizations";
pub const STEP_STUDIES: &str = "load_studies";
pub const STEP_BRIDGES: &str = "load_bridges";
pub const STEP_LOCATIONS: &str = "load_locations";
pub const STEP_VERIFY: &str = "verify_counts";

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_schema(conn: &Connection) -> Result<()> {
    // WAL for crash recovery; FKs so bridge cascade deletes actually fire
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // ==========================================================================
    // Dimension: organizations (natural key = name)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS organizations (
            org_id INTEGER PRIMARY KEY AUTOINCREMENT,
            org_name TEXT UNIQUE NOT NULL,
            org_class TEXT
        )",
        [],
    )?;

    // ==========================================================================
    // Fact: studies (nct_id is the external natural key when present)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS studies (
            study_id INTEGER PRIMARY KEY AUTOINCREMENT,
            org_id INTEGER REFERENCES organizations(org_id),
            nct_id TEXT UNIQUE,
            brief_title TEXT NOT NULL,
            full_title TEXT,
            responsible_party TEXT,
            overall_status TEXT,
            start_date TEXT,
            start_date_raw TEXT,
            start_date_is_approx INTEGER NOT NULL DEFAULT 0,
            primary_purpose TEXT,
            study_type TEXT NOT NULL,
            phase TEXT,
            outcome_measure TEXT,
            intervention_description TEXT,
            enrollment INTEGER,
            data_source TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Bridge tables (one exploded value per row)
    // ==========================================================================
    for table in BRIDGE_TABLES {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    study_id INTEGER NOT NULL
                        REFERENCES studies(study_id) ON DELETE CASCADE,
                    value TEXT NOT NULL
                )",
                table
            ),
            [],
        )?;
        conn.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS idx_{}_study ON {}(study_id)",
                table, table
            ),
            [],
        )?;
    }

    conn.execute(
        "CREATE TABLE IF NOT EXISTS study_locations (
            location_id INTEGER PRIMARY KEY AUTOINCREMENT,
            study_id INTEGER NOT NULL
                REFERENCES studies(study_id) ON DELETE CASCADE,
            facility TEXT,
            city TEXT,
            state TEXT,
            country TEXT,
            zip_code TEXT
        )",
        [],
    )?;

    // ==========================================================================
    // Observability: append-only run log
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS pipeline_log (
            log_id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL,
            step_name TEXT NOT NULL,
            status TEXT NOT NULL,
            rows_processed INTEGER NOT NULL DEFAULT 0,
            rows_rejected INTEGER NOT NULL DEFAULT 0,
            error_message TEXT,
            started_at TEXT NOT NULL,
            completed_at TEXT NOT NULL,
            duration_seconds REAL NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_studies_nct ON studies(nct_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_studies_org ON studies(org_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_locations_study ON study_locations(study_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_log_run ON pipeline_log(run_id)",
        [],
    )?;

    Ok(())
}

const BRIDGE_TABLES: [&str; 4] = [
    "study_conditions",
    "study_interventions",
    "study_age_groups",
    "study_mesh_terms",
];

// ============================================================================
// REPORT TYPES
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadReport {
    pub run_id: String,
    pub organizations_inserted: u64,
    pub studies_inserted: u64,
    pub studies_updated: u64,
    pub bridge_rows_inserted: u64,
    pub bridge_rows_rejected: u64,
    pub locations_inserted: u64,
    /// Post-load totals across the whole warehouse, not just this run.
    pub warehouse_studies: u64,
    pub warehouse_organizations: u64,
}

impl LoadReport {
    pub fn summary(&self) -> String {
        format!(
            "run {}: {} orgs inserted, {} studies inserted, {} updated, \
             {} bridge rows ({} rejected), {} locations",
            self.run_id,
            self.organizations_inserted,
            self.studies_inserted,
            self.studies_updated,
            self.bridge_rows_inserted,
            self.bridge_rows_rejected,
            self.locations_inserted
        )
    }
}

/// One pipeline_log row, read back for monitoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub run_id: String,
    pub step_name: String,
    pub status: String,
    pub rows_processed: u64,
    pub rows_rejected: u64,
    pub error_message: Option<String>,
    pub started_at: String,
    pub completed_at: String,
    pub duration_seconds: f64,
}

pub fn read_run_log(conn: &Connection, run_id: &str) -> Result<Vec<LogEntry>> {
    let mut stmt = conn.prepare(
        "SELECT run_id, step_name, status, rows_processed, rows_rejected,
                error_message, started_at, completed_at, duration_seconds
         FROM pipeline_log
         WHERE run_id = ?1
         ORDER BY log_id",
    )?;
    let entries = stmt
        .query_map(params![run_id], |row| {
            Ok(LogEntry {
                run_id: row.get(0)?,
                step_name: row.get(1)?,
                status: row.get(2)?,
                rows_processed: row.get(3)?,
                rows_rejected: row.get(4)?,
                error_message: row.get(5)?,
                started_at: row.get(6)?,
                completed_at: row.get(7)?,
                duration_seconds: row.get(8)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(entries)
}

// ============================================================================
// LOADER
// ============================================================================

#[derive(Debug, Default)]
struct StepCounts {
    processed: u64,
    rejected: u64,
}

pub struct Loader {
    conn: Connection,
    run_id: String,
}

impl Loader {
    pub fn open<P: AsRef<Path>>(db_path: P, run_id: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        Self::with_connection(conn, run_id)
    }

    /// Take over an existing connection; used with in-memory databases.
    pub fn with_connection(conn: Connection, run_id: &str) -> Result<Self> {
        setup_schema(&conn)?;
        Ok(Loader {
            conn,
            run_id: run_id.to_string(),
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn into_connection(self) -> Connection {
        self.conn
    }

    /// Write the batch into the warehouse. Step order matters: organizations
    /// before studies (FK), studies before bridges and locations.
    pub fn load(&mut self, batch: &CleanedBatch) -> Result<LoadReport> {
        let mut report = LoadReport {
            run_id: self.run_id.clone(),
            ..LoadReport::default()
        };

        let mut org_ids: HashMap<String, i64> = HashMap::new();
        let mut study_ids: HashMap<usize, i64> = HashMap::new();

        self.run_step(STEP_ORGANIZATIONS, |tx| {
            let counts = load_organizations(tx, batch, &mut org_ids)?;
            Ok(counts)
        })
        .map(|c| report.organizations_inserted = c.processed)?;

        self.run_step(STEP_STUDIES, |tx| {
            let (counts, inserted, updated) = load_studies(tx, batch, &org_ids, &mut study_ids)?;
            report.studies_inserted = inserted;
            report.studies_updated = updated;
            Ok(counts)
        })?;

        let bridge_counts = self.run_step(STEP_BRIDGES, |tx| load_bridges(tx, batch, &study_ids))?;
        report.bridge_rows_inserted = bridge_counts.processed;
        report.bridge_rows_rejected = bridge_counts.rejected;

        self.run_step(STEP_LOCATIONS, |tx| load_locations(tx, batch, &study_ids))
            .map(|c| report.locations_inserted = c.processed)?;

        self.run_step(STEP_VERIFY, |tx| {
            report.warehouse_studies =
                tx.query_row("SELECT COUNT(*) FROM studies", [], |r| r.get(0))?;
            report.warehouse_organizations =
                tx.query_row("SELECT COUNT(*) FROM organizations", [], |r| r.get(0))?;
            Ok(StepCounts {
                processed: report.warehouse_studies,
                rejected: 0,
            })
        })?;

        info!("{}", report.summary());
        Ok(report)
    }

    /// Run one step in its own transaction and record the outcome in
    /// pipeline_log. The log row is written outside the step transaction so
    /// it survives a rollback.
    fn run_step<F>(&mut self, step: &str, body: F) -> Result<StepCounts>
    where
        F: FnOnce(&Transaction) -> Result<StepCounts>,
    {
        let started_at = Utc::now();
        let clock = Instant::now();

        let tx = self.conn.transaction()?;
        match body(&tx) {
            Ok(counts) => {
                tx.commit()?;
                write_log_row(
                    &self.conn,
                    &self.run_id,
                    step,
                    "SUCCESS",
                    &counts,
                    None,
                    &started_at.to_rfc3339(),
                    clock.elapsed().as_secs_f64(),
                )?;
                info!(
                    "step {} SUCCESS: {} rows ({} rejected)",
                    step, counts.processed, counts.rejected
                );
                Ok(counts)
            }
            Err(err) => {
                drop(tx); // rollback
                let message = err.to_string();
                write_log_row(
                    &self.conn,
                    &self.run_id,
                    step,
                    "FAILED",
                    &StepCounts::default(),
                    Some(&message),
                    &started_at.to_rfc3339(),
                    clock.elapsed().as_secs_f64(),
                )?;
                Err(PipelineError::LoadStep {
                    step: step.to_string(),
                    message,
                })
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn write_log_row(
    conn: &Connection,
    run_id: &str,
    step: &str,
    status: &str,
    counts: &StepCounts,
    error_message: Option<&str>,
    started_at: &str,
    duration_seconds: f64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO pipeline_log (
            run_id, step_name, status, rows_processed, rows_rejected,
            error_message, started_at, completed_at, duration_seconds
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            run_id,
            step,
            status,
            counts.processed,
            counts.rejected,
            error_message,
            started_at,
            Utc::now().to_rfc3339(),
            duration_seconds,
        ],
    )?;
    Ok(())
}

// ============================================================================
// STEP BODIES
// ============================================================================

/// Upsert organizations by name; fills `org_ids` for every name seen,
/// whether freshly inserted or already present.
fn load_organizations(
    tx: &Transaction,
    batch: &CleanedBatch,
    org_ids: &mut HashMap<String, i64>,
) -> Result<StepCounts> {
    let mut counts = StepCounts::default();
    for study in &batch.studies {
        let Some(name) = study.org_name.as_deref() else {
            continue;
        };
        if org_ids.contains_key(name) {
            continue;
        }
        let changed = tx.execute(
            "INSERT OR IGNORE INTO organizations (org_name, org_class)
             VALUES (?1, ?2)",
            params![name, study.org_class],
        )?;
        counts.processed += changed as u64;
        let org_id: i64 = tx.query_row(
            "SELECT org_id FROM organizations WHERE org_name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        org_ids.insert(name.to_string(), org_id);
    }
    Ok(counts)
}

/// Insert or update studies, returning the row_index -> study_id map the
/// bridge and location steps need. Rows carrying a known nct_id update the
/// mutable columns; everything else inserts.
fn load_studies(
    tx: &Transaction,
    batch: &CleanedBatch,
    org_ids: &HashMap<String, i64>,
    study_ids: &mut HashMap<usize, i64>,
) -> Result<(StepCounts, u64, u64)> {
    let mut inserted = 0u64;
    let mut updated = 0u64;

    for study in &batch.studies {
        let org_id = study
            .org_name
            .as_deref()
            .and_then(|name| org_ids.get(name))
            .copied();
        let start_date = study.start_date.map(|d| d.to_string());

        let existing: Option<i64> = match study.nct_id.as_deref() {
            Some(nct) => tx
                .query_row(
                    "SELECT study_id FROM studies WHERE nct_id = ?1",
                    params![nct],
                    |row| row.get(0),
                )
                .optional()?,
            None => None,
        };

        let study_id = match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE studies SET
                        org_id = ?1, overall_status = ?2, enrollment = ?3,
                        start_date = ?4, start_date_raw = ?5,
                        start_date_is_approx = ?6,
                        updated_at = CURRENT_TIMESTAMP
                     WHERE study_id = ?7",
                    params![
                        org_id,
                        study.overall_status,
                        study.enrollment,
                        start_date,
                        study.start_date_raw,
                        study.start_date_is_approx,
                        id,
                    ],
                )?;
                updated += 1;
                id
            }
            None => {
                tx.execute(
                    "INSERT INTO studies (
                        org_id, nct_id, brief_title, full_title,
                        responsible_party, overall_status, start_date,
                        start_date_raw, start_date_is_approx, primary_purpose,
                        study_type, phase, outcome_measure,
                        intervention_description, enrollment, data_source
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11,
                              ?12, ?13, ?14, ?15, ?16)",
                    params![
                        org_id,
                        study.nct_id,
                        study.brief_title,
                        study.full_title,
                        study.responsible_party,
                        study.overall_status,
                        start_date,
                        study.start_date_raw,
                        study.start_date_is_approx,
                        study.primary_purpose,
                        study.study_type,
                        study.phase,
                        study.outcome_measure,
                        study.intervention_description,
                        study.enrollment,
                        study.data_source.code(),
                    ],
                )?;
                inserted += 1;
                tx.last_insert_rowid()
            }
        };
        study_ids.insert(study.row_index, study_id);
    }

    let counts = StepCounts {
        processed: inserted + updated,
        rejected: 0,
    };
    Ok((counts, inserted, updated))
}

/// Replace bridge rows for every study in the batch: delete-then-insert, so
/// re-loading the same study never duplicates its multi-valued attributes.
fn load_bridges(
    tx: &Transaction,
    batch: &CleanedBatch,
    study_ids: &HashMap<usize, i64>,
) -> Result<StepCounts> {
    let mut counts = StepCounts::default();

    let affected: BTreeSet<i64> = study_ids.values().copied().collect();
    for table in BRIDGE_TABLES {
        for study_id in &affected {
            tx.execute(
                &format!("DELETE FROM {} WHERE study_id = ?1", table),
                params![study_id],
            )?;
        }
    }

    let bridges: [(&str, &Vec<BridgeRow>); 4] = [
        ("study_conditions", &batch.conditions),
        ("study_interventions", &batch.interventions),
        ("study_age_groups", &batch.age_groups),
        ("study_mesh_terms", &batch.mesh_terms),
    ];
    for (table, rows) in bridges {
        for row in rows {
            match study_ids.get(&row.row_index) {
                Some(study_id) => {
                    tx.execute(
                        &format!("INSERT INTO {} (study_id, value) VALUES (?1, ?2)", table),
                        params![study_id, row.value],
                    )?;
                    counts.processed += 1;
                }
                None => {
                    warn!(
                        "{}: dropping row for unmapped source index {}",
                        table, row.row_index
                    );
                    counts.rejected += 1;
                }
            }
        }
    }
    Ok(counts)
}

fn load_locations(
    tx: &Transaction,
    batch: &CleanedBatch,
    study_ids: &HashMap<usize, i64>,
) -> Result<StepCounts> {
    let mut counts = StepCounts::default();

    // Same replace semantics as the bridges, but only for API-sourced rows.
    let api_studies: Vec<i64> = batch
        .studies
        .iter()
        .filter(|s| s.data_source == SourceType::Api)
        .filter_map(|s| study_ids.get(&s.row_index).copied())
        .collect();
    for study_id in &api_studies {
        tx.execute(
            "DELETE FROM study_locations WHERE study_id = ?1",
            params![study_id],
        )?;
    }

    for location in &batch.locations {
        match study_ids.get(&location.row_index) {
            Some(study_id) => {
                tx.execute(
                    "INSERT INTO study_locations (
                        study_id, facility, city, state, country, zip_code
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        study_id,
                        location.facility,
                        location.city,
                        location.state,
                        location.country,
                        location.zip_code,
                    ],
                )?;
                counts.processed += 1;
            }
            None => {
                warn!(
                    "study_locations: dropping row for unmapped source index {}",
                    location.row_index
                );
                counts.rejected += 1;
            }
        }
    }
    Ok(counts)
}

// ============================================================================
// TESTS
// ============================================================================
