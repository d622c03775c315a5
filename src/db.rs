// 🗄️ Storage - SQLite tables for dataset versions, records, scores, events
//
// Dataset versions are append-only: an import creates a new version with a
// new tag and never touches an existing one. Scores are the only rows written
// after import, and only through an upsert that leaves existing rows alone.

use crate::error::{ReconError, Result};
use crate::model::{
    Address, DatasetId, DatasetKind, DatasetVersion, Entity, EntityInput, MatchScore,
    OverrideInput, OverrideRecord, OverrideSnapshot, OverrideType, RegistryResult,
    ResultInput, ResultStatus, Scores,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::Path;

// ============================================================================
// EVENTS (audit trail)
// ============================================================================

/// Every import and score run leaves an event behind
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub subject_type: String,
    pub subject_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        subject_type: &str,
        subject_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            subject_type: subject_type.to_string(),
            subject_id: subject_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL for crash recovery; in-memory databases silently keep "memory"
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS datasets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            tag TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            row_count INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(kind, tag)
        );

        CREATE TABLE IF NOT EXISTS entities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            dataset_id INTEGER NOT NULL REFERENCES datasets(id),
            name TEXT NOT NULL,
            address TEXT,
            suite TEXT,
            city TEXT,
            state TEXT,
            zip TEXT,
            jurisdictions TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS registry_results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            dataset_id INTEGER NOT NULL REFERENCES datasets(id),
            search_name TEXT NOT NULL,
            jurisdiction TEXT NOT NULL,
            license_number TEXT,
            license_type TEXT,
            license_status TEXT,
            issue_date TEXT,
            expiration_date TEXT,
            business_name TEXT,
            address TEXT,
            suite TEXT,
            city TEXT,
            state TEXT,
            zip TEXT,
            status TEXT NOT NULL,
            timestamp TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS overrides (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            dataset_id INTEGER NOT NULL REFERENCES datasets(id),
            entity_name TEXT NOT NULL,
            jurisdiction TEXT NOT NULL,
            license_number TEXT,
            override_type TEXT NOT NULL,
            reason TEXT,
            author TEXT,
            created_at TEXT NOT NULL,
            snap_address TEXT,
            snap_suite TEXT,
            snap_city TEXT,
            snap_state TEXT,
            snap_zip TEXT,
            snap_license_status TEXT,
            snap_issue_date TEXT,
            snap_expiration_date TEXT
        );

        CREATE TABLE IF NOT EXISTS match_scores (
            result_dataset_id INTEGER NOT NULL,
            entity_dataset_id INTEGER NOT NULL,
            entity_id INTEGER NOT NULL,
            result_id INTEGER NOT NULL,
            overall REAL NOT NULL,
            street REAL NOT NULL,
            locality REAL NOT NULL,
            computed_at TEXT NOT NULL,
            PRIMARY KEY (result_dataset_id, entity_dataset_id, entity_id, result_id)
        );

        CREATE TABLE IF NOT EXISTS score_runs (
            entity_dataset_id INTEGER NOT NULL,
            result_dataset_id INTEGER NOT NULL,
            scored INTEGER NOT NULL,
            failed INTEGER NOT NULL,
            completed_at TEXT NOT NULL,
            PRIMARY KEY (entity_dataset_id, result_dataset_id)
        );

        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            subject_type TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_entities_dataset ON entities(dataset_id, name);
        CREATE INDEX IF NOT EXISTS idx_results_dataset
            ON registry_results(dataset_id, search_name, jurisdiction);
        CREATE INDEX IF NOT EXISTS idx_overrides_dataset
            ON overrides(dataset_id, entity_name, jurisdiction);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_overrides_single_empty
            ON overrides(dataset_id, entity_name, jurisdiction)
            WHERE override_type = 'empty';
        CREATE INDEX IF NOT EXISTS idx_events_subject ON events(subject_type, subject_id);",
    )?;

    Ok(())
}

// ============================================================================
// DATASET VERSIONS
// ============================================================================

fn row_to_dataset(row: &Row) -> rusqlite::Result<DatasetVersion> {
    let kind: String = row.get(1)?;
    let created_at: String = row.get(5)?;
    Ok(DatasetVersion {
        id: DatasetId(row.get(0)?),
        kind: kind
            .parse()
            .map_err(|e: String| conversion_error(1, e))?,
        tag: row.get(2)?,
        content_hash: row.get(3)?,
        row_count: row.get(4)?,
        created_at: parse_timestamp(5, &created_at)?,
    })
}

const DATASET_COLUMNS: &str = "id, kind, tag, content_hash, row_count, created_at";

/// Look up a dataset version by id, failing with DatasetNotFound when it is
/// missing or belongs to another kind
pub fn get_dataset(conn: &Connection, kind: DatasetKind, id: DatasetId) -> Result<DatasetVersion> {
    conn.query_row(
        &format!("SELECT {} FROM datasets WHERE id = ?1 AND kind = ?2", DATASET_COLUMNS),
        params![id.0, kind.as_str()],
        row_to_dataset,
    )
    .optional()?
    .ok_or_else(|| ReconError::dataset_not_found(kind, id))
}

pub fn resolve_dataset(conn: &Connection, kind: DatasetKind, tag: &str) -> Result<DatasetVersion> {
    conn.query_row(
        &format!("SELECT {} FROM datasets WHERE kind = ?1 AND tag = ?2", DATASET_COLUMNS),
        params![kind.as_str(), tag],
        row_to_dataset,
    )
    .optional()?
    .ok_or_else(|| ReconError::dataset_not_found(kind, tag))
}

pub fn list_datasets(conn: &Connection, kind: Option<DatasetKind>) -> Result<Vec<DatasetVersion>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM datasets
         WHERE ?1 IS NULL OR kind = ?1
         ORDER BY kind, id",
        DATASET_COLUMNS
    ))?;

    let datasets = stmt
        .query_map(params![kind.map(|k| k.as_str())], row_to_dataset)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(datasets)
}

fn create_dataset(
    conn: &Connection,
    kind: DatasetKind,
    tag: &str,
    content_hash: &str,
    row_count: usize,
) -> Result<DatasetVersion> {
    let tag = tag.trim();
    if tag.is_empty() {
        return Err(ReconError::InvalidConfig("dataset tag must not be empty".to_string()));
    }

    let exists: Option<i64> = conn
        .query_row(
            "SELECT id FROM datasets WHERE kind = ?1 AND tag = ?2",
            params![kind.as_str(), tag],
            |row| row.get(0),
        )
        .optional()?;
    if exists.is_some() {
        return Err(ReconError::DatasetTagExists {
            kind,
            tag: tag.to_string(),
        });
    }

    let created_at = Utc::now();
    conn.execute(
        "INSERT INTO datasets (kind, tag, content_hash, row_count, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![kind.as_str(), tag, content_hash, row_count as i64, created_at.to_rfc3339()],
    )?;

    Ok(DatasetVersion {
        id: DatasetId(conn.last_insert_rowid()),
        kind,
        tag: tag.to_string(),
        content_hash: content_hash.to_string(),
        row_count: row_count as i64,
        created_at,
    })
}

/// SHA-256 fingerprint of the rows making up a dataset version
pub fn content_hash<T: Serialize>(rows: &[T]) -> Result<String> {
    let mut hasher = Sha256::new();
    for row in rows {
        hasher.update(serde_json::to_vec(row)?);
        hasher.update(b"\n");
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn record_import_event(conn: &Connection, dataset: &DatasetVersion, actor: &str) -> Result<()> {
    let event = Event::new(
        "dataset_imported",
        dataset.kind.as_str(),
        &dataset.id.0.to_string(),
        serde_json::json!({
            "tag": dataset.tag,
            "rows": dataset.row_count,
            "content_hash": dataset.content_hash,
        }),
        actor,
    );
    insert_event(conn, &event)
}

// ============================================================================
// ENTITIES
// ============================================================================

/// Import entities as a new dataset version
pub fn import_entities(conn: &Connection, tag: &str, entities: &[EntityInput]) -> Result<DatasetVersion> {
    let tx = conn.unchecked_transaction()?;
    let dataset = create_dataset(&tx, DatasetKind::Entities, tag, &content_hash(entities)?, entities.len())?;

    {
        let mut stmt = tx.prepare(
            "INSERT INTO entities (dataset_id, name, address, suite, city, state, zip, jurisdictions)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;

        for entity in entities {
            let jurisdictions = serde_json::to_string(&canonical_jurisdictions(&entity.jurisdictions))?;
            stmt.execute(params![
                dataset.id.0,
                entity.name.trim(),
                entity.address.address,
                entity.address.suite,
                entity.address.city,
                entity.address.state,
                entity.address.zip,
                jurisdictions,
            ])?;
        }
    }

    record_import_event(&tx, &dataset, "entity_importer")?;
    tx.commit()?;

    tracing::info!(tag = %dataset.tag, id = dataset.id.0, rows = entities.len(), "imported entity dataset");
    Ok(dataset)
}

pub fn load_entities(conn: &Connection, dataset: DatasetId) -> Result<Vec<Entity>> {
    let mut stmt = conn.prepare(
        "SELECT id, dataset_id, name, address, suite, city, state, zip, jurisdictions
         FROM entities
         WHERE dataset_id = ?1
         ORDER BY id",
    )?;

    let entities = stmt
        .query_map(params![dataset.0], |row| {
            let jurisdictions_json: String = row.get(8)?;
            Ok(Entity {
                id: row.get(0)?,
                dataset_id: DatasetId(row.get(1)?),
                name: row.get(2)?,
                address: Address {
                    address: row.get(3)?,
                    suite: row.get(4)?,
                    city: row.get(5)?,
                    state: row.get(6)?,
                    zip: row.get(7)?,
                },
                jurisdictions: serde_json::from_str(&jurisdictions_json)
                    .map_err(|e| conversion_error(8, e))?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(entities)
}

/// Upper-cased, sorted, deduplicated jurisdiction codes
pub fn canonical_jurisdictions(codes: &[String]) -> Vec<String> {
    let mut out: Vec<String> = codes
        .iter()
        .map(|c| canonical_jurisdiction(c))
        .filter(|c| !c.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

pub fn canonical_jurisdiction(code: &str) -> String {
    code.trim().to_uppercase()
}

// ============================================================================
// REGISTRY RESULTS
// ============================================================================

/// Keep one row per (jurisdiction, license number): the latest timestamp
/// wins, and on equal timestamps the row seen later. Rows without a license
/// number are all kept.
pub fn dedupe_results(results: &[ResultInput]) -> Vec<ResultInput> {
    let mut kept: Vec<ResultInput> = Vec::with_capacity(results.len());
    let mut by_key: HashMap<(String, String), usize> = HashMap::new();

    for result in results {
        let license = match result.license_number.as_deref().map(str::trim) {
            Some(l) if !l.is_empty() => l.to_uppercase(),
            _ => {
                kept.push(result.clone());
                continue;
            }
        };

        let key = (canonical_jurisdiction(&result.jurisdiction), license);
        match by_key.get(&key) {
            Some(&idx) => {
                if result.timestamp >= kept[idx].timestamp {
                    kept[idx] = result.clone();
                }
            }
            None => {
                by_key.insert(key, kept.len());
                kept.push(result.clone());
            }
        }
    }

    kept
}

/// Import registry results as a new dataset version (deduplicated first)
pub fn import_results(conn: &Connection, tag: &str, results: &[ResultInput]) -> Result<DatasetVersion> {
    let deduped = dedupe_results(results);
    if deduped.len() < results.len() {
        tracing::info!(
            dropped = results.len() - deduped.len(),
            "dropped superseded registry rows"
        );
    }

    let tx = conn.unchecked_transaction()?;
    let dataset = create_dataset(&tx, DatasetKind::Results, tag, &content_hash(&deduped)?, deduped.len())?;

    {
        let mut stmt = tx.prepare(
            "INSERT INTO registry_results (
                dataset_id, search_name, jurisdiction, license_number, license_type,
                license_status, issue_date, expiration_date, business_name,
                address, suite, city, state, zip, status, timestamp
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        )?;

        for r in &deduped {
            stmt.execute(params![
                dataset.id.0,
                r.search_name.trim(),
                canonical_jurisdiction(&r.jurisdiction),
                r.license_number.as_deref().map(str::trim),
                r.license_type,
                r.license_status,
                r.issue_date,
                r.expiration_date,
                r.business_name,
                r.address.address,
                r.address.suite,
                r.address.city,
                r.address.state,
                r.address.zip,
                r.status.as_str(),
                r.timestamp.to_rfc3339(),
            ])?;
        }
    }

    record_import_event(&tx, &dataset, "result_importer")?;
    tx.commit()?;

    tracing::info!(tag = %dataset.tag, id = dataset.id.0, rows = deduped.len(), "imported result dataset");
    Ok(dataset)
}

pub fn load_results(conn: &Connection, dataset: DatasetId) -> Result<Vec<RegistryResult>> {
    let mut stmt = conn.prepare(
        "SELECT id, dataset_id, search_name, jurisdiction, license_number, license_type,
                license_status, issue_date, expiration_date, business_name,
                address, suite, city, state, zip, status, timestamp
         FROM registry_results
         WHERE dataset_id = ?1
         ORDER BY id",
    )?;

    let results = stmt
        .query_map(params![dataset.0], |row| {
            let status: String = row.get(15)?;
            let timestamp: String = row.get(16)?;
            Ok(RegistryResult {
                id: row.get(0)?,
                dataset_id: DatasetId(row.get(1)?),
                search_name: row.get(2)?,
                jurisdiction: row.get(3)?,
                license_number: row.get(4)?,
                license_type: row.get(5)?,
                license_status: row.get(6)?,
                issue_date: row.get(7)?,
                expiration_date: row.get(8)?,
                business_name: row.get(9)?,
                address: Address {
                    address: row.get(10)?,
                    suite: row.get(11)?,
                    city: row.get(12)?,
                    state: row.get(13)?,
                    zip: row.get(14)?,
                },
                status: status
                    .parse::<ResultStatus>()
                    .map_err(|e| conversion_error(15, e))?,
                timestamp: parse_timestamp(16, &timestamp)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(results)
}

// ============================================================================
// OVERRIDES
// ============================================================================

/// Write-time constraints on one override dataset:
/// - entity name and jurisdiction are required
/// - "present" needs a non-empty license number
/// - at most one "empty" per (entity name, jurisdiction)
/// - at most one "present" per (entity name, jurisdiction, license number)
pub fn validate_overrides(overrides: &[OverrideInput]) -> Result<()> {
    let mut empties: HashSet<(String, String)> = HashSet::new();
    let mut presents: HashSet<(String, String, String)> = HashSet::new();

    for o in overrides {
        let name = o.entity_name.trim();
        let jurisdiction = canonical_jurisdiction(&o.jurisdiction);

        if name.is_empty() || jurisdiction.is_empty() {
            return Err(ReconError::override_violation(
                name,
                &jurisdiction,
                "entity name and jurisdiction are required",
            ));
        }

        match o.override_type {
            OverrideType::Empty => {
                if !empties.insert((name.to_string(), jurisdiction.clone())) {
                    return Err(ReconError::override_violation(
                        name,
                        &jurisdiction,
                        "duplicate \"empty\" override",
                    ));
                }
            }
            OverrideType::Present => {
                let license = match o.license_number.as_deref().map(str::trim) {
                    Some(l) if !l.is_empty() => l.to_uppercase(),
                    _ => {
                        return Err(ReconError::override_violation(
                            name,
                            &jurisdiction,
                            "\"present\" override requires a license number",
                        ))
                    }
                };
                if !presents.insert((name.to_string(), jurisdiction.clone(), license.clone())) {
                    return Err(ReconError::override_violation(
                        name,
                        &jurisdiction,
                        &format!("duplicate \"present\" override for license {}", license),
                    ));
                }
            }
        }
    }

    Ok(())
}

/// Import overrides as a new dataset version. Any constraint violation
/// rejects the whole batch and nothing is written.
pub fn import_overrides(conn: &Connection, tag: &str, overrides: &[OverrideInput]) -> Result<DatasetVersion> {
    validate_overrides(overrides)?;

    let tx = conn.unchecked_transaction()?;
    let dataset = create_dataset(&tx, DatasetKind::Overrides, tag, &content_hash(overrides)?, overrides.len())?;
    let created_at = Utc::now().to_rfc3339();

    {
        let mut stmt = tx.prepare(
            "INSERT INTO overrides (
                dataset_id, entity_name, jurisdiction, license_number, override_type,
                reason, author, created_at,
                snap_address, snap_suite, snap_city, snap_state, snap_zip,
                snap_license_status, snap_issue_date, snap_expiration_date
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        )?;

        for o in overrides {
            let s = &o.snapshot;
            stmt.execute(params![
                dataset.id.0,
                o.entity_name.trim(),
                canonical_jurisdiction(&o.jurisdiction),
                o.license_number.as_deref().map(str::trim).filter(|l| !l.is_empty()),
                o.override_type.as_str(),
                o.reason,
                o.author,
                created_at,
                s.address.address,
                s.address.suite,
                s.address.city,
                s.address.state,
                s.address.zip,
                s.license_status,
                s.issue_date,
                s.expiration_date,
            ])?;
        }
    }

    record_import_event(&tx, &dataset, "override_importer")?;
    tx.commit()?;

    tracing::info!(tag = %dataset.tag, id = dataset.id.0, rows = overrides.len(), "imported override dataset");
    Ok(dataset)
}

pub fn load_overrides(conn: &Connection, dataset: DatasetId) -> Result<Vec<OverrideRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, dataset_id, entity_name, jurisdiction, license_number, override_type,
                reason, author, created_at,
                snap_address, snap_suite, snap_city, snap_state, snap_zip,
                snap_license_status, snap_issue_date, snap_expiration_date
         FROM overrides
         WHERE dataset_id = ?1
         ORDER BY id",
    )?;

    let overrides = stmt
        .query_map(params![dataset.0], |row| {
            let override_type: String = row.get(5)?;
            let created_at: String = row.get(8)?;
            Ok(OverrideRecord {
                id: row.get(0)?,
                dataset_id: DatasetId(row.get(1)?),
                entity_name: row.get(2)?,
                jurisdiction: row.get(3)?,
                license_number: row.get(4)?,
                override_type: override_type
                    .parse::<OverrideType>()
                    .map_err(|e| conversion_error(5, e))?,
                reason: row.get(6)?,
                author: row.get(7)?,
                created_at: parse_timestamp(8, &created_at)?,
                snapshot: OverrideSnapshot {
                    address: Address {
                        address: row.get(9)?,
                        suite: row.get(10)?,
                        city: row.get(11)?,
                        state: row.get(12)?,
                        zip: row.get(13)?,
                    },
                    license_status: row.get(14)?,
                    issue_date: row.get(15)?,
                    expiration_date: row.get(16)?,
                },
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(overrides)
}

// ============================================================================
// MATCH SCORES
// ============================================================================

pub fn load_scores(
    conn: &Connection,
    entity_dataset: DatasetId,
    result_dataset: DatasetId,
) -> Result<Vec<MatchScore>> {
    let mut stmt = conn.prepare(
        "SELECT entity_id, result_id, overall, street, locality, computed_at
         FROM match_scores
         WHERE result_dataset_id = ?1 AND entity_dataset_id = ?2
         ORDER BY entity_id, result_id",
    )?;

    let scores = stmt
        .query_map(params![result_dataset.0, entity_dataset.0], |row| {
            let computed_at: String = row.get(5)?;
            Ok(MatchScore {
                result_dataset,
                entity_dataset,
                entity_id: row.get(0)?,
                result_id: row.get(1)?,
                scores: Scores {
                    overall: row.get(2)?,
                    street: row.get(3)?,
                    locality: row.get(4)?,
                },
                computed_at: parse_timestamp(5, &computed_at)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(scores)
}

/// (entity id, result id) pairs already scored for a dataset pair
pub fn scored_pairs(
    conn: &Connection,
    entity_dataset: DatasetId,
    result_dataset: DatasetId,
) -> Result<HashSet<(i64, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT entity_id, result_id FROM match_scores
         WHERE result_dataset_id = ?1 AND entity_dataset_id = ?2",
    )?;

    let pairs = stmt
        .query_map(params![result_dataset.0, entity_dataset.0], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
        })?
        .collect::<rusqlite::Result<HashSet<_>>>()?;

    Ok(pairs)
}

/// Persist one batch of scores atomically. Rows that already exist are left
/// untouched; returns how many rows were new.
pub fn insert_scores(conn: &Connection, scores: &[MatchScore]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut inserted = 0;

    {
        let mut stmt = tx.prepare(
            "INSERT INTO match_scores (
                result_dataset_id, entity_dataset_id, entity_id, result_id,
                overall, street, locality, computed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT (result_dataset_id, entity_dataset_id, entity_id, result_id) DO NOTHING",
        )?;

        for s in scores {
            inserted += stmt.execute(params![
                s.result_dataset.0,
                s.entity_dataset.0,
                s.entity_id,
                s.result_id,
                s.scores.overall,
                s.scores.street,
                s.scores.locality,
                s.computed_at.to_rfc3339(),
            ])?;
        }
    }

    tx.commit()?;
    Ok(inserted)
}

pub fn count_scores(conn: &Connection, entity_dataset: DatasetId, result_dataset: DatasetId) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM match_scores WHERE result_dataset_id = ?1 AND entity_dataset_id = ?2",
        params![result_dataset.0, entity_dataset.0],
        |row| row.get(0),
    )?;
    Ok(count)
}

// ============================================================================
// SCORE RUNS (lazy computation marker)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreRun {
    pub entity_dataset: DatasetId,
    pub result_dataset: DatasetId,
    pub scored: i64,
    pub failed: i64,
    pub completed_at: DateTime<Utc>,
}

pub fn get_score_run(
    conn: &Connection,
    entity_dataset: DatasetId,
    result_dataset: DatasetId,
) -> Result<Option<ScoreRun>> {
    let run = conn
        .query_row(
            "SELECT scored, failed, completed_at FROM score_runs
             WHERE entity_dataset_id = ?1 AND result_dataset_id = ?2",
            params![entity_dataset.0, result_dataset.0],
            |row| {
                let completed_at: String = row.get(2)?;
                Ok(ScoreRun {
                    entity_dataset,
                    result_dataset,
                    scored: row.get(0)?,
                    failed: row.get(1)?,
                    completed_at: parse_timestamp(2, &completed_at)?,
                })
            },
        )
        .optional()?;

    Ok(run)
}

/// Mark a combination complete. `scored` accumulates across runs, `failed`
/// is the latest run's count of pairs still left unscored.
pub fn record_score_run(conn: &Connection, run: &ScoreRun) -> Result<()> {
    conn.execute(
        "INSERT INTO score_runs (entity_dataset_id, result_dataset_id, scored, failed, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (entity_dataset_id, result_dataset_id)
         DO UPDATE SET scored = score_runs.scored + excluded.scored, failed = excluded.failed,
                       completed_at = excluded.completed_at",
        params![
            run.entity_dataset.0,
            run.result_dataset.0,
            run.scored,
            run.failed,
            run.completed_at.to_rfc3339(),
        ],
    )?;

    let event = Event::new(
        "scores_computed",
        "dataset_pair",
        &format!("{}:{}", run.entity_dataset.0, run.result_dataset.0),
        serde_json::json!({ "scored": run.scored, "failed": run.failed }),
        "scoring_scheduler",
    );
    insert_event(conn, &event)
}

// ============================================================================
// EVENT LOG
// ============================================================================

pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, subject_type, subject_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.subject_type,
            event.subject_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

pub fn get_events_for_subject(conn: &Connection, subject_type: &str, subject_id: &str) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, subject_type, subject_id, data, actor
         FROM events
         WHERE subject_type = ?1 AND subject_id = ?2
         ORDER BY id",
    )?;

    let events = stmt
        .query_map(params![subject_type, subject_id], |row| {
            let timestamp: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: parse_timestamp(1, &timestamp)?,
                event_type: row.get(2)?,
                subject_type: row.get(3)?,
                subject_id: row.get(4)?,
                data: serde_json::from_str(&data_json).map_err(|e| conversion_error(5, e))?,
                actor: row.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(events)
}

// ============================================================================
// HELPERS
// ============================================================================

fn parse_timestamp(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, err.into())
}
