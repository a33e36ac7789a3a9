// 🗄️ Persistence - SQLite storage for timelines
//
// Append-only on disk as in memory: rows are inserted (or ignored when already
// present), never deleted. A save is one SQL transaction so a crash never
// leaves half a filing behind.

use crate::facts::{NaturalKey, Period, PeriodType, SourceFiling, StatementType};
use crate::report::{ChangeReport, IngestMode, StatementInconsistency};
use crate::timeline::{AppliedFiling, FactVersion, Timeline, TimelineState, VersionChain};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Event for audit trail: one per change entry
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

/// Rows written by one save
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SaveStats {
    pub keys_inserted: usize,
    pub versions_inserted: usize,
    pub filings_inserted: usize,
    pub annotations_inserted: usize,
}

/// Open (or create) a database file and make sure the schema exists
pub fn open_database<P: AsRef<Path>>(path: P) -> Result<Connection> {
    let conn = Connection::open(path.as_ref())
        .with_context(|| format!("Failed to open database: {}", path.as_ref().display()))?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS timelines (
            entity_id TEXT PRIMARY KEY,
            state TEXT NOT NULL,
            revision INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS fact_keys (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id TEXT NOT NULL,
            statement_type TEXT NOT NULL,
            line_item TEXT NOT NULL,
            period_start TEXT NOT NULL,
            period_end TEXT NOT NULL,
            period_type TEXT NOT NULL,
            last_confirmed_form TEXT,
            last_confirmed_date TEXT,
            last_confirmed_accession TEXT,
            UNIQUE(entity_id, statement_type, line_item, period_start, period_end, period_type)
        );

        CREATE TABLE IF NOT EXISTS fact_versions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            key_id INTEGER NOT NULL REFERENCES fact_keys(id),
            value REAL NOT NULL,
            unit TEXT NOT NULL,
            form_type TEXT NOT NULL,
            filing_date TEXT NOT NULL,
            accession_number TEXT NOT NULL,
            extraction_confidence REAL,
            recorded_at TEXT NOT NULL,
            UNIQUE(key_id, accession_number)
        );

        CREATE TABLE IF NOT EXISTS filings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id TEXT NOT NULL,
            accession_number TEXT NOT NULL,
            form_type TEXT NOT NULL,
            filing_date TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            mode TEXT NOT NULL,
            ingested_at TEXT NOT NULL,
            UNIQUE(entity_id, accession_number)
        );

        CREATE TABLE IF NOT EXISTS annotations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id TEXT NOT NULL,
            annual_key TEXT NOT NULL,
            detected_by TEXT NOT NULL,
            detail TEXT NOT NULL,
            UNIQUE(entity_id, annual_key, detail)
        );

        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_fact_keys_entity ON fact_keys(entity_id, statement_type);
        CREATE INDEX IF NOT EXISTS idx_fact_versions_key ON fact_versions(key_id);
        CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id);
        CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);",
    )
    .context("Failed to create schema")?;

    Ok(())
}

// ============================================================================
// SAVE
// ============================================================================

/// Persist a timeline. Existing rows are kept as they are; only new keys,
/// versions, filings and annotations are inserted.
pub fn save_timeline(conn: &Connection, timeline: &Timeline) -> Result<SaveStats> {
    let tx = conn.unchecked_transaction()?;
    let mut stats = SaveStats::default();

    tx.execute(
        "INSERT INTO timelines (entity_id, state, revision, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(entity_id) DO UPDATE SET
            state = excluded.state,
            revision = MAX(revision, excluded.revision),
            updated_at = excluded.updated_at",
        params![
            timeline.entity_id,
            timeline.state().as_str(),
            timeline.revision() as i64,
            timeline.created_at.to_rfc3339(),
            timeline.updated_at.to_rfc3339(),
        ],
    )?;

    for (key, chain) in timeline.entries() {
        let start = key.period.start.format(DATE_FORMAT).to_string();
        let end = key.period.end.format(DATE_FORMAT).to_string();

        stats.keys_inserted += tx.execute(
            "INSERT OR IGNORE INTO fact_keys
                (entity_id, statement_type, line_item, period_start, period_end, period_type)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                key.entity_id,
                key.statement_type.as_str(),
                key.line_item,
                start,
                end,
                key.period.period_type.as_str(),
            ],
        )?;

        let key_id: i64 = tx.query_row(
            "SELECT id FROM fact_keys
             WHERE entity_id = ?1 AND statement_type = ?2 AND line_item = ?3
               AND period_start = ?4 AND period_end = ?5 AND period_type = ?6",
            params![
                key.entity_id,
                key.statement_type.as_str(),
                key.line_item,
                start,
                end,
                key.period.period_type.as_str(),
            ],
            |row| row.get(0),
        )?;

        let confirmed = chain.last_confirmed();
        tx.execute(
            "UPDATE fact_keys SET last_confirmed_form = ?1, last_confirmed_date = ?2,
                last_confirmed_accession = ?3
             WHERE id = ?4",
            params![
                confirmed.form_type.as_str(),
                confirmed.filing_date.format(DATE_FORMAT).to_string(),
                confirmed.accession_number,
                key_id,
            ],
        )?;

        for version in chain.versions() {
            stats.versions_inserted += tx.execute(
                "INSERT OR IGNORE INTO fact_versions
                    (key_id, value, unit, form_type, filing_date, accession_number,
                     extraction_confidence, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    key_id,
                    version.value,
                    version.unit,
                    version.source.form_type.as_str(),
                    version.source.filing_date.format(DATE_FORMAT).to_string(),
                    version.source.accession_number,
                    version.extraction_confidence,
                    version.recorded_at.to_rfc3339(),
                ],
            )?;
        }
    }

    for applied in timeline.filings() {
        stats.filings_inserted += tx.execute(
            "INSERT OR IGNORE INTO filings
                (entity_id, accession_number, form_type, filing_date, content_hash, mode, ingested_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                timeline.entity_id,
                applied.filing.accession_number,
                applied.filing.form_type.as_str(),
                applied.filing.filing_date.format(DATE_FORMAT).to_string(),
                applied.content_hash,
                applied.mode.as_str(),
                applied.ingested_at.to_rfc3339(),
            ],
        )?;
    }

    for finding in timeline.inconsistencies() {
        let detail = serde_json::to_string(finding).context("Failed to serialize annotation")?;
        stats.annotations_inserted += tx.execute(
            "INSERT OR IGNORE INTO annotations (entity_id, annual_key, detected_by, detail)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                timeline.entity_id,
                finding.annual_key.to_string(),
                finding.detected_by,
                detail,
            ],
        )?;
    }

    tx.commit().context("Failed to commit timeline")?;

    log::debug!("💾 Saved {}: {:?}", timeline.entity_id, stats);
    Ok(stats)
}

// ============================================================================
// LOAD
// ============================================================================

struct KeyRow {
    id: i64,
    statement_type: String,
    line_item: String,
    period_start: String,
    period_end: String,
    period_type: String,
    confirmed: Option<(String, String, String)>,
}

struct VersionRow {
    value: f64,
    unit: String,
    form_type: String,
    filing_date: String,
    accession_number: String,
    extraction_confidence: Option<f64>,
    recorded_at: String,
}

pub fn load_timeline(conn: &Connection, entity_id: &str) -> Result<Option<Timeline>> {
    let header: Option<(String, i64, String, String)> = conn
        .query_row(
            "SELECT state, revision, created_at, updated_at FROM timelines WHERE entity_id = ?1",
            params![entity_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()?;

    let Some((state, revision, created_at, updated_at)) = header else {
        return Ok(None);
    };
    let state = TimelineState::parse(&state).ok_or_else(|| anyhow!("Unknown timeline state: {}", state))?;

    let mut key_stmt = conn.prepare(
        "SELECT id, statement_type, line_item, period_start, period_end, period_type,
                last_confirmed_form, last_confirmed_date, last_confirmed_accession
         FROM fact_keys WHERE entity_id = ?1 ORDER BY id",
    )?;
    let key_rows = key_stmt
        .query_map(params![entity_id], |row| {
            let form: Option<String> = row.get(6)?;
            let date: Option<String> = row.get(7)?;
            let accession: Option<String> = row.get(8)?;
            Ok(KeyRow {
                id: row.get(0)?,
                statement_type: row.get(1)?,
                line_item: row.get(2)?,
                period_start: row.get(3)?,
                period_end: row.get(4)?,
                period_type: row.get(5)?,
                confirmed: match (form, date, accession) {
                    (Some(f), Some(d), Some(a)) => Some((f, d, a)),
                    _ => None,
                },
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut version_stmt = conn.prepare(
        "SELECT value, unit, form_type, filing_date, accession_number, extraction_confidence, recorded_at
         FROM fact_versions WHERE key_id = ?1 ORDER BY filing_date, accession_number",
    )?;

    let mut entries = BTreeMap::new();
    for key_row in key_rows {
        let statement_type: StatementType = key_row.statement_type.parse().map_err(|e: String| anyhow!(e))?;
        let period_type: PeriodType = key_row.period_type.parse().map_err(|e: String| anyhow!(e))?;
        let period = Period::new(
            parse_date(&key_row.period_start)?,
            parse_date(&key_row.period_end)?,
            period_type,
        );
        let key = NaturalKey::new(entity_id, statement_type, &key_row.line_item, period);

        let versions = version_stmt
            .query_map(params![key_row.id], |row| {
                Ok(VersionRow {
                    value: row.get(0)?,
                    unit: row.get(1)?,
                    form_type: row.get(2)?,
                    filing_date: row.get(3)?,
                    accession_number: row.get(4)?,
                    extraction_confidence: row.get(5)?,
                    recorded_at: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|v| {
                Ok(FactVersion {
                    value: v.value,
                    unit: v.unit,
                    source: SourceFiling::new(&v.form_type, parse_date(&v.filing_date)?, &v.accession_number),
                    extraction_confidence: v.extraction_confidence,
                    recorded_at: parse_timestamp(&v.recorded_at)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let last_confirmed = match key_row.confirmed {
            Some((form, date, accession)) => Some(SourceFiling::new(&form, parse_date(&date)?, &accession)),
            None => None,
        };

        match VersionChain::restore(versions, last_confirmed) {
            Some(chain) => {
                entries.insert(key, chain);
            }
            None => log::warn!("⚠️  {} has no stored versions, skipping", key),
        }
    }

    let mut filing_stmt = conn.prepare(
        "SELECT accession_number, form_type, filing_date, content_hash, mode, ingested_at
         FROM filings WHERE entity_id = ?1 ORDER BY id",
    )?;
    let filing_rows = filing_stmt
        .query_map(params![entity_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let filings = filing_rows
        .into_iter()
        .map(|(accession, form, date, content_hash, mode, ingested_at)| {
            Ok(AppliedFiling {
                filing: SourceFiling::new(&form, parse_date(&date)?, &accession),
                content_hash,
                mode: match mode.as_str() {
                    "anchor" => IngestMode::Anchor,
                    _ => IngestMode::Delta,
                },
                ingested_at: parse_timestamp(&ingested_at)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut annotation_stmt =
        conn.prepare("SELECT detail FROM annotations WHERE entity_id = ?1 ORDER BY id")?;
    let inconsistencies = annotation_stmt
        .query_map(params![entity_id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|detail| {
            serde_json::from_str::<StatementInconsistency>(&detail).context("Failed to parse annotation")
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Some(Timeline::restore(
        entity_id,
        state,
        revision.max(0) as u64,
        entries,
        filings,
        inconsistencies,
        parse_timestamp(&created_at)?,
        parse_timestamp(&updated_at)?,
    )))
}

pub fn load_all_timelines(conn: &Connection) -> Result<Vec<Timeline>> {
    let mut timelines = Vec::new();
    for entity_id in list_entities(conn)? {
        if let Some(timeline) = load_timeline(conn, &entity_id)? {
            timelines.push(timeline);
        }
    }
    Ok(timelines)
}

pub fn list_entities(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT entity_id FROM timelines ORDER BY entity_id")?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(ids)
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT).with_context(|| format!("Invalid date in database: {}", s))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Invalid timestamp in database: {}", s))?
        .with_timezone(&Utc))
}

// ============================================================================
// AUDIT TRAIL
// ============================================================================

/// Store every entry of a change report as an event. Returns events written.
pub fn record_change_report(conn: &Connection, report: &ChangeReport) -> Result<usize> {
    let actor = match report.mode {
        IngestMode::Anchor => "anchor_builder",
        IngestMode::Delta => "delta_applier",
    };

    let tx = conn.unchecked_transaction()?;
    let mut written = 0;

    for change in &report.changes {
        let event = Event::new(
            change.kind.as_str(),
            "fact",
            &report.entity_id,
            serde_json::json!({
                "accession_number": report.filing.accession_number,
                "key": change.key,
                "value": change.value,
                "previous_value": change.previous_value,
                "chain_length": change.chain_length,
            }),
            actor,
        );
        insert_event(&tx, &event)?;
        written += 1;
    }

    for finding in &report.inconsistencies {
        let event = Event::new(
            "StatementInconsistency",
            "fact",
            &report.entity_id,
            serde_json::to_value(finding)?,
            "consistency_check",
        );
        insert_event(&tx, &event)?;
        written += 1;
    }

    for rejected in &report.rejected {
        let event = Event::new(
            "MalformedFact",
            "fact",
            &report.entity_id,
            serde_json::json!({
                "accession_number": report.filing.accession_number,
                "error": rejected,
            }),
            actor,
        );
        insert_event(&tx, &event)?;
        written += 1;
    }

    tx.commit().context("Failed to commit events")?;
    Ok(written)
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity, oldest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY id",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                    .map_err(|_| rusqlite::Error::InvalidQuery)?
                    .with_timezone(&Utc),
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json)
                    .map_err(|_| rusqlite::Error::InvalidQuery)?,
                actor: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

/// Number of stored versions, for one entity or overall
pub fn verify_version_count(conn: &Connection, entity_id: Option<&str>) -> Result<i64> {
    let count: i64 = match entity_id {
        Some(id) => conn.query_row(
            "SELECT COUNT(*) FROM fact_versions v JOIN fact_keys k ON v.key_id = k.id
             WHERE k.entity_id = ?1",
            params![id],
            |row| row.get(0),
        )?,
        None => conn.query_row("SELECT COUNT(*) FROM fact_versions", [], |row| row.get(0))?,
    };

    Ok(count)
}
