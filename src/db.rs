// 🗃️ SQLite store - schema, CSV ingest, batch writes, audit events
//
// One SQLite transaction per batch write: a failed batch leaves no partial
// match or reason updates behind.

use crate::corpus::{CanonicalAddressRecord, CanonicalKeyUpdate};
use crate::error::Result;
use crate::matching::{MatchType, MatchUpdate, TransactionMatchState};
use crate::normalizer::collapse_upper;
use crate::phonetic::PhoneticKeys;
use crate::store::{MatchStore, ParseUpdate, PendingTransaction};
use crate::waterfall::RunReport;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

// ============================================================================
// CSV ROWS
// ============================================================================

/// Row of the canonical addresses CSV
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CanonicalAddressRow {
    #[serde(default)]
    pub address_id: Option<i64>,
    pub address: String,
}

/// Row of the transactions CSV (unknown columns are ignored)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransactionRow {
    pub id: i64,
    #[serde(default)]
    pub address_line_1: Option<String>,
    #[serde(default)]
    pub address_line_2: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub zip_code: Option<String>,
}

impl TransactionRow {
    /// Line 1 and line 2 joined by a space, blanks dropped
    pub fn raw_address(&self) -> String {
        [&self.address_line_1, &self.address_line_2]
            .iter()
            .filter_map(|line| line.as_deref())
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestCounts {
    pub inserted: usize,
    pub duplicates: usize,
}

pub fn load_canonical_csv(csv_path: &Path) -> Result<Vec<CanonicalAddressRow>> {
    let mut rdr = csv::Reader::from_path(csv_path)?;
    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        rows.push(result?);
    }
    Ok(rows)
}

pub fn load_transactions_csv(csv_path: &Path) -> Result<Vec<TransactionRow>> {
    let mut rdr = csv::Reader::from_path(csv_path)?;
    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        rows.push(result?);
    }
    Ok(rows)
}

// ============================================================================
// AUDIT EVENTS
// ============================================================================

/// Entry in the audit trail
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

pub fn get_events_by_type(conn: &Connection, event_type: &str) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE event_type = ?1
         ORDER BY id DESC",
    )?;

    let events = stmt
        .query_map(params![event_type], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e)))?
                    .with_timezone(&Utc),
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json)
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e)))?,
                actor: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(events)
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS canonical_addresses (
            address_id INTEGER PRIMARY KEY,
            address TEXT NOT NULL,
            blocking_prefix TEXT,
            metaphone_key TEXT,
            soundex_key TEXT,
            nysiis_key TEXT,
            key_fingerprint TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY,
            raw_address TEXT NOT NULL,
            city TEXT,
            state TEXT,
            zip_code TEXT,
            parsed INTEGER NOT NULL DEFAULT 0,
            street_number TEXT,
            pre_directional TEXT,
            street_name TEXT,
            street_type TEXT,
            unit TEXT,
            parse_strategy TEXT,
            normalized_address TEXT,
            matched_address_id INTEGER,
            match_type TEXT,
            confidence_score REAL,
            unmatch_reason TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_canonical_address ON canonical_addresses(address)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tx_unmatched ON transactions(matched_address_id, id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_type ON events(event_type)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// SQLITE STORE
// ============================================================================

pub struct SqliteStore {
    conn: Connection,
}

/// Audit event written after every completed match run
const RUN_EVENT: &str = "match_run_completed";

const TX_COLUMNS: &str = "id, raw_address, normalized_address, matched_address_id, match_type, confidence_score, unmatch_reason";

const CANONICAL_COLUMNS: &str =
    "address_id, address, blocking_prefix, metaphone_key, soundex_key, nysiis_key, key_fingerprint";

fn row_to_state(row: &Row<'_>) -> rusqlite::Result<TransactionMatchState> {
    let match_type: Option<String> = row.get(4)?;
    Ok(TransactionMatchState {
        transaction_id: row.get(0)?,
        raw_address: row.get(1)?,
        normalized_address: row.get(2)?,
        matched_address_id: row.get(3)?,
        match_type: match_type.as_deref().and_then(MatchType::parse),
        confidence_score: row.get(5)?,
        unmatch_reason: row.get(6)?,
    })
}

fn row_to_canonical(row: &Row<'_>) -> rusqlite::Result<CanonicalAddressRecord> {
    let metaphone: Option<String> = row.get(3)?;
    let soundex: Option<String> = row.get(4)?;
    let nysiis: Option<String> = row.get(5)?;

    let keys = match (metaphone, soundex, nysiis) {
        (Some(metaphone), Some(soundex), Some(nysiis)) => Some(PhoneticKeys {
            metaphone,
            soundex,
            nysiis,
        }),
        _ => None,
    };

    Ok(CanonicalAddressRecord {
        address_id: row.get(0)?,
        address: row.get(1)?,
        blocking_prefix: row.get(2)?,
        keys,
        key_fingerprint: row.get(6)?,
    })
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        setup_database(&conn)?;
        Ok(SqliteStore { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        setup_database(&conn)?;
        Ok(SqliteStore { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Insert canonical addresses; rows without an id get the next free one
    pub fn insert_canonical(&mut self, rows: &[CanonicalAddressRow]) -> Result<IngestCounts> {
        let mut counts = IngestCounts::default();
        let tx = self.conn.transaction()?;
        {
            let max_id: Option<i64> =
                tx.query_row("SELECT MAX(address_id) FROM canonical_addresses", [], |row| row.get(0))?;
            let mut next_id = max_id.map_or(1, |id| id.saturating_add(1));
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO canonical_addresses (address_id, address) VALUES (?1, ?2)",
            )?;

            for row in rows {
                let address_id = match row.address_id {
                    Some(id) => id,
                    None => next_id,
                };
                next_id = next_id.max(address_id.saturating_add(1));

                if stmt.execute(params![address_id, collapse_upper(&row.address)])? == 1 {
                    counts.inserted += 1;
                } else {
                    counts.duplicates += 1;
                }
            }

            insert_event(
                &tx,
                &Event::new(
                    "canonical_ingested",
                    "canonical_addresses",
                    "csv",
                    serde_json::json!({"inserted": counts.inserted, "duplicates": counts.duplicates}),
                    "csv_importer",
                ),
            )?;
        }
        tx.commit()?;

        info!(inserted = counts.inserted, duplicates = counts.duplicates, "canonical addresses ingested");
        Ok(counts)
    }

    /// Insert transactions; ids already present are skipped
    pub fn insert_transactions(&mut self, rows: &[TransactionRow]) -> Result<IngestCounts> {
        let mut counts = IngestCounts::default();
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO transactions (id, raw_address, city, state, zip_code)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;

            for row in rows {
                let inserted = stmt.execute(params![row.id, row.raw_address(), row.city, row.state, row.zip_code])?;
                if inserted == 1 {
                    counts.inserted += 1;
                } else {
                    counts.duplicates += 1;
                }
            }

            insert_event(
                &tx,
                &Event::new(
                    "transactions_ingested",
                    "transactions",
                    "csv",
                    serde_json::json!({"inserted": counts.inserted, "duplicates": counts.duplicates}),
                    "csv_importer",
                ),
            )?;
        }
        tx.commit()?;

        info!(inserted = counts.inserted, duplicates = counts.duplicates, "transactions ingested");
        Ok(counts)
    }

    pub fn transaction(&self, transaction_id: i64) -> Result<Option<TransactionMatchState>> {
        let sql = format!("SELECT {TX_COLUMNS} FROM transactions WHERE id = ?1");
        Ok(self.conn.query_row(&sql, params![transaction_id], row_to_state).optional()?)
    }

    pub fn count_transactions(&self) -> Result<i64> {
        Ok(self.conn.query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?)
    }

    pub fn count_canonical(&self) -> Result<i64> {
        Ok(self.conn.query_row("SELECT COUNT(*) FROM canonical_addresses", [], |row| row.get(0))?)
    }

    /// Most recent match runs from the audit trail, newest first
    pub fn recent_runs(&self, limit: usize) -> Result<Vec<RunReport>> {
        let mut runs = Vec::new();
        for event in get_events_by_type(&self.conn, RUN_EVENT)?.into_iter().take(limit) {
            runs.push(serde_json::from_value(event.data)?);
        }
        Ok(runs)
    }
}

impl MatchStore for SqliteStore {
    fn load_canonical(&self) -> Result<Vec<CanonicalAddressRecord>> {
        let sql = format!("SELECT {CANONICAL_COLUMNS} FROM canonical_addresses ORDER BY address_id");
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map([], row_to_canonical)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn canonical_page(&self, after_id: i64, limit: usize) -> Result<Vec<CanonicalAddressRecord>> {
        let sql = format!(
            "SELECT {CANONICAL_COLUMNS} FROM canonical_addresses
             WHERE address_id > ?1 ORDER BY address_id LIMIT ?2"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map(params![after_id, limit as i64], row_to_canonical)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn upsert_canonical_keys(&mut self, updates: &[CanonicalKeyUpdate]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "UPDATE canonical_addresses
                 SET blocking_prefix = ?2, metaphone_key = ?3, soundex_key = ?4,
                     nysiis_key = ?5, key_fingerprint = ?6
                 WHERE address_id = ?1",
            )?;
            for update in updates {
                stmt.execute(params![
                    update.address_id,
                    update.blocking_prefix,
                    update.keys.metaphone,
                    update.keys.soundex,
                    update.keys.nysiis,
                    update.key_fingerprint,
                ])?;
            }
        }
        tx.commit()?;

        debug!(count = updates.len(), "canonical keys upserted");
        Ok(updates.len())
    }

    fn select_unparsed(&self, after_id: i64, limit: usize) -> Result<Vec<PendingTransaction>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, raw_address FROM transactions
             WHERE parsed = 0 AND id > ?1 ORDER BY id LIMIT ?2",
        )?;
        let pending = stmt
            .query_map(params![after_id, limit as i64], |row| {
                Ok(PendingTransaction {
                    transaction_id: row.get(0)?,
                    raw_address: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(pending)
    }

    fn apply_parse_results(&mut self, updates: &[ParseUpdate]) -> Result<usize> {
        let mut applied = 0;
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "UPDATE transactions
                 SET parsed = 1, street_number = ?2, pre_directional = ?3, street_name = ?4,
                     street_type = ?5, unit = ?6, parse_strategy = ?7, normalized_address = ?8,
                     unmatch_reason = CASE WHEN matched_address_id IS NULL
                                      THEN COALESCE(?9, unmatch_reason) ELSE unmatch_reason END,
                     match_type = CASE WHEN matched_address_id IS NULL AND ?9 IS NOT NULL
                                  THEN 'unmatched' ELSE match_type END
                 WHERE id = ?1",
            )?;
            for update in updates {
                let p = update.parsed.as_ref();
                applied += stmt.execute(params![
                    update.transaction_id,
                    p.map(|p| &p.street_number),
                    p.map(|p| &p.pre_directional),
                    p.map(|p| &p.street_name),
                    p.map(|p| &p.street_type),
                    p.map(|p| &p.unit),
                    update.strategy.as_ref().map(|s| s.as_str()),
                    update.normalized_address(),
                    update.unmatch_reason,
                ])?;
            }
        }
        tx.commit()?;
        Ok(applied)
    }

    fn reset_stage_reasons(&mut self) -> Result<usize> {
        let reset = self.conn.execute(
            "UPDATE transactions SET unmatch_reason = NULL, match_type = NULL
             WHERE matched_address_id IS NULL
               AND normalized_address IS NOT NULL AND normalized_address != ''
               AND (unmatch_reason IS NOT NULL OR match_type IS NOT NULL)",
            [],
        )?;
        Ok(reset)
    }

    fn select_unmatched(&self, after_id: i64, limit: usize) -> Result<Vec<TransactionMatchState>> {
        let sql = format!(
            "SELECT {TX_COLUMNS} FROM transactions
             WHERE matched_address_id IS NULL
               AND normalized_address IS NOT NULL AND normalized_address != ''
               AND id > ?1
             ORDER BY id LIMIT ?2"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let states = stmt
            .query_map(params![after_id, limit as i64], row_to_state)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(states)
    }

    fn apply_match_updates(&mut self, updates: &[MatchUpdate]) -> Result<usize> {
        let mut applied = 0;
        let tx = self.conn.transaction()?;
        {
            let mut matched = tx.prepare(
                "UPDATE transactions
                 SET matched_address_id = ?2, match_type = ?3, confidence_score = ?4, unmatch_reason = NULL
                 WHERE id = ?1 AND matched_address_id IS NULL",
            )?;
            let mut unmatched = tx.prepare(
                "UPDATE transactions
                 SET match_type = 'unmatched', confidence_score = NULL, unmatch_reason = ?2
                 WHERE id = ?1 AND matched_address_id IS NULL",
            )?;

            for update in updates {
                applied += match update {
                    MatchUpdate::Matched {
                        transaction_id,
                        address_id,
                        match_type,
                        confidence,
                    } => matched.execute(params![transaction_id, address_id, match_type.as_str(), confidence])?,
                    MatchUpdate::Unmatched { transaction_id, reason } => {
                        unmatched.execute(params![transaction_id, reason])?
                    }
                };
            }
        }
        tx.commit()?;
        Ok(applied)
    }

    fn finalize_unmatched(&mut self, reason: &str) -> Result<usize> {
        let stamped = self.conn.execute(
            "UPDATE transactions SET unmatch_reason = ?1, match_type = 'unmatched'
             WHERE matched_address_id IS NULL AND unmatch_reason IS NULL",
            params![reason],
        )?;
        Ok(stamped)
    }

    fn all_transactions(&self) -> Result<Vec<TransactionMatchState>> {
        let sql = format!("SELECT {TX_COLUMNS} FROM transactions ORDER BY id");
        let mut stmt = self.conn.prepare(&sql)?;
        let states = stmt
            .query_map([], row_to_state)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(states)
    }

    fn record_run(&mut self, report: &RunReport) -> Result<()> {
        let event = Event::new(
            RUN_EVENT,
            "match_run",
            &report.run_id,
            serde_json::to_value(report)?,
            "waterfall",
        );
        insert_event(&self.conn, &event)
    }
}
