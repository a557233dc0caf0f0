//! Call History Database
//!
//! SQLite-Datenbank für die lokale Call History. Dient als
//! Standard-Backend des Recorders; die Plattform kann stattdessen
//! ein eigenes `HistoryBackend` anschließen.

use super::outcome::{CallDirection, CallOutcome, OutcomeStatus};
use super::recorder::{HistoryBackend, HistoryError};
use crate::session::CallKind;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, Result as SqliteResult};
use std::path::Path;

// ============================================================================
// DATABASE
// ============================================================================

/// SQLite-Datenbank für Call-Outcome-Records (Thread-safe durch Mutex)
pub struct HistoryDatabase {
    conn: Mutex<Connection>,
}

impl HistoryDatabase {
    /// Öffnet oder erstellt die Datenbank unter dem gegebenen Pfad
    pub fn open(db_path: &Path) -> Result<Self, HistoryError> {
        // Parent-Verzeichnis erstellen
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!("Opening history database at {:?}", db_path);

        let conn = Connection::open(db_path)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;

        Ok(db)
    }

    /// In-Memory Datenbank für Tests
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, HistoryError> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Initialisiert das Datenbank-Schema
    fn init_schema(&self) -> Result<(), HistoryError> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS call_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                caller_id TEXT NOT NULL,
                receiver_id TEXT NOT NULL,
                call_kind TEXT NOT NULL,
                direction TEXT NOT NULL,
                status TEXT NOT NULL,
                duration_secs INTEGER NOT NULL DEFAULT 0,
                started_at TEXT NOT NULL,
                ended_at TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
            [],
        )?;

        // Indizes für die History-Ansicht pro Benutzer
        conn.execute(
            r#"
            CREATE INDEX IF NOT EXISTS idx_history_caller ON call_history(caller_id)
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE INDEX IF NOT EXISTS idx_history_receiver ON call_history(receiver_id)
            "#,
            [],
        )?;

        Ok(())
    }

    /// Schreibt einen Outcome-Record
    pub fn insert_outcome(&self, outcome: &CallOutcome) -> Result<(), HistoryError> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO call_history
                (caller_id, receiver_id, call_kind, direction, status,
                 duration_secs, started_at, ended_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                outcome.caller_id,
                outcome.receiver_id,
                kind_str(outcome.kind),
                direction_str(outcome.direction),
                status_str(outcome.status),
                outcome.duration_secs,
                outcome.started_at.to_rfc3339(),
                outcome.ended_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Holt die letzten Records eines Benutzers (neueste zuerst)
    pub fn history_for_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<CallOutcome>, HistoryError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT caller_id, receiver_id, call_kind, direction, status,
                   duration_secs, started_at, ended_at
            FROM call_history
            WHERE (direction = 'outgoing' AND caller_id = ?1)
               OR (direction = 'incoming' AND receiver_id = ?1)
            ORDER BY ended_at DESC
            LIMIT ?2
            "#,
        )?;

        let outcomes = stmt
            .query_map(params![user_id, limit as i64], |row| {
                Ok(CallOutcome {
                    caller_id: row.get(0)?,
                    receiver_id: row.get(1)?,
                    kind: parse_kind(&row.get::<_, String>(2)?),
                    direction: parse_direction(&row.get::<_, String>(3)?),
                    status: parse_status(&row.get::<_, String>(4)?),
                    duration_secs: row.get(5)?,
                    started_at: parse_timestamp(&row.get::<_, String>(6)?),
                    ended_at: parse_timestamp(&row.get::<_, String>(7)?),
                })
            })?
            .collect::<SqliteResult<Vec<CallOutcome>>>()?;

        Ok(outcomes)
    }

    /// Anzahl aller Records (für Tests)
    pub fn count(&self) -> Result<i64, HistoryError> {
        let conn = self.conn.lock();
        let count = conn.query_row("SELECT COUNT(*) FROM call_history", [], |row| row.get(0))?;
        Ok(count)
    }
}

impl HistoryBackend for HistoryDatabase {
    fn record(&self, outcome: &CallOutcome) -> Result<(), HistoryError> {
        self.insert_outcome(outcome)
    }
}

// ============================================================================
// COLUMN MAPPING
// ============================================================================

fn kind_str(kind: CallKind) -> &'static str {
    match kind {
        CallKind::Audio => "audio",
        CallKind::Video => "video",
    }
}

fn parse_kind(value: &str) -> CallKind {
    match value {
        "video" => CallKind::Video,
        _ => CallKind::Audio,
    }
}

fn direction_str(direction: CallDirection) -> &'static str {
    match direction {
        CallDirection::Incoming => "incoming",
        CallDirection::Outgoing => "outgoing",
    }
}

fn parse_direction(value: &str) -> CallDirection {
    match value {
        "incoming" => CallDirection::Incoming,
        _ => CallDirection::Outgoing,
    }
}

fn status_str(status: OutcomeStatus) -> &'static str {
    match status {
        OutcomeStatus::Completed => "completed",
        OutcomeStatus::Missed => "missed",
        OutcomeStatus::Rejected => "rejected",
    }
}

fn parse_status(value: &str) -> OutcomeStatus {
    match value {
        "completed" => OutcomeStatus::Completed,
        "rejected" => OutcomeStatus::Rejected,
        _ => OutcomeStatus::Missed,
    }
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// TESTS
// ============================================================================
