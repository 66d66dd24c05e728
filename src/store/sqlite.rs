use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::time::Duration;

use crate::error::Result;
use crate::models::{EntryKey, ReviewEntry, Stage};
use crate::store::EntryStore;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const ENTRY_COLUMNS: &str = "user_id, sheet_group, item_id, stage, stage_entered_at, \
                             confirmed, review_count, created_at, version";

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        // WAL lets concurrent passes from other connections read while one writes
        let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        tracing::debug!(journal_mode = %mode, "opened sqlite store");
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS review_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                sheet_group TEXT NOT NULL,
                item_id TEXT NOT NULL,
                stage TEXT NOT NULL DEFAULT 'today' CHECK(stage IN ('today', 'tomorrow', 'day3', 'week1', 'week2', 'month1', 'completed')),
                stage_entered_at TEXT NOT NULL,
                confirmed INTEGER NOT NULL DEFAULT 0,
                review_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 0,
                UNIQUE (user_id, sheet_group, item_id)
            );

            CREATE INDEX IF NOT EXISTS idx_entries_scope ON review_entries(user_id, sheet_group, stage);
            "#,
        )?;
        Ok(())
    }

    fn query_entries(&self, sql: &str, user_id: &str, sheet_group: &str) -> Result<Vec<ReviewEntry>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params![user_id, sheet_group], entry_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<ReviewEntry> {
    let stage_str: String = row.get(3)?;
    let stage = Stage::from_str(&stage_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            Type::Text,
            format!("unknown stage '{}'", stage_str).into(),
        )
    })?;

    Ok(ReviewEntry {
        key: EntryKey {
            user_id: row.get(0)?,
            sheet_group: row.get(1)?,
            item_id: row.get(2)?,
        },
        stage,
        stage_entered_at: parse_time(row, 4)?,
        confirmed: row.get(5)?,
        review_count: row.get(6)?,
        created_at: parse_time(row, 7)?,
        version: row.get(8)?,
    })
}

// Fixed-width UTC text so lexical order matches time order
fn format_time(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

impl EntryStore for SqliteStore {
    fn insert_if_absent(&self, entry: &ReviewEntry) -> Result<(ReviewEntry, bool)> {
        let inserted = self.conn.execute(
            r#"
            INSERT OR IGNORE INTO review_entries
                (user_id, sheet_group, item_id, stage, stage_entered_at, confirmed, review_count, created_at, version)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                entry.key.user_id,
                entry.key.sheet_group,
                entry.key.item_id,
                entry.stage.as_str(),
                format_time(&entry.stage_entered_at),
                entry.confirmed,
                entry.review_count,
                format_time(&entry.created_at),
                entry.version,
            ],
        )?;

        match self.get(&entry.key)? {
            Some(stored) => Ok((stored, inserted > 0)),
            // Removed between the insert and the read; report what we wrote
            None => Ok((entry.clone(), inserted > 0)),
        }
    }

    fn get(&self, key: &EntryKey) -> Result<Option<ReviewEntry>> {
        let sql = format!(
            "SELECT {} FROM review_entries WHERE user_id = ?1 AND sheet_group = ?2 AND item_id = ?3",
            ENTRY_COLUMNS
        );
        let entry = self.conn.query_row(
            &sql,
            params![key.user_id, key.sheet_group, key.item_id],
            entry_from_row,
        );

        match entry {
            Ok(e) => Ok(Some(e)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, user_id: &str, sheet_group: &str) -> Result<Vec<ReviewEntry>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM review_entries
            WHERE user_id = ?1 AND sheet_group = ?2
            ORDER BY stage_entered_at ASC, item_id ASC
            "#,
            ENTRY_COLUMNS
        );
        self.query_entries(&sql, user_id, sheet_group)
    }

    fn list_pending(&self, user_id: &str, sheet_group: &str) -> Result<Vec<ReviewEntry>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM review_entries
            WHERE user_id = ?1 AND sheet_group = ?2 AND stage != 'completed'
            ORDER BY stage_entered_at ASC, item_id ASC
            "#,
            ENTRY_COLUMNS
        );
        self.query_entries(&sql, user_id, sheet_group)
    }

    fn set_confirmed(&self, key: &EntryKey, confirmed: bool) -> Result<Option<ReviewEntry>> {
        let sql = format!(
            r#"
            UPDATE review_entries
            SET confirmed = ?1, version = version + 1
            WHERE user_id = ?2 AND sheet_group = ?3 AND item_id = ?4
            RETURNING {}
            "#,
            ENTRY_COLUMNS
        );
        let entry = self.conn.query_row(
            &sql,
            params![confirmed, key.user_id, key.sheet_group, key.item_id],
            entry_from_row,
        );

        match entry {
            Ok(e) => Ok(Some(e)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn update_if_version(&self, entry: &ReviewEntry, expected_version: i64) -> Result<bool> {
        let rows = self.conn.execute(
            r#"
            UPDATE review_entries
            SET stage = ?1,
                stage_entered_at = ?2,
                confirmed = ?3,
                review_count = ?4,
                version = ?5 + 1
            WHERE user_id = ?6 AND sheet_group = ?7 AND item_id = ?8 AND version = ?5
            "#,
            params![
                entry.stage.as_str(),
                format_time(&entry.stage_entered_at),
                entry.confirmed,
                entry.review_count,
                expected_version,
                entry.key.user_id,
                entry.key.sheet_group,
                entry.key.item_id,
            ],
        )?;
        Ok(rows == 1)
    }

    fn remove(&self, key: &EntryKey) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM review_entries WHERE user_id = ?1 AND sheet_group = ?2 AND item_id = ?3",
            params![key.user_id, key.sheet_group, key.item_id],
        )?;
        Ok(rows > 0)
    }

    fn sheet_groups(&self, user_id: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT sheet_group FROM review_entries WHERE user_id = ?1 ORDER BY sheet_group",
        )?;
        let rows = stmt.query_map(params![user_id], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
    }
}
