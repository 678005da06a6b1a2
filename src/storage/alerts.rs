//! Idempotent persistence and ordered reads for [`AlertRecord`]s.
//!
//! `upsert` does a point lookup first and only then inserts. Two concurrent
//! callers can both pass the lookup; the `alerts.id` primary key together with
//! `ON CONFLICT(id) DO NOTHING` decides the winner, and the loser reports
//! [`UpsertOutcome::Skipped`]. Records are never updated or deleted here.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::{Pool, StoreError};
use crate::model::{AlertRecord, UpsertOutcome};

/// Cloneable handle over the shared connection pool.
#[derive(Clone)]
pub struct AlertStore {
    pool: Pool,
}

impl AlertStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn exists(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.pool.get()?;
        exists_on(&conn, id)
    }

    /// Insert `record` unless its id is already stored. First writer wins.
    pub fn upsert(&self, record: &AlertRecord) -> Result<UpsertOutcome, StoreError> {
        let conn = self.pool.get()?;

        if exists_on(&conn, &record.id)? {
            debug!(id = %record.id, "alert already stored, skipping");
            return Ok(UpsertOutcome::Skipped);
        }

        let changed = conn.execute(
            "INSERT INTO alerts (id, event, source_ip, severity, timestamp, timestamp_us)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO NOTHING",
            params![
                record.id,
                record.event,
                record.source_ip,
                record.severity,
                record.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true),
                record.timestamp.timestamp_micros(),
            ],
        )?;

        if changed == 0 {
            // Lost the race against a concurrent insert of the same id.
            debug!(id = %record.id, "concurrent insert won, skipping");
            return Ok(UpsertOutcome::Skipped);
        }
        Ok(UpsertOutcome::Inserted)
    }

    /// Stored alerts, newest `timestamp` first. Equal timestamps list the most
    /// recently inserted first.
    pub fn list(&self, limit: Option<usize>) -> Result<Vec<AlertRecord>, StoreError> {
        let conn = self.pool.get()?;
        // SQLite treats a negative LIMIT as unbounded.
        let limit = limit.map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX));

        let mut stmt = conn.prepare(
            "SELECT id, event, source_ip, severity, timestamp, timestamp_us FROM alerts
             ORDER BY timestamp_us DESC, rowid DESC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map([limit], |row| {
            let raw_ts: String = row.get(4)?;
            let micros: i64 = row.get(5)?;
            let timestamp = row_timestamp(micros, &raw_ts).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    5,
                    Type::Integer,
                    format!("unrepresentable timestamp {raw_ts} ({micros} us)").into(),
                )
            })?;
            Ok(AlertRecord {
                id: row.get(0)?,
                event: row.get(1)?,
                source_ip: row.get(2)?,
                severity: row.get(3)?,
                timestamp,
            })
        })?;

        let mut records = Vec::new();
        for r in rows {
            records.push(r?);
        }
        Ok(records)
    }

    pub fn count(&self) -> Result<u64, StoreError> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM alerts", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}

/// The integer column is authoritative; the text column is only consulted if
/// the integer is out of chrono's range.
fn row_timestamp(micros: i64, raw: &str) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros).or_else(|| {
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    })
}

fn exists_on(conn: &Connection, id: &str) -> Result<bool, StoreError> {
    let found = conn
        .query_row("SELECT 1 FROM alerts WHERE id = ?1", [id], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}
