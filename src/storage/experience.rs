use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::errors::{GuildSyncError, GuildSyncResult};
use crate::identity::normalizer::{normalize, PlayerId};
use crate::storage::Database;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Latest observed experience total for one account on one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperienceRecord {
    pub observed_at: DateTime<Utc>,
    pub date: NaiveDate,
    pub id: PlayerId,
    pub amount: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Corrected { previous: i64 },
    Unchanged,
}

impl UpsertOutcome {
    pub fn wrote(&self) -> bool {
        !matches!(self, UpsertOutcome::Unchanged)
    }
}

pub fn parse_date(raw: &str) -> GuildSyncResult<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|e| GuildSyncError::InvalidInput(format!("bad date '{raw}': {e}")))
}

fn timestamp_to_utc(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, String, String, i64)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn into_record(raw: (i64, String, String, i64)) -> GuildSyncResult<ExperienceRecord> {
    let (ts, date, uuid, amount) = raw;
    Ok(ExperienceRecord {
        observed_at: timestamp_to_utc(ts),
        date: parse_date(&date)?,
        id: normalize(&uuid)?,
        amount,
    })
}

/// Looks up the stored amount for `(id, date)` on an open connection or transaction.
pub fn get_in(conn: &Connection, id: &PlayerId, date: NaiveDate) -> GuildSyncResult<Option<i64>> {
    let amount = conn
        .query_row(
            "SELECT amount FROM exp_history WHERE uuid = ?1 AND date = ?2",
            params![id.as_str(), date.format(DATE_FORMAT).to_string()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(amount)
}

/// Insert-or-correct: inserts when absent, rewrites amount and observation
/// time when the stored amount differs, and writes nothing when equal.
pub fn upsert_in(
    conn: &Connection,
    id: &PlayerId,
    date: NaiveDate,
    amount: i64,
    observed_at: DateTime<Utc>,
) -> GuildSyncResult<UpsertOutcome> {
    let date_str = date.format(DATE_FORMAT).to_string();
    match get_in(conn, id, date)? {
        None => {
            conn.execute(
                "INSERT INTO exp_history (timestamp, date, uuid, amount) VALUES (?1, ?2, ?3, ?4)",
                params![observed_at.timestamp(), date_str, id.as_str(), amount],
            )?;
            Ok(UpsertOutcome::Inserted)
        }
        Some(previous) if previous != amount => {
            conn.execute(
                "UPDATE exp_history SET timestamp = ?1, amount = ?2 WHERE uuid = ?3 AND date = ?4",
                params![observed_at.timestamp(), amount, id.as_str(), date_str],
            )?;
            Ok(UpsertOutcome::Corrected { previous })
        }
        Some(_) => Ok(UpsertOutcome::Unchanged),
    }
}

/// Point lookups and single-record writes against the experience time series.
/// Batch writes from a sync run go through [`upsert_in`] inside the run's
/// transaction instead.
#[derive(Clone)]
pub struct ExperienceStore {
    db: Arc<Database>,
}

impl ExperienceStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn upsert(
        &self,
        id: &str,
        date: NaiveDate,
        amount: i64,
        observed_at: DateTime<Utc>,
    ) -> GuildSyncResult<UpsertOutcome> {
        let id = normalize(id)?;
        let conn = self.db.lock_conn();
        upsert_in(&conn, &id, date, amount, observed_at)
    }

    pub fn get(&self, id: &PlayerId, date: NaiveDate) -> GuildSyncResult<Option<i64>> {
        let conn = self.db.lock_conn();
        get_in(&conn, id, date)
    }

    pub fn record(
        &self,
        id: &PlayerId,
        date: NaiveDate,
    ) -> GuildSyncResult<Option<ExperienceRecord>> {
        let conn = self.db.lock_conn();
        let raw = conn
            .query_row(
                "SELECT timestamp, date, uuid, amount FROM exp_history WHERE uuid = ?1 AND date = ?2",
                params![id.as_str(), date.format(DATE_FORMAT).to_string()],
                row_to_record,
            )
            .optional()?;
        raw.map(into_record).transpose()
    }

    /// Per-day records in `[from, to]`, oldest first.
    pub fn range(
        &self,
        id: &PlayerId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> GuildSyncResult<Vec<ExperienceRecord>> {
        let conn = self.db.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT timestamp, date, uuid, amount FROM exp_history
             WHERE uuid = ?1 AND date >= ?2 AND date <= ?3
             ORDER BY date ASC",
        )?;
        let rows = stmt.query_map(
            params![
                id.as_str(),
                from.format(DATE_FORMAT).to_string(),
                to.format(DATE_FORMAT).to_string()
            ],
            row_to_record,
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(into_record(row?)?);
        }
        Ok(out)
    }

    pub fn total(&self, id: &PlayerId, from: NaiveDate, to: NaiveDate) -> GuildSyncResult<i64> {
        let conn = self.db.lock_conn();
        let total: i64 = conn.query_row(
            "SELECT COALESCE(SUM(amount), 0) FROM exp_history
             WHERE uuid = ?1 AND date >= ?2 AND date <= ?3",
            params![
                id.as_str(),
                from.format(DATE_FORMAT).to_string(),
                to.format(DATE_FORMAT).to_string()
            ],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    pub fn count(&self) -> GuildSyncResult<i64> {
        let conn = self.db.lock_conn();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM exp_history", [], |row| row.get(0))?;
        Ok(n)
    }
}
