use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::errors::{GuildSyncError, GuildSyncResult};
use crate::identity::normalizer::{normalize, PlayerId};
use crate::storage::Database;

/// Persisted association between a chat user and a game account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub row_id: i64,
    pub id: PlayerId,
    pub chat_user_id: u64,
    pub username: String,
    pub linked_at: DateTime<Utc>,
}

type RawLink = (i64, String, String, String, i64);

fn into_link(raw: RawLink) -> GuildSyncResult<Link> {
    let (row_id, uuid, discord_id, username, linked_at) = raw;
    let chat_user_id = discord_id.parse::<u64>().map_err(|e| {
        GuildSyncError::InvalidInput(format!("stored chat user id '{discord_id}': {e}"))
    })?;
    Ok(Link {
        row_id,
        id: normalize(&uuid)?,
        chat_user_id,
        username,
        linked_at: Utc.timestamp_opt(linked_at, 0).single().unwrap_or_default(),
    })
}

fn find_in(conn: &Connection, key: &str) -> GuildSyncResult<Option<Link>> {
    let id_key = normalize(key)
        .map(|id| id.as_str().to_string())
        .unwrap_or_else(|_| key.trim().to_string());
    let raw: Option<RawLink> = conn
        .query_row(
            "SELECT id, uuid, discord_id, discord_username, linked_at FROM discord_link
             WHERE uuid = ?1 OR discord_id = ?2",
            params![id_key, key.trim()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
        )
        .optional()?;
    raw.map(into_link).transpose()
}

/// Bidirectional link table. Uniqueness of both the account identifier and
/// the chat user ID is enforced by the schema.
#[derive(Clone)]
pub struct LinkStore {
    db: Arc<Database>,
}

impl LinkStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// `key` may be an account identifier (either form) or a chat user ID.
    pub fn get_link(&self, key: &str) -> GuildSyncResult<Option<Link>> {
        let conn = self.db.lock_conn();
        find_in(&conn, key)
    }

    pub fn get_by_chat_user(&self, chat_user_id: u64) -> GuildSyncResult<Option<Link>> {
        self.get_link(&chat_user_id.to_string())
    }

    pub fn register_link(
        &self,
        id: &PlayerId,
        chat_user_id: u64,
        username: &str,
    ) -> GuildSyncResult<Link> {
        self.register_link_at(id, chat_user_id, username, Utc::now())
    }

    /// Replaces any existing link for `id`, then inserts the new one. Fails
    /// with `ConstraintViolation` if `chat_user_id` already owns a different
    /// account; in that case the previous link for `id` is left in place.
    pub fn register_link_at(
        &self,
        id: &PlayerId,
        chat_user_id: u64,
        username: &str,
        at: DateTime<Utc>,
    ) -> GuildSyncResult<Link> {
        let link = self.db.with_transaction(|tx| {
            let replaced = tx.execute(
                "DELETE FROM discord_link WHERE uuid = ?1",
                params![id.as_str()],
            )?;
            if replaced > 0 {
                tracing::info!(uuid = %id, "replacing existing link");
            }
            tx.execute(
                "INSERT INTO discord_link (uuid, discord_id, discord_username, linked_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![id.as_str(), chat_user_id.to_string(), username, at.timestamp()],
            )?;
            Ok(Link {
                row_id: tx.last_insert_rowid(),
                id: id.clone(),
                chat_user_id,
                username: username.to_string(),
                linked_at: Utc.timestamp_opt(at.timestamp(), 0).single().unwrap_or_default(),
            })
        })?;
        tracing::info!(uuid = %id, chat_user_id, "link registered");
        Ok(link)
    }

    /// Deletes by row id, account identifier, or both (both must match).
    pub fn remove_link(
        &self,
        row_id: Option<i64>,
        id: Option<&PlayerId>,
    ) -> GuildSyncResult<usize> {
        let conn = self.db.lock_conn();
        let removed = match (row_id, id) {
            (Some(row_id), Some(id)) => conn.execute(
                "DELETE FROM discord_link WHERE id = ?1 AND uuid = ?2",
                params![row_id, id.as_str()],
            )?,
            (Some(row_id), None) => {
                conn.execute("DELETE FROM discord_link WHERE id = ?1", params![row_id])?
            }
            (None, Some(id)) => {
                conn.execute("DELETE FROM discord_link WHERE uuid = ?1", params![id.as_str()])?
            }
            (None, None) => {
                return Err(GuildSyncError::InvalidInput(
                    "remove_link needs a row id or an identifier".into(),
                ))
            }
        };
        tracing::info!(?row_id, removed, "link removed");
        Ok(removed)
    }

    pub fn count(&self) -> GuildSyncResult<i64> {
        let conn = self.db.lock_conn();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM discord_link", [], |row| row.get(0))?;
        Ok(n)
    }
}
