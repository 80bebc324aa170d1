use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rusqlite::params;

use crate::errors::{GuildSyncError, GuildSyncResult};
use crate::identity::normalizer::normalize;
use crate::identity::ResolvedIdentity;
use crate::storage::migrations::IDENTITY_CACHE_DDL;
use crate::storage::Database;

/// TTL cache mapping a name or identifier to a resolved identity.
///
/// Expiry is lazy: a dead entry is deleted by the lookup that finds it.
/// Nothing sweeps the table in the background.
#[derive(Clone)]
pub struct IdentityCache {
    db: Arc<Database>,
    ttl: Duration,
}

impl IdentityCache {
    pub fn new(db: Arc<Database>, ttl_seconds: i64) -> Self {
        Self {
            db,
            ttl: Duration::seconds(ttl_seconds),
        }
    }

    pub fn get(&self, key: &str) -> GuildSyncResult<Option<ResolvedIdentity>> {
        self.get_at(key, Utc::now())
    }

    /// Lookup evaluated at `now`. Ambiguous matches are logged and treated
    /// as a miss.
    pub fn get_at(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> GuildSyncResult<Option<ResolvedIdentity>> {
        let id_key = normalize(key)
            .map(|id| id.as_str().to_string())
            .unwrap_or_else(|_| key.to_string());
        let conn = self.db.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT uuid, name, born FROM identity_cache
             WHERE uuid = ?1 OR name = ?2 COLLATE NOCASE",
        )?;
        let rows = stmt
            .query_map(params![id_key, key.trim()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let (uuid, name, born) = match rows.len() {
            0 => return Ok(None),
            1 => rows.into_iter().next().ok_or_else(|| {
                GuildSyncError::CacheInconsistency("row vanished during lookup".into())
            })?,
            n => {
                let err = GuildSyncError::CacheInconsistency(format!(
                    "{n} cache rows match key '{key}'"
                ));
                tracing::error!(error = %err, "ambiguous identity cache lookup; treating as miss");
                return Ok(None);
            }
        };

        if now.timestamp() - born > self.ttl.num_seconds() {
            conn.execute("DELETE FROM identity_cache WHERE uuid = ?1", params![uuid])?;
            tracing::debug!(uuid = %uuid, "evicted expired identity cache entry");
            return Ok(None);
        }

        Ok(Some(ResolvedIdentity {
            id: normalize(&uuid)?,
            name,
        }))
    }

    pub fn put(&self, id: &str, name: &str) -> GuildSyncResult<()> {
        self.put_at(id, name, Utc::now())
    }

    /// Stores `(id, name)` born at `now`. Any other row claiming the same
    /// name is dropped first, so the name stays unambiguous.
    pub fn put_at(&self, id: &str, name: &str, now: DateTime<Utc>) -> GuildSyncResult<()> {
        if id.trim().is_empty() || name.trim().is_empty() {
            tracing::warn!(id, name, "refusing to cache incomplete identity");
            return Err(GuildSyncError::InvalidCacheEntry(format!(
                "id '{id}' / name '{name}'"
            )));
        }
        let id = normalize(id)?;
        self.db.with_transaction(|tx| {
            tx.execute(
                "DELETE FROM identity_cache WHERE name = ?1 COLLATE NOCASE AND uuid != ?2",
                params![name.trim(), id.as_str()],
            )?;
            tx.execute(
                "INSERT INTO identity_cache (uuid, name, born) VALUES (?1, ?2, ?3)
                 ON CONFLICT(uuid) DO UPDATE SET name = excluded.name, born = excluded.born",
                params![id.as_str(), name.trim(), now.timestamp()],
            )?;
            Ok(())
        })?;
        tracing::debug!(uuid = %id, name, "identity cached");
        Ok(())
    }

    /// Removes every row matching `key`, alive or not.
    pub fn evict(&self, key: &str) -> GuildSyncResult<usize> {
        let id_key = normalize(key)
            .map(|id| id.as_str().to_string())
            .unwrap_or_else(|_| key.to_string());
        let conn = self.db.lock_conn();
        let removed = conn.execute(
            "DELETE FROM identity_cache WHERE uuid = ?1 OR name = ?2 COLLATE NOCASE",
            params![id_key, key.trim()],
        )?;
        Ok(removed)
    }

    /// Drops and recreates the cache table. Without confirmation this only
    /// warns and returns `false`.
    pub fn clear(&self, confirmed: bool) -> GuildSyncResult<bool> {
        if !confirmed {
            tracing::warn!("identity cache clear not confirmed; leaving cache intact");
            return Ok(false);
        }
        let conn = self.db.lock_conn();
        conn.execute_batch("DROP TABLE IF EXISTS identity_cache;")?;
        conn.execute_batch(IDENTITY_CACHE_DDL)?;
        tracing::info!("identity cache cleared");
        Ok(true)
    }
}
