pub mod experience;
pub mod migrations;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, Transaction};

use crate::errors::{GuildSyncError, GuildSyncResult};

/// Shared SQLite handle for the experience, link and cache tables.
///
/// All access goes through one connection guarded by a mutex, so a sync
/// transaction is never observed half-written by command-time reads.
pub struct Database {
    conn: Mutex<Connection>,
}

/// Runs blocking database work off the async executor. The closure owns the
/// store handle it needs.
pub async fn run_blocking<T, F>(f: F) -> GuildSyncResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> GuildSyncResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| GuildSyncError::Sync(format!("DB task join error: {e}")))?
}

impl Database {
    pub fn open(path: &Path) -> GuildSyncResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let db = Self::from_connection(conn)?;
        tracing::info!(path = %path.display(), "database opened");
        Ok(db)
    }

    pub fn open_in_memory() -> GuildSyncResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> GuildSyncResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        migrations::apply_schema_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Runs `f` inside one transaction: committed on `Ok`, rolled back on
    /// `Err` or unwind.
    pub fn with_transaction<T, F>(&self, f: F) -> GuildSyncResult<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> GuildSyncResult<T>,
    {
        let mut conn = self.lock_conn();
        let mut tx = conn.transaction()?;
        let value = f(&mut tx)?;
        tx.commit()?;
        Ok(value)
    }
}
