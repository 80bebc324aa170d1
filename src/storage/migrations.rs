use rusqlite::{params, Connection, OptionalExtension};

use crate::errors::GuildSyncResult;

pub const SCHEMA_VERSION_CURRENT: i64 = 3;

struct Migration {
    version: i64,
    note: &'static str,
    sql: &'static str,
}

/// Ordered; every statement is idempotent so a partially-applied step can rerun.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        note: "experience history",
        sql: "CREATE TABLE IF NOT EXISTS exp_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                date TEXT NOT NULL,
                uuid TEXT NOT NULL,
                amount INTEGER NOT NULL,
                UNIQUE(uuid, date)
            );
            CREATE INDEX IF NOT EXISTS idx_exp_history_date ON exp_history(date);",
    },
    Migration {
        version: 2,
        note: "discord links",
        sql: "CREATE TABLE IF NOT EXISTS discord_link (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid TEXT NOT NULL UNIQUE,
                discord_id TEXT NOT NULL UNIQUE,
                discord_username TEXT NOT NULL,
                linked_at INTEGER NOT NULL
            );",
    },
    Migration {
        version: 3,
        note: "identity cache",
        sql: IDENTITY_CACHE_DDL,
    },
];

pub(crate) const IDENTITY_CACHE_DDL: &str = "CREATE TABLE IF NOT EXISTS identity_cache (
        uuid TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        born INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_identity_cache_name ON identity_cache(name COLLATE NOCASE);";

pub fn get_schema_version(conn: &Connection) -> GuildSyncResult<i64> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS db_meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
        [],
    )?;
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM db_meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(raw.and_then(|s| s.parse::<i64>().ok()).unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i64, note: &str) -> GuildSyncResult<()> {
    conn.execute(
        "INSERT INTO db_meta(key, value) VALUES('schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![version.to_string()],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL,
            note TEXT
        )",
        [],
    )?;
    conn.execute(
        "INSERT OR REPLACE INTO schema_migrations(version, applied_at, note)
         VALUES(?1, ?2, ?3)",
        params![version, chrono::Utc::now().to_rfc3339(), note],
    )?;
    Ok(())
}

pub fn apply_schema_migrations(conn: &Connection) -> GuildSyncResult<()> {
    let version = get_schema_version(conn)?;
    for migration in MIGRATIONS.iter().filter(|m| m.version > version) {
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.sql)?;
        set_schema_version(&tx, migration.version, migration.note)?;
        tx.commit()?;
        tracing::info!(
            version = migration.version,
            note = migration.note,
            "schema migration applied"
        );
    }
    Ok(())
}
