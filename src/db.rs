use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

use crate::config::SqliteConfig;
use crate::SCHEMA_VERSION;

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Tables cleared on a destructive rebuild, children first.
const INDEXED_TABLES: &[&str] = &[
    "message_fts",
    "tool_calls",
    "messages",
    "sessions",
    "projects",
    "indexed_files",
];

/// Open or create the index database with default PRAGMA settings.
pub fn open(path: &Path) -> Result<Connection> {
    open_with_config(path, &SqliteConfig::default())
}

/// Open or create the index database with configurable PRAGMA settings.
///
/// The schema DDL is applied idempotently; fresh databases are stamped with
/// the current schema version. Version *mismatch* handling is the writer's
/// job; see [`ensure_schema_version`].
pub fn open_with_config(path: &Path, sqlite_config: &SqliteConfig) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    let conn = Connection::open(path)
        .with_context(|| format!("failed to open database at {}", path.display()))?;

    // cache_size in KB (negative = KB in SQLite convention)
    let cache_size_kb = sqlite_config.cache_size_mb as i64 * 1000;
    let mmap_size = sqlite_config.mmap_size_mb as i64 * 1_048_576;

    let pragmas = format!(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA cache_size = -{cache_size_kb};
         PRAGMA mmap_size = {mmap_size};"
    );

    conn.execute_batch(&pragmas)
        .context("failed to set database PRAGMAs")?;

    conn.execute_batch(SCHEMA_SQL)
        .context("failed to apply index schema")?;

    if stored_schema_version(&conn)?.is_none() {
        set_schema_version(&conn, SCHEMA_VERSION)?;
    }

    Ok(conn)
}

/// Returns the default database path: ~/.hindsight/hindsight.db
pub fn default_db_path() -> PathBuf {
    crate::config::user_data_dir().join("hindsight.db")
}

/// The bookmark database lives beside the index database.
pub fn bookmarks_db_path(index_db_path: &Path) -> PathBuf {
    let mut name = index_db_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "hindsight.db".to_string());
    name.push_str(".bookmarks");
    index_db_path.with_file_name(name)
}

/// Compare the stored schema version against the compiled one and, on
/// mismatch, destructively clear every indexed table and restamp.
///
/// Returns true when a rebuild happened. Only the indexer calls this; the
/// index is a cache, so losing it costs one re-index.
pub fn ensure_schema_version(conn: &Connection) -> Result<bool> {
    let stored = stored_schema_version(conn)?;
    if stored == Some(SCHEMA_VERSION) {
        return Ok(false);
    }

    tracing::warn!(
        "schema version {} != {SCHEMA_VERSION}, clearing indexed data",
        stored.map(|v| v.to_string()).unwrap_or_else(|| "<unset>".to_string()),
    );
    clear_indexed_tables(conn)?;
    Ok(true)
}

/// Delete all rows from every indexed table and restamp the schema version,
/// in one transaction.
pub fn clear_indexed_tables(conn: &Connection) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    for table in INDEXED_TABLES {
        tx.execute(&format!("DELETE FROM {table}"), [])
            .with_context(|| format!("failed to clear table {table}"))?;
    }
    tx.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?1)",
        [SCHEMA_VERSION.to_string()],
    )?;
    tx.commit().context("failed to commit index clear")?;
    Ok(())
}

pub fn stored_schema_version(conn: &Connection) -> Result<Option<i64>> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;
    Ok(value.and_then(|v| v.parse().ok()))
}

fn set_schema_version(conn: &Connection, version: i64) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?1)",
        [version.to_string()],
    )?;
    Ok(())
}
