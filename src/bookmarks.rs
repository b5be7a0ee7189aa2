//! Persistent user bookmarks.
//!
//! Bookmarks live in their own database file beside the index so they survive
//! index rebuilds. Rows are reconciled against the index after each run: a
//! bookmark whose backing message vanished is kept, marked orphaned, and
//! rendered from its stored snapshot until the message reappears.

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::SNAPSHOT_VERSION;

const MIGRATION_001: &str = "
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS bookmarks (
    project_id TEXT NOT NULL,
    message_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    message_source_id TEXT NOT NULL,
    provider TEXT NOT NULL,
    session_title TEXT,
    message_category TEXT NOT NULL,
    message_content TEXT NOT NULL,
    message_created_at TEXT NOT NULL,
    bookmarked_at TEXT NOT NULL,
    is_orphaned INTEGER NOT NULL DEFAULT 0,
    orphaned_at TEXT,
    snapshot_version INTEGER NOT NULL,
    snapshot_json TEXT NOT NULL,
    PRIMARY KEY (project_id, message_id)
);

CREATE INDEX IF NOT EXISTS idx_bookmarks_project_message_content_lower
    ON bookmarks(project_id, lower(message_content));
";

const MIGRATIONS: &[(u32, &str)] = &[(1, MIGRATION_001)];

/// What a bookmark remembers about its message, independent of the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookmarkSnapshot {
    pub version: i64,
    pub project_id: String,
    pub session_id: String,
    pub message_id: String,
    pub message_source_id: String,
    pub provider: String,
    pub session_title: Option<String>,
    pub category: String,
    pub content: String,
    pub created_at: String,
}

/// A stored bookmark row.
#[derive(Debug, Clone)]
pub struct BookmarkRow {
    pub project_id: String,
    pub message_id: String,
    pub session_id: String,
    pub message_source_id: String,
    pub provider: String,
    pub session_title: Option<String>,
    pub message_category: String,
    pub message_content: String,
    pub message_created_at: String,
    pub bookmarked_at: String,
    pub is_orphaned: bool,
    pub orphaned_at: Option<String>,
}

/// Result of reconciling bookmarks against the index database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub deleted_missing_projects: usize,
    pub marked_orphaned: usize,
    pub restored: usize,
}

pub struct BookmarkStore {
    conn: Connection,
    path: PathBuf,
}

impl BookmarkStore {
    /// Open or create the bookmark database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open bookmark database at {}", path.display()))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )
        .context("failed to set bookmark database PRAGMAs")?;

        migrate(&conn)?;

        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or refresh a bookmark. Always clears the orphan flag and
    /// rewrites the snapshot; the bookmark timestamp is kept on refresh.
    pub fn upsert_bookmark(&self, snapshot: &BookmarkSnapshot) -> Result<()> {
        let now = now_iso();
        let snapshot_json =
            serde_json::to_string(snapshot).context("failed to serialize bookmark snapshot")?;
        self.conn
            .execute(
                "INSERT INTO bookmarks (project_id, message_id, session_id, message_source_id,
                                        provider, session_title, message_category,
                                        message_content, message_created_at, bookmarked_at,
                                        is_orphaned, orphaned_at, snapshot_version, snapshot_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, NULL, ?11, ?12)
                 ON CONFLICT(project_id, message_id) DO UPDATE SET
                     session_id = excluded.session_id,
                     message_source_id = excluded.message_source_id,
                     provider = excluded.provider,
                     session_title = excluded.session_title,
                     message_category = excluded.message_category,
                     message_content = excluded.message_content,
                     message_created_at = excluded.message_created_at,
                     is_orphaned = 0,
                     orphaned_at = NULL,
                     snapshot_version = excluded.snapshot_version,
                     snapshot_json = excluded.snapshot_json",
                params![
                    snapshot.project_id,
                    snapshot.message_id,
                    snapshot.session_id,
                    snapshot.message_source_id,
                    snapshot.provider,
                    snapshot.session_title,
                    snapshot.category,
                    snapshot.content,
                    snapshot.created_at,
                    now,
                    SNAPSHOT_VERSION,
                    snapshot_json,
                ],
            )
            .context("failed to upsert bookmark")?;
        Ok(())
    }

    /// Remove a bookmark; returns whether a row existed.
    pub fn remove_bookmark(&self, project_id: &str, message_id: &str) -> Result<bool> {
        let removed = self.conn.execute(
            "DELETE FROM bookmarks WHERE project_id = ?1 AND message_id = ?2",
            params![project_id, message_id],
        )?;
        Ok(removed > 0)
    }

    pub fn get_bookmark(&self, project_id: &str, message_id: &str) -> Result<Option<BookmarkRow>> {
        self.conn
            .query_row(
                &format!("{BOOKMARK_SELECT} WHERE project_id = ?1 AND message_id = ?2"),
                params![project_id, message_id],
                row_to_bookmark,
            )
            .optional()
            .context("failed to read bookmark")
    }

    /// All bookmarks for a project, newest message first. The optional query
    /// filters case-insensitively on the stored content, using the lower()
    /// expression index.
    pub fn list_project_bookmarks(
        &self,
        project_id: &str,
        query: Option<&str>,
    ) -> Result<Vec<BookmarkRow>> {
        let mut sql = format!("{BOOKMARK_SELECT} WHERE project_id = ?1");
        let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> =
            vec![Box::new(project_id.to_string())];

        if let Some(q) = query.filter(|q| !q.is_empty()) {
            sql.push_str(&format!(
                " AND lower(message_content) LIKE '%' || lower(?{}) || '%'",
                params_vec.len() + 1
            ));
            params_vec.push(Box::new(q.to_string()));
        }
        sql.push_str(" ORDER BY message_created_at DESC, message_id DESC");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                rusqlite::params_from_iter(params_vec.iter().map(|p| p.as_ref())),
                row_to_bookmark,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count_project_bookmarks(&self, project_id: &str) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM bookmarks WHERE project_id = ?1",
            params![project_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Reconcile every bookmark against the index database, in one
    /// transaction over an attached connection:
    /// 1. project gone → delete the bookmark,
    /// 2. message/session pair gone → mark orphaned (stamping `orphaned_at`
    ///    on the transition),
    /// 3. pair back → clear the orphan flag.
    pub fn reconcile_with_indexed_data(&self, indexed_db_path: &Path) -> Result<ReconcileReport> {
        let db_str = indexed_db_path.to_string_lossy().to_string();
        self.conn
            .execute("ATTACH DATABASE ?1 AS idx", params![db_str])
            .with_context(|| format!("failed to attach index database {db_str}"))?;

        let result = self.reconcile_attached();

        // Detach regardless of the transaction's fate.
        if let Err(e) = self.conn.execute("DETACH DATABASE idx", []) {
            tracing::warn!("failed to detach index database: {e}");
        }

        result
    }

    fn reconcile_attached(&self) -> Result<ReconcileReport> {
        let now = now_iso();
        let tx = self.conn.unchecked_transaction()?;
        let mut report = ReconcileReport::default();

        report.deleted_missing_projects = tx.execute(
            "DELETE FROM bookmarks
             WHERE project_id NOT IN (SELECT id FROM idx.projects)",
            [],
        )?;

        report.marked_orphaned = tx.execute(
            "UPDATE bookmarks
             SET is_orphaned = 1, orphaned_at = COALESCE(orphaned_at, ?1)
             WHERE is_orphaned = 0
               AND NOT EXISTS (
                   SELECT 1 FROM idx.messages m
                   WHERE m.id = bookmarks.message_id
                     AND m.session_id = bookmarks.session_id
               )",
            params![now],
        )?;

        report.restored = tx.execute(
            "UPDATE bookmarks
             SET is_orphaned = 0, orphaned_at = NULL
             WHERE is_orphaned = 1
               AND EXISTS (
                   SELECT 1 FROM idx.messages m
                   WHERE m.id = bookmarks.message_id
                     AND m.session_id = bookmarks.session_id
               )",
            params![],
        )?;

        tx.commit().context("failed to commit bookmark reconciliation")?;

        tracing::info!(
            "bookmark reconciliation: {} deleted, {} orphaned, {} restored",
            report.deleted_missing_projects,
            report.marked_orphaned,
            report.restored,
        );

        Ok(report)
    }
}

const BOOKMARK_SELECT: &str = "SELECT project_id, message_id, session_id, message_source_id,
        provider, session_title, message_category, message_content, message_created_at,
        bookmarked_at, is_orphaned, orphaned_at
 FROM bookmarks";

fn row_to_bookmark(row: &rusqlite::Row<'_>) -> rusqlite::Result<BookmarkRow> {
    Ok(BookmarkRow {
        project_id: row.get(0)?,
        message_id: row.get(1)?,
        session_id: row.get(2)?,
        message_source_id: row.get(3)?,
        provider: row.get(4)?,
        session_title: row.get(5)?,
        message_category: row.get(6)?,
        message_content: row.get(7)?,
        message_created_at: row.get(8)?,
        bookmarked_at: row.get(9)?,
        is_orphaned: row.get::<_, i64>(10)? != 0,
        orphaned_at: row.get(11)?,
    })
}

fn migrate(conn: &Connection) -> Result<()> {
    let current_version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    for &(version, sql) in MIGRATIONS {
        if version > current_version {
            tracing::info!("running bookmark migration v{version}");
            let tx = conn.unchecked_transaction()?;
            tx.execute_batch(sql)
                .with_context(|| format!("bookmark migration v{version} failed"))?;
            tx.execute(
                "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?1)",
                params![version.to_string()],
            )?;
            tx.pragma_update(None, "user_version", version)?;
            tx.commit()
                .with_context(|| format!("failed to commit bookmark migration v{version}"))?;
        }
    }

    Ok(())
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
