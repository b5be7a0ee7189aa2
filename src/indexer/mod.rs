pub mod metadata;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;

use crate::config::DiscoveryConfig;
use crate::db;
use crate::discovery::{self, DiscoveredFile};
use crate::ident;
use crate::model::{CanonicalMessage, MessageCategory, Severity};
use crate::parse;
use crate::rules::{RuleOverrides, SystemMessageRules};

/// Inputs for one indexing run.
#[derive(Debug, Clone)]
pub struct IndexRequest {
    pub db_path: PathBuf,
    pub force_reindex: bool,
    pub discovery: DiscoveryConfig,
    pub rule_overrides: RuleOverrides,
}

/// Report produced after an indexing run completes.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct IndexOutcome {
    pub discovered_files: usize,
    pub indexed_files: usize,
    pub skipped_files: usize,
    pub removed_files: usize,
    pub schema_rebuilt: bool,
    pub warnings: usize,
    pub errors: usize,
}

impl std::fmt::Display for IndexOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Indexing complete")?;
        writeln!(f, "  Discovered:     {}", self.discovered_files)?;
        writeln!(f, "  Indexed:        {}", self.indexed_files)?;
        writeln!(f, "  Skipped:        {}", self.skipped_files)?;
        writeln!(f, "  Removed:        {}", self.removed_files)?;
        if self.schema_rebuilt {
            writeln!(f, "  Schema:         rebuilt")?;
        }
        writeln!(
            f,
            "  Diagnostics:    {} warnings, {} errors",
            self.warnings, self.errors
        )?;
        Ok(())
    }
}

/// Signature of a previously indexed file, keyed by path.
struct IndexedFileRow {
    session_identity: String,
    file_size: u64,
    file_mtime_ms: u64,
}

/// Reconcile discovered provider files against the index, rewriting changed
/// sessions transactionally and removing stale ones.
pub fn run_incremental_indexing(request: &IndexRequest) -> Result<IndexOutcome> {
    let mut outcome = IndexOutcome::default();

    let conn = db::open(&request.db_path).context("failed to open index database")?;

    outcome.schema_rebuilt = db::ensure_schema_version(&conn)?;
    if request.force_reindex && !outcome.schema_rebuilt {
        tracing::info!("force reindex requested, clearing indexed data");
        db::clear_indexed_tables(&conn)?;
    }

    let rules = SystemMessageRules::with_overrides(&request.rule_overrides);

    let discovered = discovery::discover_all(&request.discovery)?;
    outcome.discovered_files = discovered.len();

    let indexed_by_path = load_indexed_files(&conn)?;
    let sessions_by_path = load_sessions_by_path(&conn)?;

    remove_stale_files(&conn, &discovered, &indexed_by_path, &mut outcome)?;

    for file in &discovered {
        let path_str = file.file_path.to_string_lossy().to_string();
        let session_db_id = ident::session_id(file.provider.as_str(), &file.session_identity);

        if !request.force_reindex && !outcome.schema_rebuilt {
            let unchanged = indexed_by_path.get(&path_str).is_some_and(|row| {
                row.file_size == file.file_size
                    && row.file_mtime_ms == file.file_mtime_ms
                    && row.session_identity == file.session_identity
            });
            let session_intact = sessions_by_path.get(&path_str) == Some(&session_db_id);
            if unchanged && session_intact {
                outcome.skipped_files += 1;
                continue;
            }
        }

        let payload = match std::fs::read_to_string(&file.file_path) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("failed to read {}: {e}", file.file_path.display());
                outcome.errors += 1;
                continue;
            }
        };

        let mut parsed = parse::parse(file.provider, &session_db_id, &payload);
        rules.apply(&mut parsed.messages);
        for diagnostic in &parsed.diagnostics {
            match diagnostic.severity {
                Severity::Warning => outcome.warnings += 1,
                Severity::Error => outcome.errors += 1,
            }
        }

        let source_meta = metadata::extract_source_metadata(file.provider, &payload);

        match write_session(&conn, file, &session_db_id, &parsed.messages, &source_meta) {
            Ok(()) => outcome.indexed_files += 1,
            Err(e) => {
                tracing::warn!("failed to index {}: {e:#}", file.file_path.display());
                outcome.errors += 1;
            }
        }
    }

    // Projects hold no state of their own; drop any left without sessions.
    conn.execute(
        "DELETE FROM projects WHERE id NOT IN (SELECT DISTINCT project_id FROM sessions)",
        [],
    )
    .context("failed to sweep empty projects")?;

    tracing::info!(
        "indexing done: {} discovered, {} indexed, {} skipped, {} removed",
        outcome.discovered_files,
        outcome.indexed_files,
        outcome.skipped_files,
        outcome.removed_files,
    );

    Ok(outcome)
}

fn load_indexed_files(conn: &Connection) -> Result<HashMap<String, IndexedFileRow>> {
    let mut stmt = conn.prepare(
        "SELECT file_path, session_identity, file_size, file_mtime_ms FROM indexed_files",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                IndexedFileRow {
                    session_identity: row.get(1)?,
                    file_size: row.get::<_, i64>(2)? as u64,
                    file_mtime_ms: row.get::<_, i64>(3)? as u64,
                },
            ))
        })?
        .collect::<std::result::Result<HashMap<_, _>, _>>()?;
    Ok(rows)
}

fn load_sessions_by_path(conn: &Connection) -> Result<HashMap<String, String>> {
    let mut stmt = conn.prepare("SELECT file_path, id FROM sessions")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<std::result::Result<HashMap<_, _>, _>>()?;
    Ok(rows)
}

/// Delete sessions and the index record for files that no longer exist.
fn remove_stale_files(
    conn: &Connection,
    discovered: &[DiscoveredFile],
    indexed_by_path: &HashMap<String, IndexedFileRow>,
    outcome: &mut IndexOutcome,
) -> Result<()> {
    let discovered_paths: HashSet<String> = discovered
        .iter()
        .map(|f| f.file_path.to_string_lossy().to_string())
        .collect();

    let stale: Vec<&String> = indexed_by_path
        .keys()
        .filter(|path| !discovered_paths.contains(*path))
        .collect();
    if stale.is_empty() {
        return Ok(());
    }

    let tx = conn.unchecked_transaction()?;
    for path in stale {
        delete_sessions_for_path(&tx, path)?;
        tx.execute("DELETE FROM indexed_files WHERE file_path = ?1", params![path])?;
        outcome.removed_files += 1;
        tracing::debug!("removed stale file {path}");
    }
    tx.commit().context("failed to commit stale-file removal")?;
    Ok(())
}

fn delete_sessions_for_path(conn: &Connection, file_path: &str) -> Result<()> {
    let mut stmt = conn.prepare_cached("SELECT id FROM sessions WHERE file_path = ?1")?;
    let ids: Vec<String> = stmt
        .query_map(params![file_path], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    for id in ids {
        delete_session_tree(conn, &id)?;
    }
    Ok(())
}

/// Remove a session and everything hanging off it. FTS rows carry the
/// session id so the text index stays consistent within the transaction.
fn delete_session_tree(conn: &Connection, session_id: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM message_fts WHERE session_id = ?1",
        params![session_id],
    )?;
    conn.execute(
        "DELETE FROM tool_calls WHERE message_id IN (SELECT id FROM messages WHERE session_id = ?1)",
        params![session_id],
    )?;
    conn.execute("DELETE FROM messages WHERE session_id = ?1", params![session_id])?;
    conn.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])?;
    Ok(())
}

/// Atomically replace everything the index holds for one session file.
fn write_session(
    conn: &Connection,
    file: &DiscoveredFile,
    session_db_id: &str,
    messages: &[CanonicalMessage],
    source_meta: &metadata::SourceMetadata,
) -> Result<()> {
    let path_str = file.file_path.to_string_lossy().to_string();
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

    let project_id = ident::project_id(file.provider.as_str(), &file.project_path);
    let aggregate = SessionAggregate::compute(messages);

    let models: BTreeSet<String> = source_meta.models.clone();
    let model_names = models.into_iter().collect::<Vec<_>>().join(",");

    let git_branch = source_meta
        .git_branch
        .clone()
        .or_else(|| file.metadata.git_branch.clone());
    let cwd = source_meta.cwd.clone().or_else(|| file.metadata.cwd.clone());

    let tx = conn.unchecked_transaction()?;

    // Both the path and the derived id may point at prior state (renames,
    // id collisions); clear each before rewriting.
    delete_sessions_for_path(&tx, &path_str)?;
    delete_session_tree(&tx, session_db_id)?;

    tx.execute(
        "INSERT INTO projects (id, provider, name, path, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)
         ON CONFLICT(id) DO UPDATE SET updated_at = excluded.updated_at",
        params![
            project_id,
            file.provider.as_str(),
            file.project_name,
            file.project_path,
            now,
        ],
    )?;

    tx.execute(
        "INSERT INTO sessions (id, project_id, provider, file_path, model_names,
                               started_at, ended_at, duration_ms, git_branch, cwd,
                               message_count, token_input_total, token_output_total)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            session_db_id,
            project_id,
            file.provider.as_str(),
            path_str,
            model_names,
            aggregate.started_at,
            aggregate.ended_at,
            aggregate.duration_ms.map(|d| d as i64),
            git_branch,
            cwd,
            messages.len() as i64,
            aggregate.token_input_total as i64,
            aggregate.token_output_total as i64,
        ],
    )?;

    {
        let mut message_stmt = tx.prepare_cached(
            "INSERT INTO messages (id, source_id, session_id, provider, category, content,
                                   created_at, token_input, token_output,
                                   operation_duration_ms, operation_duration_source,
                                   operation_duration_confidence)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )?;
        let mut fts_stmt = tx.prepare_cached(
            "INSERT INTO message_fts (content, message_id, session_id, provider, category)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        let mut tool_stmt = tx.prepare_cached(
            "INSERT INTO tool_calls (id, message_id, tool_name, args_json, result_json,
                                     started_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;

        for message in messages {
            let message_db_id = ident::message_id(session_db_id, &message.id);
            message_stmt
                .execute(params![
                    message_db_id,
                    message.id,
                    session_db_id,
                    message.provider.as_str(),
                    message.category.as_str(),
                    message.content,
                    message.created_at,
                    message.token_input.map(|t| t as i64),
                    message.token_output.map(|t| t as i64),
                    message.operation_duration_ms.map(|d| d as i64),
                    message.operation_duration_source.map(|s| s.as_str()),
                    message.operation_duration_confidence.map(|c| c.as_str()),
                ])
                .with_context(|| format!("failed to insert message {}", message.id))?;

            fts_stmt.execute(params![
                message.content,
                message_db_id,
                session_db_id,
                message.provider.as_str(),
                message.category.as_str(),
            ])?;

            if matches!(
                message.category,
                MessageCategory::ToolUse | MessageCategory::ToolEdit
            ) {
                let call = ToolCallFields::from_content(&message.content);
                tool_stmt.execute(params![
                    ident::tool_call_id(&message_db_id, 0),
                    message_db_id,
                    call.tool_name,
                    call.args_json,
                    call.result_json,
                    message.created_at,
                    Option::<String>::None,
                ])?;
            }
        }
    }

    tx.execute(
        "INSERT INTO indexed_files (id, file_path, provider, project_path, session_identity,
                                    file_size, file_mtime_ms, indexed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(file_path) DO UPDATE SET
             provider = excluded.provider,
             project_path = excluded.project_path,
             session_identity = excluded.session_identity,
             file_size = excluded.file_size,
             file_mtime_ms = excluded.file_mtime_ms,
             indexed_at = excluded.indexed_at",
        params![
            ident::file_id(&path_str),
            path_str,
            file.provider.as_str(),
            file.project_path,
            file.session_identity,
            file.file_size as i64,
            file.file_mtime_ms as i64,
            now,
        ],
    )?;

    tx.commit()
        .with_context(|| format!("failed to commit session rewrite for {path_str}"))
}

#[derive(Debug, Default)]
struct SessionAggregate {
    started_at: Option<String>,
    ended_at: Option<String>,
    duration_ms: Option<u64>,
    token_input_total: u64,
    token_output_total: u64,
}

impl SessionAggregate {
    fn compute(messages: &[CanonicalMessage]) -> Self {
        let mut aggregate = Self::default();
        let mut bounds: Option<(chrono::DateTime<chrono::FixedOffset>, String, chrono::DateTime<chrono::FixedOffset>, String)> =
            None;

        for message in messages {
            aggregate.token_input_total += message.token_input.unwrap_or(0);
            aggregate.token_output_total += message.token_output.unwrap_or(0);

            let Ok(parsed) = chrono::DateTime::parse_from_rfc3339(&message.created_at) else {
                continue;
            };
            bounds = Some(match bounds.take() {
                None => (parsed, message.created_at.clone(), parsed, message.created_at.clone()),
                Some((min_dt, min_s, max_dt, max_s)) => {
                    let (min_dt, min_s) = if parsed < min_dt {
                        (parsed, message.created_at.clone())
                    } else {
                        (min_dt, min_s)
                    };
                    let (max_dt, max_s) = if parsed > max_dt {
                        (parsed, message.created_at.clone())
                    } else {
                        (max_dt, max_s)
                    };
                    (min_dt, min_s, max_dt, max_s)
                }
            });
        }

        if let Some((min_dt, min_s, max_dt, max_s)) = bounds {
            aggregate.duration_ms =
                u64::try_from(max_dt.signed_duration_since(min_dt).num_milliseconds()).ok();
            aggregate.started_at = Some(min_s);
            aggregate.ended_at = Some(max_s);
        }

        aggregate
    }
}

/// Tool call columns recovered from a tool message's serialized payload.
struct ToolCallFields {
    tool_name: String,
    args_json: Option<String>,
    result_json: Option<String>,
}

impl ToolCallFields {
    fn from_content(content: &str) -> Self {
        let parsed: Option<serde_json::Value> = serde_json::from_str(content).ok();
        let record = parsed.as_ref().and_then(|v| v.as_object());

        let tool_name = record
            .and_then(|r| crate::helpers::read_string(r, "name"))
            .unwrap_or_else(|| "unknown".to_string());
        let args_json = record
            .and_then(|r| r.get("input").or_else(|| r.get("arguments")).or_else(|| r.get("args")))
            .map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            });
        let result_json = record.and_then(|r| r.get("result")).map(|v| v.to_string());

        Self {
            tool_name,
            args_json,
            result_json,
        }
    }
}
