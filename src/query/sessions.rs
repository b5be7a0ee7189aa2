use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{clamp_page, title_of, CategorySelection, SortDirection};
use crate::model::empty_category_counts;

/// Subquery picking the title message: first by category priority
/// (user, then assistant, then anything), then by time and id.
const TITLE_SUBQUERY: &str = "(SELECT m.content FROM messages m
      WHERE m.session_id = s.id
      ORDER BY CASE m.category WHEN 'user' THEN 0 WHEN 'assistant' THEN 1 ELSE 2 END,
               m.created_at ASC, m.id ASC
      LIMIT 1)";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub project_id: String,
    pub provider: String,
    pub title: String,
    pub file_path: String,
    pub model_names: String,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
    pub duration_ms: Option<i64>,
    pub git_branch: Option<String>,
    pub cwd: Option<String>,
    pub message_count: i64,
    pub token_input_total: i64,
    pub token_output_total: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: String,
    pub source_id: String,
    pub session_id: String,
    pub provider: String,
    pub category: String,
    pub content: String,
    pub created_at: String,
    pub token_input: Option<i64>,
    pub token_output: Option<i64>,
    pub operation_duration_ms: Option<i64>,
    pub operation_duration_source: Option<String>,
    pub operation_duration_confidence: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SessionDetailRequest {
    pub session_id: String,
    #[serde(default)]
    pub page: i64,
    pub page_size: i64,
    #[serde(default)]
    pub sort_direction: SortDirection,
    #[serde(default)]
    pub categories: Option<Vec<String>>,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub focus_message_id: Option<String>,
    #[serde(default)]
    pub focus_source_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDetailResponse {
    pub session: Option<SessionSummary>,
    pub total_count: i64,
    pub category_counts: BTreeMap<String, i64>,
    pub page: i64,
    pub page_size: i64,
    pub focus_index: Option<i64>,
    pub messages: Vec<MessageView>,
}

/// Sessions ordered by most recent activity, with computed titles.
pub fn list_sessions(conn: &Connection, project_id: &str) -> Result<Vec<SessionSummary>> {
    let mut sql = format!(
        "SELECT s.id, s.project_id, s.provider, {TITLE_SUBQUERY} AS title,
                s.file_path, s.model_names, s.started_at, s.ended_at, s.duration_ms,
                s.git_branch, s.cwd, s.message_count, s.token_input_total, s.token_output_total
         FROM sessions s"
    );
    if !project_id.is_empty() {
        sql.push_str(" WHERE s.project_id = ?1");
    }
    sql.push_str(" ORDER BY COALESCE(s.ended_at, s.started_at) DESC, s.id DESC");

    let mut stmt = conn.prepare(&sql)?;
    let map_row = |row: &rusqlite::Row<'_>| row_to_summary(row);
    let rows = if project_id.is_empty() {
        stmt.query_map([], map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?
    } else {
        stmt.query_map(params![project_id], map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?
    };
    Ok(rows)
}

fn row_to_summary(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionSummary> {
    let raw_title: Option<String> = row.get(3)?;
    Ok(SessionSummary {
        id: row.get(0)?,
        project_id: row.get(1)?,
        provider: row.get(2)?,
        title: title_of(raw_title.as_deref().unwrap_or("")),
        file_path: row.get(4)?,
        model_names: row.get(5)?,
        started_at: row.get(6)?,
        ended_at: row.get(7)?,
        duration_ms: row.get(8)?,
        git_branch: row.get(9)?,
        cwd: row.get(10)?,
        message_count: row.get(11)?,
        token_input_total: row.get(12)?,
        token_output_total: row.get(13)?,
    })
}

pub(crate) fn get_session(conn: &Connection, session_id: &str) -> Result<Option<SessionSummary>> {
    let sql = format!(
        "SELECT s.id, s.project_id, s.provider, {TITLE_SUBQUERY} AS title,
                s.file_path, s.model_names, s.started_at, s.ended_at, s.duration_ms,
                s.git_branch, s.cwd, s.message_count, s.token_input_total, s.token_output_total
         FROM sessions s WHERE s.id = ?1"
    );
    let session = conn
        .query_row(&sql, params![session_id], row_to_summary)
        .optional()?;
    Ok(session)
}

/// Title for one session, as listings would compute it.
pub(crate) fn session_title(conn: &Connection, session_id: &str) -> Result<Option<String>> {
    let content: Option<String> = conn
        .query_row(
            "SELECT m.content FROM messages m
             WHERE m.session_id = ?1
             ORDER BY CASE m.category WHEN 'user' THEN 0 WHEN 'assistant' THEN 1 ELSE 2 END,
                      m.created_at ASC, m.id ASC
             LIMIT 1",
            params![session_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(content.map(|c| title_of(&c)))
}

/// Paginated message view over one session, with facet counts and optional
/// focus targeting.
pub fn session_detail(
    conn: &Connection,
    request: &SessionDetailRequest,
) -> Result<SessionDetailResponse> {
    let session = get_session(conn, &request.session_id)?;
    let page_size = request.page_size.clamp(super::MIN_PAGE_SIZE, super::MAX_PAGE_SIZE);

    let filter = MessageFilter {
        scope_clause: "m.session_id = ?1".to_string(),
        scope_param: request.session_id.clone(),
        categories: CategorySelection::from_request(request.categories.as_deref()),
        query: request.query.clone(),
    };

    let total_count = filter.count(conn, true)?;
    let category_counts = filter.category_counts(conn)?;

    let focus_index = resolve_focus_index(conn, request, &filter, total_count)?;
    let page = match focus_index {
        Some(index) => index / page_size,
        None => clamp_page(request.page, page_size, total_count),
    };

    let messages = filter.fetch_page(conn, request.sort_direction, page, page_size)?;

    Ok(SessionDetailResponse {
        session,
        total_count,
        category_counts,
        page,
        page_size,
        focus_index,
        messages,
    })
}

/// Messages-table filter shared by session and project detail views. The
/// scope clause pins the session or project; categories and the content
/// substring narrow further.
pub(crate) struct MessageFilter {
    pub scope_clause: String,
    pub scope_param: String,
    pub categories: CategorySelection,
    pub query: String,
}

impl MessageFilter {
    /// WHERE clause with `?1` bound to the scope parameter and `?2` to the
    /// lowered content query when present.
    fn where_sql(&self, with_categories: bool) -> String {
        let mut clauses = vec![self.scope_clause.clone()];
        if with_categories {
            if let Some(clause) = self.categories.clause("m.category") {
                clauses.push(clause);
            }
        }
        if !self.query.is_empty() {
            clauses.push("instr(lower(m.content), lower(?2)) > 0".to_string());
        }
        format!("WHERE {}", clauses.join(" AND "))
    }

    fn query_params(&self) -> Vec<Box<dyn rusqlite::types::ToSql>> {
        let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> =
            vec![Box::new(self.scope_param.clone())];
        if !self.query.is_empty() {
            params_vec.push(Box::new(self.query.clone()));
        }
        params_vec
    }

    pub(crate) fn count(&self, conn: &Connection, with_categories: bool) -> Result<i64> {
        let sql = format!(
            "SELECT COUNT(*) FROM messages m {}",
            self.where_sql(with_categories)
        );
        let params_vec = self.query_params();
        let count = conn.query_row(
            &sql,
            rusqlite::params_from_iter(params_vec.iter().map(|p| p.as_ref())),
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Facet counts over the same filter minus the category restriction, so
    /// toggling a category never changes its own count.
    pub(crate) fn category_counts(&self, conn: &Connection) -> Result<BTreeMap<String, i64>> {
        let sql = format!(
            "SELECT m.category, COUNT(*) FROM messages m {} GROUP BY m.category",
            self.where_sql(false)
        );
        let params_vec = self.query_params();
        let mut counts = empty_category_counts();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(params_vec.iter().map(|p| p.as_ref())),
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
        )?;
        for row in rows {
            let (category, count) = row?;
            counts.insert(category, count);
        }
        Ok(counts)
    }

    pub(crate) fn fetch_page(
        &self,
        conn: &Connection,
        sort: SortDirection,
        page: i64,
        page_size: i64,
    ) -> Result<Vec<MessageView>> {
        let dir = sort.sql();
        let sql = format!(
            "SELECT m.id, m.source_id, m.session_id, m.provider, m.category, m.content,
                    m.created_at, m.token_input, m.token_output, m.operation_duration_ms,
                    m.operation_duration_source, m.operation_duration_confidence
             FROM messages m {}
             ORDER BY m.created_at {dir}, m.id {dir}
             LIMIT {page_size} OFFSET {offset}",
            self.where_sql(true),
            offset = page * page_size,
        );
        let params_vec = self.query_params();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                rusqlite::params_from_iter(params_vec.iter().map(|p| p.as_ref())),
                row_to_message,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Messages at-or-before the focus row under the given sort, counted
    /// with the full filter applied.
    pub(crate) fn count_through(
        &self,
        conn: &Connection,
        sort: SortDirection,
        focus_created_at: &str,
        focus_id: &str,
    ) -> Result<i64> {
        let comparison = match sort {
            SortDirection::Asc => {
                "(m.created_at < ?3 OR (m.created_at = ?3 AND m.id <= ?4))"
            }
            SortDirection::Desc => {
                "(m.created_at > ?3 OR (m.created_at = ?3 AND m.id >= ?4))"
            }
        };
        // ?2 must exist for the instr() clause; bind it unconditionally here
        // by padding the query parameter when absent.
        let mut clauses = vec![self.scope_clause.clone()];
        if let Some(clause) = self.categories.clause("m.category") {
            clauses.push(clause);
        }
        if !self.query.is_empty() {
            clauses.push("instr(lower(m.content), lower(?2)) > 0".to_string());
        }
        clauses.push(comparison.to_string());

        let sql = format!(
            "SELECT COUNT(*) FROM messages m WHERE {}",
            clauses.join(" AND ")
        );
        let count = conn.query_row(
            &sql,
            params![
                self.scope_param,
                self.query,
                focus_created_at,
                focus_id,
            ],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

pub(crate) fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageView> {
    Ok(MessageView {
        id: row.get(0)?,
        source_id: row.get(1)?,
        session_id: row.get(2)?,
        provider: row.get(3)?,
        category: row.get(4)?,
        content: row.get(5)?,
        created_at: row.get(6)?,
        token_input: row.get(7)?,
        token_output: row.get(8)?,
        operation_duration_ms: row.get(9)?,
        operation_duration_source: row.get(10)?,
        operation_duration_confidence: row.get(11)?,
    })
}

/// Resolve the focus target to its zero-based index under the current sort
/// and filter. The message id wins over the source id when both are given.
pub(crate) fn resolve_focus_index(
    conn: &Connection,
    request: &SessionDetailRequest,
    filter: &MessageFilter,
    total_count: i64,
) -> Result<Option<i64>> {
    if total_count == 0 {
        return Ok(None);
    }

    let focus_row: Option<(String, String)> = if let Some(message_id) =
        request.focus_message_id.as_ref().filter(|id| !id.is_empty())
    {
        conn.query_row(
            "SELECT m.created_at, m.id FROM messages m
             WHERE m.session_id = ?1 AND m.id = ?2",
            params![request.session_id, message_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?
    } else if let Some(source_id) = request.focus_source_id.as_ref().filter(|id| !id.is_empty()) {
        conn.query_row(
            "SELECT m.created_at, m.id FROM messages m
             WHERE m.session_id = ?1 AND m.source_id = ?2
             ORDER BY m.created_at ASC, m.id ASC LIMIT 1",
            params![request.session_id, source_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?
    } else {
        None
    };

    let Some((created_at, id)) = focus_row else {
        return Ok(None);
    };

    let through = filter.count_through(conn, request.sort_direction, &created_at, &id)?;
    if through >= 1 {
        Ok(Some(through - 1))
    } else {
        Ok(None)
    }
}
