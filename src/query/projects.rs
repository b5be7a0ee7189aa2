use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use super::sessions::{MessageFilter, SessionDetailRequest};
use super::{clamp_page, title_of, CategorySelection};
use crate::model::Provider;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSummary {
    pub id: String,
    pub provider: String,
    pub name: String,
    pub path: String,
    pub created_at: String,
    pub updated_at: String,
    pub session_count: i64,
    pub last_activity: Option<String>,
}

/// Messages in a combined project view carry their session's context.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedMessageView {
    #[serde(flatten)]
    pub message: super::sessions::MessageView,
    pub session_title: String,
    pub session_activity: Option<String>,
    pub session_git_branch: Option<String>,
    pub session_cwd: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedDetailResponse {
    pub project: Option<ProjectSummary>,
    pub total_count: i64,
    pub category_counts: BTreeMap<String, i64>,
    pub page: i64,
    pub page_size: i64,
    pub focus_index: Option<i64>,
    pub messages: Vec<CombinedMessageView>,
}

/// Projects grouped with session counts and last activity.
///
/// `providers` narrows to the given set (`Some(&[])` selects nothing);
/// `query` is a case-insensitive substring over name and path.
pub fn list_projects(
    conn: &Connection,
    providers: Option<&[String]>,
    query: &str,
) -> Result<Vec<ProjectSummary>> {
    let provider_set: Option<Vec<&'static str>> = providers.map(|raw| {
        raw.iter()
            .filter_map(|p| Provider::parse(p))
            .map(|p| p.as_str())
            .collect()
    });
    if provider_set.as_ref().is_some_and(|set| set.is_empty()) {
        return Ok(Vec::new());
    }

    let mut clauses: Vec<String> = Vec::new();
    let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(set) = &provider_set {
        let list = set.iter().map(|p| format!("'{p}'")).collect::<Vec<_>>().join(", ");
        clauses.push(format!("p.provider IN ({list})"));
    }
    let trimmed = query.trim();
    if !trimmed.is_empty() {
        clauses.push(format!(
            "(instr(lower(p.name), lower(?{n})) > 0 OR instr(lower(p.path), lower(?{n})) > 0)",
            n = params_vec.len() + 1
        ));
        params_vec.push(Box::new(trimmed.to_string()));
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };

    let sql = format!(
        "SELECT p.id, p.provider, p.name, p.path, p.created_at, p.updated_at,
                COUNT(s.id) AS session_count,
                MAX(COALESCE(s.ended_at, s.started_at)) AS last_activity
         FROM projects p
         LEFT JOIN sessions s ON s.project_id = p.id
         {where_sql}
         GROUP BY p.id
         ORDER BY p.provider, lower(p.name), p.id"
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            rusqlite::params_from_iter(params_vec.iter().map(|p| p.as_ref())),
            row_to_project,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn row_to_project(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProjectSummary> {
    Ok(ProjectSummary {
        id: row.get(0)?,
        provider: row.get(1)?,
        name: row.get(2)?,
        path: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        session_count: row.get(6)?,
        last_activity: row.get(7)?,
    })
}

pub(crate) fn get_project(conn: &Connection, project_id: &str) -> Result<Option<ProjectSummary>> {
    let project = conn
        .query_row(
            "SELECT p.id, p.provider, p.name, p.path, p.created_at, p.updated_at,
                    COUNT(s.id), MAX(COALESCE(s.ended_at, s.started_at))
             FROM projects p
             LEFT JOIN sessions s ON s.project_id = p.id
             WHERE p.id = ?1
             GROUP BY p.id",
            params![project_id],
            row_to_project,
        )
        .optional()?;
    Ok(project)
}

/// Session-detail semantics across every session of a project; messages are
/// annotated with their session's title, activity, branch, and cwd.
pub fn combined_detail(
    conn: &Connection,
    project_id: &str,
    request: &SessionDetailRequest,
) -> Result<CombinedDetailResponse> {
    let project = get_project(conn, project_id)?;
    let page_size = request.page_size.clamp(super::MIN_PAGE_SIZE, super::MAX_PAGE_SIZE);

    let filter = MessageFilter {
        scope_clause:
            "m.session_id IN (SELECT id FROM sessions WHERE project_id = ?1)".to_string(),
        scope_param: project_id.to_string(),
        categories: CategorySelection::from_request(request.categories.as_deref()),
        query: request.query.clone(),
    };

    let total_count = filter.count(conn, true)?;
    let category_counts = filter.category_counts(conn)?;

    let focus_index = resolve_combined_focus(conn, project_id, request, &filter, total_count)?;
    let page = match focus_index {
        Some(index) => index / page_size,
        None => clamp_page(request.page, page_size, total_count),
    };

    let messages = filter.fetch_page(conn, request.sort_direction, page, page_size)?;
    let messages = annotate_with_sessions(conn, messages)?;

    Ok(CombinedDetailResponse {
        project,
        total_count,
        category_counts,
        page,
        page_size,
        focus_index,
        messages,
    })
}

fn resolve_combined_focus(
    conn: &Connection,
    project_id: &str,
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
             JOIN sessions s ON s.id = m.session_id
             WHERE s.project_id = ?1 AND m.id = ?2",
            params![project_id, message_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?
    } else if let Some(source_id) = request.focus_source_id.as_ref().filter(|id| !id.is_empty()) {
        conn.query_row(
            "SELECT m.created_at, m.id FROM messages m
             JOIN sessions s ON s.id = m.session_id
             WHERE s.project_id = ?1 AND m.source_id = ?2
             ORDER BY m.created_at ASC, m.id ASC LIMIT 1",
            params![project_id, source_id],
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

fn annotate_with_sessions(
    conn: &Connection,
    messages: Vec<super::sessions::MessageView>,
) -> Result<Vec<CombinedMessageView>> {
    let mut session_info: HashMap<String, (String, Option<String>, Option<String>, Option<String>)> =
        HashMap::new();
    let mut stmt = conn.prepare_cached(
        "SELECT COALESCE(s.ended_at, s.started_at), s.git_branch, s.cwd,
                (SELECT m.content FROM messages m
                 WHERE m.session_id = s.id
                 ORDER BY CASE m.category WHEN 'user' THEN 0 WHEN 'assistant' THEN 1 ELSE 2 END,
                          m.created_at ASC, m.id ASC
                 LIMIT 1)
         FROM sessions s WHERE s.id = ?1",
    )?;

    let mut annotated = Vec::with_capacity(messages.len());
    for message in messages {
        let session_id = message.session_id.clone();
        if !session_info.contains_key(&session_id) {
            let info = stmt
                .query_row(params![session_id], |row| {
                    Ok((
                        row.get::<_, Option<String>>(3)?
                            .map(|c| title_of(&c))
                            .unwrap_or_default(),
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                })
                .optional()?
                .unwrap_or_default();
            session_info.insert(session_id.clone(), info);
        }
        let (title, activity, git_branch, cwd) = session_info
            .get(&session_id)
            .cloned()
            .unwrap_or_default();
        annotated.push(CombinedMessageView {
            message,
            session_title: title,
            session_activity: activity,
            session_git_branch: git_branch,
            session_cwd: cwd,
        });
    }
    Ok(annotated)
}
