use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::BTreeMap;

use super::sessions::session_title;
use super::CategorySelection;
use crate::bookmarks::{BookmarkSnapshot, BookmarkStore};
use crate::model::empty_category_counts;
use crate::SNAPSHOT_VERSION;

/// A bookmark joined against the live index: live rows win, orphans render
/// from their stored snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkView {
    pub project_id: String,
    pub session_id: String,
    pub message_id: String,
    pub message_source_id: String,
    pub provider: String,
    pub session_title: Option<String>,
    pub category: String,
    pub content: String,
    pub created_at: String,
    pub bookmarked_at: String,
    pub is_orphaned: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkListResponse {
    pub project_id: String,
    pub total_count: i64,
    pub filtered_count: i64,
    pub category_counts: BTreeMap<String, i64>,
    pub results: Vec<BookmarkView>,
}

/// List a project's bookmarks, joined with live message rows.
///
/// `total_count` covers every bookmark of the project; the optional content
/// query narrows via the store, the category filter applies after the join;
/// facet counts ignore the category filter.
pub fn list_project_bookmarks(
    conn: &Connection,
    store: &BookmarkStore,
    project_id: &str,
    query: Option<&str>,
    categories: Option<&[String]>,
) -> Result<BookmarkListResponse> {
    let total_count = store.count_project_bookmarks(project_id)?;
    let rows = store.list_project_bookmarks(project_id, query)?;
    let selection = CategorySelection::from_request(categories);

    let mut category_counts = empty_category_counts();
    let mut results = Vec::with_capacity(rows.len());

    for row in rows {
        let live: Option<(String, String, String, String)> = conn
            .query_row(
                "SELECT session_id, category, content, created_at
                 FROM messages WHERE id = ?1",
                params![row.message_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .optional()?;

        // The live row only counts when it is still the same message: the id
        // must resolve inside the session the bookmark was taken in.
        let (category, content, created_at, is_orphaned) = match live {
            Some((session_id, category, content, created_at))
                if session_id == row.session_id =>
            {
                (category, content, created_at, false)
            }
            _ => (
                row.message_category.clone(),
                row.message_content.clone(),
                row.message_created_at.clone(),
                true,
            ),
        };

        if let Some(count) = category_counts.get_mut(&category) {
            *count += 1;
        }

        let keep = match &selection {
            CategorySelection::All => true,
            CategorySelection::None => false,
            CategorySelection::Some(set) => set.iter().any(|c| *c == category),
        };
        if !keep {
            continue;
        }

        results.push(BookmarkView {
            project_id: row.project_id,
            session_id: row.session_id,
            message_id: row.message_id,
            message_source_id: row.message_source_id,
            provider: row.provider,
            session_title: row.session_title,
            category,
            content,
            created_at,
            bookmarked_at: row.bookmarked_at,
            is_orphaned,
        });
    }

    Ok(BookmarkListResponse {
        project_id: project_id.to_string(),
        total_count,
        filtered_count: results.len() as i64,
        category_counts,
        results,
    })
}

/// Toggle a bookmark. Removing an existing bookmark always succeeds; adding
/// one verifies the live message still matches the given (project, session,
/// source) triple, refusing with no mutation otherwise.
pub fn toggle_bookmark(
    conn: &Connection,
    store: &BookmarkStore,
    project_id: &str,
    session_id: &str,
    message_id: &str,
    message_source_id: &str,
) -> Result<bool> {
    if store.get_bookmark(project_id, message_id)?.is_some() {
        store.remove_bookmark(project_id, message_id)?;
        return Ok(false);
    }

    let live: Option<(String, String, String, String, String, String)> = conn
        .query_row(
            "SELECT m.session_id, m.source_id, m.provider, m.category, m.content, m.created_at
             FROM messages m
             JOIN sessions s ON s.id = m.session_id
             WHERE m.id = ?1 AND s.project_id = ?2",
            params![message_id, project_id],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                ))
            },
        )
        .optional()?;

    let Some((live_session_id, live_source_id, provider, category, content, created_at)) = live
    else {
        return Ok(false);
    };
    if live_session_id != session_id || live_source_id != message_source_id {
        return Ok(false);
    }

    let snapshot = BookmarkSnapshot {
        version: SNAPSHOT_VERSION,
        project_id: project_id.to_string(),
        session_id: session_id.to_string(),
        message_id: message_id.to_string(),
        message_source_id: message_source_id.to_string(),
        provider,
        session_title: session_title(conn, session_id)?,
        category,
        content,
        created_at,
    };
    store.upsert_bookmark(&snapshot)?;
    Ok(true)
}
