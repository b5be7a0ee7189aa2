use anyhow::Result;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::CategorySelection;
use crate::model::{empty_category_counts, Provider};

/// Snippets wrap matches in `<mark>` and truncate around 64 tokens.
const SNIPPET_SQL: &str = "snippet(message_fts, 0, '<mark>', '</mark>', '…', 64)";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub categories: Option<Vec<String>>,
    #[serde(default)]
    pub providers: Option<Vec<String>>,
    #[serde(default)]
    pub project_ids: Option<Vec<String>>,
    #[serde(default)]
    pub project_query: String,
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub message_id: String,
    pub source_id: String,
    pub session_id: String,
    pub session_title: Option<String>,
    pub provider: String,
    pub category: String,
    pub snippet: String,
    pub created_at: String,
    pub project_id: Option<String>,
    pub project_name: Option<String>,
    pub rank: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub query: String,
    pub total_count: i64,
    pub category_counts: BTreeMap<String, i64>,
    pub results: Vec<SearchHit>,
}

/// Full-text search ordered by BM25 relevance.
pub fn search(conn: &Connection, request: &SearchRequest) -> Result<SearchResponse> {
    let trimmed = request.query.trim();
    if trimmed.is_empty() {
        return Ok(empty_response(&request.query));
    }

    // An explicit empty provider/project set selects nothing.
    let providers: Option<Vec<&'static str>> = request.providers.as_ref().map(|raw| {
        raw.iter()
            .filter_map(|p| Provider::parse(p))
            .map(|p| p.as_str())
            .collect()
    });
    if providers.as_ref().is_some_and(|set| set.is_empty()) {
        return Ok(empty_response(&request.query));
    }
    if request.project_ids.as_ref().is_some_and(|ids| ids.is_empty()) {
        return Ok(empty_response(&request.query));
    }

    let match_expr = escape_fts_query(trimmed);
    if match_expr.is_empty() {
        return Ok(empty_response(&request.query));
    }
    let categories = CategorySelection::from_request(request.categories.as_deref());

    let mut clauses: Vec<String> = vec!["message_fts MATCH ?1".to_string()];
    let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(match_expr)];

    if let Some(set) = &providers {
        let list = set.iter().map(|p| format!("'{p}'")).collect::<Vec<_>>().join(", ");
        clauses.push(format!("m.provider IN ({list})"));
    }
    if let Some(project_ids) = &request.project_ids {
        let placeholders: Vec<String> = project_ids
            .iter()
            .map(|id| {
                params_vec.push(Box::new(id.clone()));
                format!("?{}", params_vec.len())
            })
            .collect();
        clauses.push(format!("s.project_id IN ({})", placeholders.join(", ")));
    }
    let project_query = request.project_query.trim();
    if !project_query.is_empty() {
        clauses.push(format!(
            "(instr(lower(p.name), lower(?{n})) > 0 OR instr(lower(p.path), lower(?{n})) > 0)",
            n = params_vec.len() + 1
        ));
        params_vec.push(Box::new(project_query.to_string()));
    }

    let base_from = "FROM message_fts f
         JOIN messages m ON m.id = f.message_id
         JOIN sessions s ON s.id = m.session_id
         LEFT JOIN projects p ON p.id = s.project_id";

    // Facet counts ignore the category restriction so toggling a category
    // does not change its own count.
    let mut category_counts = empty_category_counts();
    {
        let sql = format!(
            "SELECT m.category, COUNT(*) {base_from} WHERE {} GROUP BY m.category",
            clauses.join(" AND ")
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(params_vec.iter().map(|p| p.as_ref())),
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
        )?;
        for row in rows {
            let (category, count) = row?;
            category_counts.insert(category, count);
        }
    }

    if let Some(clause) = categories.clause("m.category") {
        clauses.push(clause);
    }
    let where_sql = clauses.join(" AND ");

    let total_count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) {base_from} WHERE {where_sql}"),
        rusqlite::params_from_iter(params_vec.iter().map(|p| p.as_ref())),
        |row| row.get(0),
    )?;

    let limit = request.limit.clamp(super::MIN_PAGE_SIZE, super::MAX_PAGE_SIZE);
    let offset = request.offset.max(0);
    let sql = format!(
        "SELECT f.message_id, m.source_id, m.session_id,
                (SELECT m2.content FROM messages m2
                 WHERE m2.session_id = m.session_id
                 ORDER BY CASE m2.category WHEN 'user' THEN 0 WHEN 'assistant' THEN 1 ELSE 2 END,
                          m2.created_at ASC, m2.id ASC
                 LIMIT 1) AS session_title,
                m.provider, m.category, {SNIPPET_SQL} AS snippet,
                m.created_at, s.project_id, p.name,
                bm25(message_fts) AS rank
         {base_from}
         WHERE {where_sql}
         ORDER BY bm25(message_fts) ASC
         LIMIT {limit} OFFSET {offset}"
    );

    let mut stmt = conn.prepare(&sql)?;
    let results = stmt
        .query_map(
            rusqlite::params_from_iter(params_vec.iter().map(|p| p.as_ref())),
            |row| {
                let title: Option<String> = row.get(3)?;
                Ok(SearchHit {
                    message_id: row.get(0)?,
                    source_id: row.get(1)?,
                    session_id: row.get(2)?,
                    session_title: title.map(|t| super::title_of(&t)),
                    provider: row.get(4)?,
                    category: row.get(5)?,
                    snippet: row.get(6)?,
                    created_at: row.get(7)?,
                    project_id: row.get(8)?,
                    project_name: row.get(9)?,
                    rank: row.get(10)?,
                })
            },
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(SearchResponse {
        query: request.query.clone(),
        total_count,
        category_counts,
        results,
    })
}

fn empty_response(query: &str) -> SearchResponse {
    SearchResponse {
        query: query.to_string(),
        total_count: 0,
        category_counts: empty_category_counts(),
        results: Vec::new(),
    }
}

/// Escape free text into an FTS5 phrase query: each whitespace-separated
/// term is double-quoted with inner quotes doubled, so user input can never
/// reach the query parser as syntax. Terms with no tokenizable characters
/// are dropped (an all-punctuation phrase would be empty).
pub fn escape_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .filter(|term| term.chars().any(|c| c.is_alphanumeric()))
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use tempfile::TempDir;

    fn seed(conn: &Connection) {
        conn.execute_batch(
            "INSERT INTO projects (id, provider, name, path, created_at, updated_at) VALUES
               ('project_a', 'claude', 'api', '/w/api', '2024-01-01', '2024-01-01'),
               ('project_b', 'codex', 'cli', '/w/cli', '2024-01-01', '2024-01-01');
             INSERT INTO sessions (id, project_id, provider, file_path) VALUES
               ('session_1', 'project_a', 'claude', '/f1.jsonl'),
               ('session_2', 'project_b', 'codex', '/f2.jsonl');
             INSERT INTO messages (id, source_id, session_id, provider, category, content, created_at) VALUES
               ('msg_1', 'e1', 'session_1', 'claude', 'user', 'the parser is broken', '2024-01-01T00:00:00Z'),
               ('msg_2', 'e2', 'session_1', 'claude', 'assistant', 'fixed the tokenizer', '2024-01-01T00:00:01Z'),
               ('msg_3', 'e1', 'session_2', 'codex', 'user', 'add a subcommand', '2024-01-02T00:00:00Z');
             INSERT INTO message_fts (content, message_id, session_id, provider, category) VALUES
               ('the parser is broken', 'msg_1', 'session_1', 'claude', 'user'),
               ('fixed the tokenizer', 'msg_2', 'session_1', 'claude', 'assistant'),
               ('add a subcommand', 'msg_3', 'session_2', 'codex', 'user');",
        )
        .unwrap();
    }

    fn request(query: &str) -> SearchRequest {
        SearchRequest {
            query: query.into(),
            categories: None,
            providers: None,
            project_ids: None,
            project_query: String::new(),
            limit: 20,
            offset: 0,
        }
    }

    #[test]
    fn test_escape_fts_query() {
        assert_eq!(escape_fts_query("parser bug"), "\"parser\" \"bug\"");
        assert_eq!(escape_fts_query("say \"hi\""), "\"say\" \"\"\"hi\"\"\"");
        assert_eq!(escape_fts_query("unbalanced\"quote"), "\"unbalanced\"\"quote\"");
        // Punctuation-only terms would tokenize to empty phrases.
        assert_eq!(escape_fts_query("((( )))"), "");
        assert_eq!(escape_fts_query("AND ((("), "\"AND\"");
    }

    #[test]
    fn test_search_basic_with_snippet() {
        let tmp = TempDir::new().unwrap();
        let conn = db::open(&tmp.path().join("t.db")).unwrap();
        seed(&conn);

        let response = search(&conn, &request("parser")).unwrap();
        assert_eq!(response.total_count, 1);
        assert_eq!(response.results.len(), 1);
        assert!(response.results[0].snippet.contains("<mark>parser</mark>"));
        assert_eq!(response.results[0].session_title.as_deref(), Some("the parser is broken"));
    }

    #[test]
    fn test_search_provider_filter() {
        let tmp = TempDir::new().unwrap();
        let conn = db::open(&tmp.path().join("t.db")).unwrap();
        seed(&conn);

        let mut req = request("parser");
        req.providers = Some(vec!["codex".into()]);
        let response = search(&conn, &req).unwrap();
        assert_eq!(response.total_count, 0);
        assert!(response.results.is_empty());

        req.providers = Some(vec!["claude".into()]);
        let response = search(&conn, &req).unwrap();
        assert!(response.total_count >= 1);
        assert!(!response.results.is_empty());
    }

    #[test]
    fn test_search_empty_query_zero_shaped() {
        let tmp = TempDir::new().unwrap();
        let conn = db::open(&tmp.path().join("t.db")).unwrap();
        seed(&conn);

        let response = search(&conn, &request("   ")).unwrap();
        assert_eq!(response.total_count, 0);
        assert!(response.results.is_empty());
        assert_eq!(response.category_counts.len(), 7);
    }

    #[test]
    fn test_search_unbalanced_quote_does_not_error() {
        let tmp = TempDir::new().unwrap();
        let conn = db::open(&tmp.path().join("t.db")).unwrap();
        seed(&conn);

        let response = search(&conn, &request("parser\"")).unwrap();
        assert_eq!(response.total_count, 1);
    }

    #[test]
    fn test_search_category_facets_ignore_category_filter() {
        let tmp = TempDir::new().unwrap();
        let conn = db::open(&tmp.path().join("t.db")).unwrap();
        seed(&conn);

        let all = search(&conn, &request("the")).unwrap();
        let mut req = request("the");
        req.categories = Some(vec!["user".into()]);
        let filtered = search(&conn, &req).unwrap();

        assert_eq!(filtered.category_counts, all.category_counts);
        assert!(filtered.total_count < all.total_count);
    }

    #[test]
    fn test_search_project_query_filter() {
        let tmp = TempDir::new().unwrap();
        let conn = db::open(&tmp.path().join("t.db")).unwrap();
        seed(&conn);

        let mut req = request("subcommand");
        req.project_query = "cli".into();
        let response = search(&conn, &req).unwrap();
        assert_eq!(response.total_count, 1);

        req.project_query = "api".into();
        let response = search(&conn, &req).unwrap();
        assert_eq!(response.total_count, 0);
    }
}
