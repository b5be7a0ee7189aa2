//! Read-side service over the index and bookmark databases.
//!
//! One long-lived index connection serves all listings, detail pages, and
//! search; the bookmark store handle is used for bookmark queries and
//! toggles. Reads run concurrently with the indexer thanks to WAL.

pub mod bookmarks;
pub mod projects;
pub mod search;
pub mod sessions;

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::bookmarks::BookmarkStore;
use crate::db;
use crate::model::MessageCategory;

pub use bookmarks::{BookmarkListResponse, BookmarkView};
pub use projects::{CombinedDetailResponse, CombinedMessageView, ProjectSummary};
pub use search::{SearchHit, SearchRequest, SearchResponse};
pub use sessions::{MessageView, SessionDetailRequest, SessionDetailResponse, SessionSummary};

pub const MIN_PAGE_SIZE: i64 = 1;
pub const MAX_PAGE_SIZE: i64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub(crate) fn sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

pub struct QueryService {
    conn: Option<Connection>,
    bookmark_store: Option<BookmarkStore>,
    db_path: PathBuf,
}

impl QueryService {
    /// Open the index database and its sibling bookmark store.
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = db::open(db_path).context("failed to open index database for queries")?;
        let bookmark_store = BookmarkStore::open(&db::bookmarks_db_path(db_path))?;
        Ok(Self {
            conn: Some(conn),
            bookmark_store: Some(bookmark_store),
            db_path: db_path.to_path_buf(),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Close both handles. Safe to call more than once.
    pub fn close(&mut self) {
        self.conn = None;
        self.bookmark_store = None;
    }

    pub(crate) fn conn(&self) -> Result<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("query service is closed"))
    }

    pub(crate) fn bookmark_store(&self) -> Result<&BookmarkStore> {
        self.bookmark_store
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("query service is closed"))
    }

    /// Stored schema version, falling back to the compiled one for databases
    /// no indexer has touched yet.
    pub fn schema_version(&self) -> Result<i64> {
        Ok(db::stored_schema_version(self.conn()?)?.unwrap_or(crate::SCHEMA_VERSION))
    }

    pub fn list_projects(
        &self,
        providers: Option<&[String]>,
        query: &str,
    ) -> Result<Vec<ProjectSummary>> {
        projects::list_projects(self.conn()?, providers, query)
    }

    pub fn list_sessions(&self, project_id: &str) -> Result<Vec<SessionSummary>> {
        sessions::list_sessions(self.conn()?, project_id)
    }

    pub fn session_detail(&self, request: &SessionDetailRequest) -> Result<SessionDetailResponse> {
        sessions::session_detail(self.conn()?, request)
    }

    pub fn combined_detail(
        &self,
        project_id: &str,
        request: &SessionDetailRequest,
    ) -> Result<CombinedDetailResponse> {
        projects::combined_detail(self.conn()?, project_id, request)
    }

    pub fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        search::search(self.conn()?, request)
    }

    pub fn list_project_bookmarks(
        &self,
        project_id: &str,
        query: Option<&str>,
        categories: Option<&[String]>,
    ) -> Result<BookmarkListResponse> {
        bookmarks::list_project_bookmarks(
            self.conn()?,
            self.bookmark_store()?,
            project_id,
            query,
            categories,
        )
    }

    pub fn toggle_bookmark(
        &self,
        project_id: &str,
        session_id: &str,
        message_id: &str,
        message_source_id: &str,
    ) -> Result<bool> {
        bookmarks::toggle_bookmark(
            self.conn()?,
            self.bookmark_store()?,
            project_id,
            session_id,
            message_id,
            message_source_id,
        )
    }
}

/// How a `categories` request parameter restricts results: absent means
/// everything, an empty list means nothing, otherwise the normalized set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CategorySelection {
    All,
    None,
    Some(Vec<&'static str>),
}

impl CategorySelection {
    pub(crate) fn from_request(categories: Option<&[String]>) -> Self {
        match categories {
            None => CategorySelection::All,
            Some(raw) => {
                let mut normalized: Vec<&'static str> = raw
                    .iter()
                    .filter_map(|c| MessageCategory::parse(c))
                    .map(|c| c.as_str())
                    .collect();
                normalized.sort_unstable();
                normalized.dedup();
                if normalized.is_empty() {
                    CategorySelection::None
                } else {
                    CategorySelection::Some(normalized)
                }
            }
        }
    }

    /// SQL fragment (`AND <col> IN (...)`) for this selection, or a
    /// constant-false clause for the empty selection.
    pub(crate) fn clause(&self, column: &str) -> Option<String> {
        match self {
            CategorySelection::All => None,
            CategorySelection::None => Some("1 = 0".to_string()),
            CategorySelection::Some(categories) => {
                let list = categories
                    .iter()
                    .map(|c| format!("'{c}'"))
                    .collect::<Vec<_>>()
                    .join(", ");
                Some(format!("{column} IN ({list})"))
            }
        }
    }
}

/// Clamp a requested page so its first row stays inside the result set.
pub(crate) fn clamp_page(page: i64, page_size: i64, total_count: i64) -> i64 {
    if total_count <= 0 || page_size <= 0 {
        return 0;
    }
    let max_page = (total_count - 1) / page_size;
    page.clamp(0, max_page)
}

/// First line of a message, truncated for use as a title.
pub(crate) fn title_of(content: &str) -> String {
    let first_line = content.lines().next().unwrap_or("").trim();
    let mut title: String = first_line.chars().take(200).collect();
    if first_line.chars().count() > 200 {
        title.push('…');
    }
    title
}
