//! The request/response contract between the data plane and the UI shell.
//!
//! Every operation is a named channel with a validated request and a typed
//! response. Malformed payloads fail with [`IpcError::Validation`], a class
//! the shell can distinguish from internal failures.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::HindsightConfig;
use crate::db;
use crate::query::{QueryService, SearchRequest, SessionDetailRequest, MAX_PAGE_SIZE, MIN_PAGE_SIZE};
use crate::runner::IndexingRunner;

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("invalid request on {channel}: {message}")]
    Validation { channel: String, message: String },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IpcError {
    pub fn validation(channel: &str, message: impl Into<String>) -> Self {
        Self::Validation {
            channel: channel.to_string(),
            message: message.into(),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, IpcError::Validation { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    AppGetHealth,
    AppGetSettingsInfo,
    DbGetSchemaVersion,
    IndexerRefresh,
    ProjectsList,
    SessionsList,
    SessionsGetDetail,
    ProjectsGetCombinedDetail,
    BookmarksListProject,
    BookmarksToggle,
    SearchQuery,
    PathOpenInFileManager,
}

impl Channel {
    pub const ALL: [Channel; 12] = [
        Channel::AppGetHealth,
        Channel::AppGetSettingsInfo,
        Channel::DbGetSchemaVersion,
        Channel::IndexerRefresh,
        Channel::ProjectsList,
        Channel::SessionsList,
        Channel::SessionsGetDetail,
        Channel::ProjectsGetCombinedDetail,
        Channel::BookmarksListProject,
        Channel::BookmarksToggle,
        Channel::SearchQuery,
        Channel::PathOpenInFileManager,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Channel::AppGetHealth => "app:getHealth",
            Channel::AppGetSettingsInfo => "app:getSettingsInfo",
            Channel::DbGetSchemaVersion => "db:getSchemaVersion",
            Channel::IndexerRefresh => "indexer:refresh",
            Channel::ProjectsList => "projects:list",
            Channel::SessionsList => "sessions:list",
            Channel::SessionsGetDetail => "sessions:getDetail",
            Channel::ProjectsGetCombinedDetail => "projects:getCombinedDetail",
            Channel::BookmarksListProject => "bookmarks:listProject",
            Channel::BookmarksToggle => "bookmarks:toggle",
            Channel::SearchQuery => "search:query",
            Channel::PathOpenInFileManager => "path:openInFileManager",
        }
    }

    pub fn from_name(name: &str) -> Option<Channel> {
        Channel::ALL.into_iter().find(|c| c.name() == name)
    }
}

/// Everything dispatch needs: the read service, the refresh queue, and the
/// configuration the settings channel reports.
pub struct IpcContext {
    pub query: QueryService,
    pub runner: IndexingRunner,
    pub config: HindsightConfig,
    pub settings_file: std::path::PathBuf,
}

/// Route one request to its handler.
pub fn dispatch(ctx: &IpcContext, channel_name: &str, payload: Value) -> Result<Value, IpcError> {
    let Some(channel) = Channel::from_name(channel_name) else {
        return Err(IpcError::validation(
            channel_name,
            "unknown channel".to_string(),
        ));
    };
    let name = channel.name();

    match channel {
        Channel::AppGetHealth => {
            let _: EmptyRequest = parse_request(name, payload)?;
            Ok(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
        }
        Channel::AppGetSettingsInfo => {
            let _: EmptyRequest = parse_request(name, payload)?;
            to_value(settings_info(ctx))
        }
        Channel::DbGetSchemaVersion => {
            let _: EmptyRequest = parse_request(name, payload)?;
            let version = ctx.query.schema_version()?;
            Ok(json!({ "schemaVersion": version }))
        }
        Channel::IndexerRefresh => {
            let request: RefreshRequest = parse_request(name, payload)?;
            // The job handle is intentionally dropped: refreshes run to
            // completion whether or not anyone awaits them.
            let job = ctx.runner.enqueue(request.force);
            Ok(json!({ "jobId": job.job_id }))
        }
        Channel::ProjectsList => {
            let request: ProjectsListRequest = parse_request(name, payload)?;
            let projects = ctx
                .query
                .list_projects(request.providers.as_deref(), &request.query)?;
            Ok(json!({ "projects": projects }))
        }
        Channel::SessionsList => {
            let request: SessionsListRequest = parse_request(name, payload)?;
            let sessions = ctx.query.list_sessions(&request.project_id)?;
            Ok(json!({ "sessions": sessions }))
        }
        Channel::SessionsGetDetail => {
            let request: SessionDetailRequest = parse_request(name, payload)?;
            validate_paging(name, request.page, request.page_size)?;
            to_value(ctx.query.session_detail(&request)?)
        }
        Channel::ProjectsGetCombinedDetail => {
            let request: CombinedDetailIpcRequest = parse_request(name, payload)?;
            validate_paging(name, request.page, request.page_size)?;
            let detail = ctx
                .query
                .combined_detail(&request.project_id, &request.to_detail_request())?;
            to_value(detail)
        }
        Channel::BookmarksListProject => {
            let request: BookmarksListRequest = parse_request(name, payload)?;
            let response = ctx.query.list_project_bookmarks(
                &request.project_id,
                request.query.as_deref(),
                request.categories.as_deref(),
            )?;
            to_value(response)
        }
        Channel::BookmarksToggle => {
            let request: BookmarksToggleRequest = parse_request(name, payload)?;
            let bookmarked = ctx.query.toggle_bookmark(
                &request.project_id,
                &request.session_id,
                &request.message_id,
                &request.message_source_id,
            )?;
            Ok(json!({ "bookmarked": bookmarked }))
        }
        Channel::SearchQuery => {
            let request: SearchRequest = parse_request(name, payload)?;
            if request.limit < MIN_PAGE_SIZE || request.limit > MAX_PAGE_SIZE {
                return Err(IpcError::validation(
                    name,
                    format!("limit must be in [{MIN_PAGE_SIZE}, {MAX_PAGE_SIZE}]"),
                ));
            }
            if request.offset < 0 {
                return Err(IpcError::validation(name, "offset must be non-negative"));
            }
            to_value(ctx.query.search(&request)?)
        }
        Channel::PathOpenInFileManager => {
            let request: PathOpenRequest = parse_request(name, payload)?;
            match open::that(&request.path) {
                Ok(()) => Ok(json!({ "ok": true })),
                Err(e) => Ok(json!({ "ok": false, "error": e.to_string() })),
            }
        }
    }
}

fn parse_request<T: DeserializeOwned>(channel: &str, payload: Value) -> Result<T, IpcError> {
    let payload = if payload.is_null() { json!({}) } else { payload };
    serde_json::from_value(payload).map_err(|e| IpcError::validation(channel, e.to_string()))
}

fn validate_paging(channel: &str, page: i64, page_size: i64) -> Result<(), IpcError> {
    if page < 0 {
        return Err(IpcError::validation(channel, "page must be non-negative"));
    }
    if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
        return Err(IpcError::validation(
            channel,
            format!("pageSize must be in [{MIN_PAGE_SIZE}, {MAX_PAGE_SIZE}]"),
        ));
    }
    Ok(())
}

fn to_value<T: Serialize>(value: T) -> Result<Value, IpcError> {
    serde_json::to_value(value)
        .map_err(|e| IpcError::Internal(anyhow::anyhow!("failed to serialize response: {e}")))
}

fn settings_info(ctx: &IpcContext) -> SettingsInfo {
    let db_path = ctx.query.db_path().to_path_buf();
    SettingsInfo {
        storage: StorageInfo {
            settings_file: ctx.settings_file.display().to_string(),
            cache_dir: crate::config::user_data_dir().display().to_string(),
            database_file: db_path.display().to_string(),
            bookmarks_database_file: db::bookmarks_db_path(&db_path).display().to_string(),
            user_data_dir: crate::config::user_data_dir().display().to_string(),
        },
        discovery: DiscoveryInfo {
            claude_root: ctx.config.discovery.claude_root.clone(),
            codex_root: ctx.config.discovery.codex_root.clone(),
            gemini_root: ctx.config.discovery.gemini_root.clone(),
            gemini_history_root: ctx.config.discovery.gemini_history_root.clone(),
            gemini_projects_path: ctx.config.discovery.gemini_projects_path.clone(),
        },
    }
}

// ---------------------------------------------------------------------------
// Request/response shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EmptyRequest {}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RefreshRequest {
    #[serde(default)]
    force: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ProjectsListRequest {
    #[serde(default)]
    providers: Option<Vec<String>>,
    #[serde(default)]
    query: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SessionsListRequest {
    #[serde(default)]
    project_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct CombinedDetailIpcRequest {
    project_id: String,
    #[serde(default)]
    page: i64,
    page_size: i64,
    #[serde(default)]
    sort_direction: crate::query::SortDirection,
    #[serde(default)]
    categories: Option<Vec<String>>,
    #[serde(default)]
    query: String,
    #[serde(default)]
    focus_message_id: Option<String>,
    #[serde(default)]
    focus_source_id: Option<String>,
}

impl CombinedDetailIpcRequest {
    fn to_detail_request(&self) -> SessionDetailRequest {
        SessionDetailRequest {
            session_id: String::new(),
            page: self.page,
            page_size: self.page_size,
            sort_direction: self.sort_direction,
            categories: self.categories.clone(),
            query: self.query.clone(),
            focus_message_id: self.focus_message_id.clone(),
            focus_source_id: self.focus_source_id.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct BookmarksListRequest {
    project_id: String,
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    categories: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct BookmarksToggleRequest {
    project_id: String,
    session_id: String,
    message_id: String,
    message_source_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PathOpenRequest {
    path: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SettingsInfo {
    storage: StorageInfo,
    discovery: DiscoveryInfo,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StorageInfo {
    settings_file: String,
    cache_dir: String,
    database_file: String,
    bookmarks_database_file: String,
    user_data_dir: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DiscoveryInfo {
    claude_root: String,
    codex_root: String,
    gemini_root: String,
    gemini_history_root: String,
    gemini_projects_path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_names_roundtrip() {
        for channel in Channel::ALL {
            assert_eq!(Channel::from_name(channel.name()), Some(channel));
        }
        assert_eq!(Channel::from_name("app:doesNotExist"), None);
    }

    #[test]
    fn test_parse_request_rejects_unknown_fields() {
        let result: Result<RefreshRequest, _> =
            parse_request("indexer:refresh", json!({ "force": true, "extra": 1 }));
        assert!(result.is_err());

        let result: Result<RefreshRequest, _> =
            parse_request("indexer:refresh", json!({ "force": true }));
        assert!(result.unwrap().force);
    }

    #[test]
    fn test_parse_request_null_is_empty() {
        let result: Result<EmptyRequest, _> = parse_request("app:getHealth", Value::Null);
        assert!(result.is_ok());
    }

    #[test]
    fn test_validate_paging() {
        assert!(validate_paging("sessions:getDetail", 0, 50).is_ok());
        assert!(validate_paging("sessions:getDetail", -1, 50).is_err());
        assert!(validate_paging("sessions:getDetail", 0, 0).is_err());
        assert!(validate_paging("sessions:getDetail", 0, 501).is_err());
        assert!(validate_paging("sessions:getDetail", 0, 500).is_ok());
    }

    #[test]
    fn test_validation_error_class_is_distinct() {
        let validation = IpcError::validation("sessions:getDetail", "bad");
        assert!(validation.is_validation());
        let internal = IpcError::Internal(anyhow::anyhow!("db exploded"));
        assert!(!internal.is_validation());
    }
}
