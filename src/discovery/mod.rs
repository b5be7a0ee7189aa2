pub mod claude;
pub mod codex;
pub mod gemini;

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::config::DiscoveryConfig;
use crate::model::Provider;

/// Session-file metadata captured at discovery time, when the provider
/// surfaces it cheaply (Codex session headers).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileMetadata {
    pub git_branch: Option<String>,
    pub cwd: Option<String>,
}

/// A provider session file located on disk, with the identities the indexer
/// needs to reconcile it against previously indexed state.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    pub file_path: PathBuf,
    pub provider: Provider,
    pub project_path: String,
    pub project_name: String,
    /// Provider-namespaced uniqueness key. Codex and Gemini identities embed
    /// a file-path hash so copied files with identical source ids stay
    /// distinct.
    pub session_identity: String,
    pub source_session_id: String,
    pub file_size: u64,
    pub file_mtime_ms: u64,
    pub metadata: FileMetadata,
}

/// Enumerate all provider session files. Missing roots are skipped; the
/// result is ordered by (provider, path).
pub fn discover_all(config: &DiscoveryConfig) -> Result<Vec<DiscoveredFile>> {
    let mut files = Vec::new();

    claude::discover(&config.claude_root, &mut files)?;
    codex::discover(&config.codex_root, &mut files)?;
    gemini::discover(&config.gemini_root, &config.gemini_history_root, &mut files)?;

    files.sort_by(|a, b| {
        a.provider
            .cmp(&b.provider)
            .then_with(|| a.file_path.cmp(&b.file_path))
    });

    for provider in Provider::ALL {
        let count = files.iter().filter(|f| f.provider == provider).count();
        tracing::debug!("discovery: {provider} = {count} files");
    }
    tracing::info!("discovery: {} session files total", files.len());

    Ok(files)
}

/// (size, mtime in ms) for a file, best effort.
pub(crate) fn file_stat(path: &Path) -> (u64, u64) {
    match std::fs::metadata(path) {
        Ok(metadata) => {
            let mtime_ms = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0);
            (metadata.len(), mtime_ms)
        }
        Err(_) => (0, 0),
    }
}

/// Last path component, used as the human-facing project name.
pub(crate) fn project_name_of(project_path: &str) -> String {
    project_path
        .replace('\\', "/")
        .rsplit('/')
        .find(|s| !s.is_empty())
        .unwrap_or(project_path)
        .to_string()
}

/// File stem as a string, or `None` for nameless paths.
pub(crate) fn file_stem(path: &Path) -> Option<String> {
    path.file_stem().map(|s| s.to_string_lossy().to_string())
}
