use anyhow::{Context, Result};
use std::io::BufRead;
use std::path::Path;

use super::{file_stat, file_stem, project_name_of, DiscoveredFile, FileMetadata};
use crate::helpers::{as_record, lower_string, read_record, read_string};
use crate::ident;
use crate::model::Provider;

/// How many leading lines to scan for the session header before giving up.
const META_SCAN_LINES: usize = 40;

/// Walk `<root>/YYYY/MM/DD/**/*.jsonl`.
///
/// Codex rollout files carry a `session_meta` event near the top with the
/// source session id, working directory, and git branch. Because users copy
/// rollout files around, the session identity embeds a file-path hash so
/// identical source ids in different files stay distinct.
pub fn discover(root: &Path, out: &mut Vec<DiscoveredFile>) -> Result<()> {
    if !root.is_dir() {
        tracing::debug!("codex root missing, skipping: {}", root.display());
        return Ok(());
    }
    walk(root, out)
}

fn walk(dir: &Path, out: &mut Vec<DiscoveredFile>) -> Result<()> {
    let read_dir = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory {}", dir.display()))?;

    for entry in read_dir {
        let entry = entry.with_context(|| format!("failed to read entry in {}", dir.display()))?;
        let path = entry.path();
        let file_type = entry
            .file_type()
            .with_context(|| format!("failed to get file type for {}", path.display()))?;

        if file_type.is_dir() {
            walk(&path, out)?;
        } else if file_type.is_file() && path.extension().map(|e| e == "jsonl").unwrap_or(false) {
            if let Some(file) = discover_file(&path) {
                out.push(file);
            }
        }
    }

    Ok(())
}

fn discover_file(path: &Path) -> Option<DiscoveredFile> {
    let meta = read_session_meta(path);
    let stem = file_stem(path)?;
    let source_session_id = meta
        .as_ref()
        .and_then(|m| m.id.clone())
        .unwrap_or_else(|| stem.clone());

    let path_str = path.to_string_lossy();
    let session_identity = format!(
        "codex:{source_session_id}:{}",
        ident::path_hash(path_str.as_ref())
    );

    let cwd = meta.as_ref().and_then(|m| m.cwd.clone());
    let git_branch = meta.as_ref().and_then(|m| m.git_branch.clone());
    let project_path = cwd.clone().unwrap_or_else(|| "unknown".to_string());
    let (file_size, file_mtime_ms) = file_stat(path);

    Some(DiscoveredFile {
        file_path: path.to_path_buf(),
        provider: Provider::Codex,
        project_name: project_name_of(&project_path),
        project_path,
        session_identity,
        source_session_id,
        file_size,
        file_mtime_ms,
        metadata: FileMetadata { git_branch, cwd },
    })
}

struct SessionMeta {
    id: Option<String>,
    cwd: Option<String>,
    git_branch: Option<String>,
}

/// Scan the head of a rollout file for its `session_meta` event.
fn read_session_meta(path: &Path) -> Option<SessionMeta> {
    let file = std::fs::File::open(path).ok()?;
    let reader = std::io::BufReader::new(file);

    for line in reader.lines().take(META_SCAN_LINES) {
        let line = line.ok()?;
        if line.trim().is_empty() {
            continue;
        }
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&line) else {
            continue;
        };
        let Some(record) = as_record(&value) else {
            continue;
        };
        if lower_string(record, "type").as_deref() != Some("session_meta") {
            continue;
        }
        let Some(payload) = read_record(record, "payload") else {
            continue;
        };
        return Some(SessionMeta {
            id: read_string(payload, "id"),
            cwd: read_string(payload, "cwd"),
            git_branch: read_record(payload, "git").and_then(|git| read_string(git, "branch")),
        });
    }

    None
}
