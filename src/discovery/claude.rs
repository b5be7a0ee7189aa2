use anyhow::{Context, Result};
use std::path::Path;

use super::{file_stat, file_stem, project_name_of, DiscoveredFile, FileMetadata};
use crate::model::Provider;

/// Walk `<root>/<project-slug>/*.jsonl`.
///
/// Claude stores one directory per project, named by slugging the project
/// path (`/Users/jane/work/api` → `-Users-jane-work-api`), with one JSONL
/// file per session named by the session UUID.
pub fn discover(root: &Path, out: &mut Vec<DiscoveredFile>) -> Result<()> {
    if !root.is_dir() {
        tracing::debug!("claude root missing, skipping: {}", root.display());
        return Ok(());
    }

    let read_dir = std::fs::read_dir(root)
        .with_context(|| format!("failed to read claude root {}", root.display()))?;

    for entry in read_dir {
        let entry = entry.with_context(|| format!("failed to read entry in {}", root.display()))?;
        if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let slug = entry.file_name().to_string_lossy().to_string();
        let project_path = deslug_project_path(&slug);
        let project_name = project_name_of(&project_path);

        let session_dir = entry.path();
        let sessions = match std::fs::read_dir(&session_dir) {
            Ok(rd) => rd,
            Err(e) => {
                tracing::warn!("skipping unreadable project dir {}: {e}", session_dir.display());
                continue;
            }
        };

        for session in sessions {
            let session = session?;
            let path = session.path();
            if path.extension().map(|e| e != "jsonl").unwrap_or(true) {
                continue;
            }
            let Some(stem) = file_stem(&path) else {
                continue;
            };
            let (file_size, file_mtime_ms) = file_stat(&path);

            out.push(DiscoveredFile {
                session_identity: format!("claude:{stem}"),
                source_session_id: stem,
                file_path: path,
                provider: Provider::Claude,
                project_path: project_path.clone(),
                project_name: project_name.clone(),
                file_size,
                file_mtime_ms,
                metadata: FileMetadata::default(),
            });
        }
    }

    Ok(())
}

/// Invert Claude's project-path slugging. Lossy for path components that
/// themselves contain `-`; matches what the slug preserves.
fn deslug_project_path(slug: &str) -> String {
    if slug.starts_with('-') {
        slug.replace('-', "/")
    } else {
        slug.to_string()
    }
}
