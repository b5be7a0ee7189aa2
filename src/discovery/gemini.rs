use anyhow::{Context, Result};
use std::path::Path;

use super::{file_stat, file_stem, project_name_of, DiscoveredFile, FileMetadata};
use crate::ident;
use crate::model::Provider;

/// Walk `<root>/<projectHash>/chats/*.json`, resolving project paths from the
/// `.project_root` marker kept in the parallel history mirror.
///
/// The Gemini CLI buckets sessions by an opaque project hash; the history
/// mirror maps each hash back to the real project directory. Session files
/// are whole-document JSON, and copies are common, so the identity embeds a
/// file-path hash like Codex.
pub fn discover(root: &Path, history_root: &Path, out: &mut Vec<DiscoveredFile>) -> Result<()> {
    if !root.is_dir() {
        tracing::debug!("gemini root missing, skipping: {}", root.display());
        return Ok(());
    }

    let read_dir = std::fs::read_dir(root)
        .with_context(|| format!("failed to read gemini root {}", root.display()))?;

    for entry in read_dir {
        let entry = entry.with_context(|| format!("failed to read entry in {}", root.display()))?;
        if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let project_hash = entry.file_name().to_string_lossy().to_string();
        let project_path =
            read_project_root(history_root, &project_hash).unwrap_or_else(|| project_hash.clone());
        let project_name = project_name_of(&project_path);

        let chats_dir = entry.path().join("chats");
        if !chats_dir.is_dir() {
            continue;
        }
        let chats = std::fs::read_dir(&chats_dir)
            .with_context(|| format!("failed to read chats dir {}", chats_dir.display()))?;

        for chat in chats {
            let chat = chat?;
            let path = chat.path();
            if path.extension().map(|e| e != "json").unwrap_or(true) {
                continue;
            }
            let Some(stem) = file_stem(&path) else {
                continue;
            };
            let path_str = path.to_string_lossy();
            let session_identity =
                format!("gemini:{stem}:{}", ident::path_hash(path_str.as_ref()));
            let (file_size, file_mtime_ms) = file_stat(&path);

            out.push(DiscoveredFile {
                file_path: path,
                provider: Provider::Gemini,
                project_path: project_path.clone(),
                project_name: project_name.clone(),
                session_identity,
                source_session_id: stem,
                file_size,
                file_mtime_ms,
                metadata: FileMetadata {
                    git_branch: None,
                    cwd: Some(project_path.clone()),
                },
            });
        }
    }

    Ok(())
}

/// Read `<historyRoot>/<projectHash>/.project_root`, trimmed.
fn read_project_root(history_root: &Path, project_hash: &str) -> Option<String> {
    let marker = history_root.join(project_hash).join(".project_root");
    let contents = std::fs::read_to_string(marker).ok()?;
    let trimmed = contents.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
