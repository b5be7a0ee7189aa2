#![allow(dead_code)]

use std::path::PathBuf;

use hindsight::config::DiscoveryConfig;
use hindsight::indexer::{run_incremental_indexing, IndexOutcome, IndexRequest};
use hindsight::rules::RuleOverrides;
use tempfile::TempDir;

/// A fabricated on-disk provider tree plus an index database path.
pub struct Fixture {
    pub tmp: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            tmp: TempDir::new().unwrap(),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.tmp.path().join("index.db")
    }

    pub fn discovery(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            claude_root: self.tmp.path().join("claude"),
            codex_root: self.tmp.path().join("codex"),
            gemini_root: self.tmp.path().join("gemini"),
            gemini_history_root: self.tmp.path().join("gemini-history"),
        }
    }

    pub fn index(&self) -> IndexOutcome {
        self.index_with(false, RuleOverrides::new())
    }

    pub fn index_force(&self) -> IndexOutcome {
        self.index_with(true, RuleOverrides::new())
    }

    pub fn index_with(&self, force: bool, rule_overrides: RuleOverrides) -> IndexOutcome {
        run_incremental_indexing(&IndexRequest {
            db_path: self.db_path(),
            force_reindex: force,
            discovery: self.discovery(),
            rule_overrides,
        })
        .unwrap()
    }

    /// Write a Claude session JSONL under `<claude>/<slug>/<stem>.jsonl`.
    pub fn write_claude_session(&self, slug: &str, stem: &str, lines: &[String]) -> PathBuf {
        let dir = self.tmp.path().join("claude").join(slug);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{stem}.jsonl"));
        std::fs::write(&path, lines.join("\n") + "\n").unwrap();
        path
    }

    /// Write a Codex rollout JSONL under `<codex>/<rel>`; a `session_meta`
    /// header is prepended.
    pub fn write_codex_session(
        &self,
        rel: &str,
        session_id: &str,
        cwd: &str,
        lines: &[String],
    ) -> PathBuf {
        let path = self.tmp.path().join("codex").join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let meta = format!(
            r#"{{"timestamp":"2025-02-01T09:00:00Z","type":"session_meta","payload":{{"id":"{session_id}","cwd":"{cwd}","git":{{"branch":"main"}}}}}}"#
        );
        let mut all = vec![meta];
        all.extend(lines.iter().cloned());
        std::fs::write(&path, all.join("\n") + "\n").unwrap();
        path
    }

    /// Write a Gemini chat JSON under `<gemini>/<hash>/chats/<stem>.json`,
    /// with the history-mirror `.project_root` marker.
    pub fn write_gemini_session(
        &self,
        project_hash: &str,
        project_root: &str,
        stem: &str,
        document: &str,
    ) -> PathBuf {
        let chats = self.tmp.path().join("gemini").join(project_hash).join("chats");
        std::fs::create_dir_all(&chats).unwrap();
        let marker_dir = self.tmp.path().join("gemini-history").join(project_hash);
        std::fs::create_dir_all(&marker_dir).unwrap();
        std::fs::write(marker_dir.join(".project_root"), project_root).unwrap();
        let path = chats.join(format!("{stem}.json"));
        std::fs::write(&path, document).unwrap();
        path
    }

    pub fn open_db(&self) -> rusqlite::Connection {
        rusqlite::Connection::open(self.db_path()).unwrap()
    }

    pub fn count(&self, table: &str) -> i64 {
        self.open_db()
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
            .unwrap()
    }
}

pub fn claude_user(uuid: &str, ts: &str, text: &str) -> String {
    format!(
        r#"{{"type":"user","uuid":"{uuid}","sessionId":"src","timestamp":"{ts}","cwd":"/w/api","gitBranch":"main","message":{{"role":"user","content":"{text}"}}}}"#
    )
}

pub fn claude_assistant(uuid: &str, ts: &str, text: &str) -> String {
    format!(
        r#"{{"type":"assistant","uuid":"{uuid}","sessionId":"src","timestamp":"{ts}","message":{{"role":"assistant","model":"claude-sonnet-4-5","usage":{{"input_tokens":10,"output_tokens":20}},"content":[{{"type":"text","text":"{text}"}}]}}}}"#
    )
}

pub fn claude_tool_use(uuid: &str, ts: &str, tool: &str) -> String {
    format!(
        r#"{{"type":"assistant","uuid":"{uuid}","sessionId":"src","timestamp":"{ts}","message":{{"role":"assistant","content":[{{"type":"tool_use","id":"toolu_{uuid}","name":"{tool}","input":{{"file_path":"/a"}}}}]}}}}"#
    )
}

pub fn codex_user(id: &str, ts: &str, text: &str) -> String {
    format!(
        r#"{{"timestamp":"{ts}","type":"response_item","payload":{{"type":"message","id":"{id}","role":"user","content":[{{"type":"input_text","text":"{text}"}}]}}}}"#
    )
}

pub fn codex_assistant(id: &str, ts: &str, text: &str) -> String {
    format!(
        r#"{{"timestamp":"{ts}","type":"response_item","payload":{{"type":"message","id":"{id}","role":"assistant","content":[{{"type":"output_text","text":"{text}"}}]}}}}"#
    )
}

pub fn gemini_document(session_id: &str, messages_json: &str) -> String {
    format!(r#"{{"sessionId":"{session_id}","messages":[{messages_json}]}}"#)
}
