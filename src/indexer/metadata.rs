//! Session-level metadata pulled from raw provider payloads: model names,
//! git branch, and working directory. Kept separate from message parsing so
//! session rows can be rebuilt without reinterpreting conversation content.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::helpers::{as_record, lower_string, read_array, read_record, read_string};
use crate::model::Provider;

#[derive(Debug, Clone, Default)]
pub struct SourceMetadata {
    pub models: BTreeSet<String>,
    pub git_branch: Option<String>,
    pub cwd: Option<String>,
}

pub fn extract_source_metadata(provider: Provider, payload: &str) -> SourceMetadata {
    match provider {
        Provider::Claude => extract_claude(payload),
        Provider::Codex => extract_codex(payload),
        Provider::Gemini => extract_gemini(payload),
    }
}

fn extract_claude(payload: &str) -> SourceMetadata {
    let mut meta = SourceMetadata::default();
    for line in payload.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        let Some(record) = as_record(&value) else {
            continue;
        };
        if let Some(message) = read_record(record, "message") {
            if let Some(model) = read_string(message, "model") {
                meta.models.insert(model);
            }
        }
        if meta.git_branch.is_none() {
            meta.git_branch = read_string(record, "gitBranch").filter(|s| !s.is_empty());
        }
        if meta.cwd.is_none() {
            meta.cwd = read_string(record, "cwd").filter(|s| !s.is_empty());
        }
    }
    meta
}

fn extract_codex(payload: &str) -> SourceMetadata {
    let mut meta = SourceMetadata::default();
    for line in payload.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        let Some(record) = as_record(&value) else {
            continue;
        };
        let Some(payload_record) = read_record(record, "payload") else {
            continue;
        };
        match lower_string(record, "type").as_deref() {
            Some("session_meta") => {
                if meta.cwd.is_none() {
                    meta.cwd = read_string(payload_record, "cwd").filter(|s| !s.is_empty());
                }
                if meta.git_branch.is_none() {
                    meta.git_branch = read_record(payload_record, "git")
                        .and_then(|git| read_string(git, "branch"))
                        .filter(|s| !s.is_empty());
                }
            }
            Some("turn_context") => {
                if let Some(model) = read_string(payload_record, "model") {
                    meta.models.insert(model);
                }
            }
            _ => {
                if let Some(model) = read_string(payload_record, "model") {
                    meta.models.insert(model);
                }
            }
        }
    }
    meta
}

fn extract_gemini(payload: &str) -> SourceMetadata {
    let mut meta = SourceMetadata::default();
    let Ok(document) = serde_json::from_str::<Value>(payload) else {
        return meta;
    };
    let Some(doc) = as_record(&document) else {
        return meta;
    };
    if let Some(model) = read_string(doc, "model") {
        meta.models.insert(model);
    }
    if let Some(messages) = read_array(doc, "messages") {
        for message in messages {
            if let Some(record) = message.as_object() {
                if let Some(model) = crate::parse::gemini::message_model(record) {
                    meta.models.insert(model);
                }
            }
        }
    }
    meta
}
