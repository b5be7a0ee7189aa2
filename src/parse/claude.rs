//! Claude session events (JSONL, one event per line).
//!
//! Conversation events carry a `message` envelope whose `content` is either a
//! plain string or an array of typed blocks. Each block becomes one segment.

use serde_json::{Map, Value};

use super::{serialize, tool_use_category, unknown_shape_output, EventContext, EventOutput, Segment};
use crate::helpers::{
    extract_text, extract_timestamp, extract_usage, lower_string, read_record, read_str,
    read_string,
};
use crate::model::MessageCategory;

/// Event types that are bookkeeping noise, skipped without diagnostics.
const NOISE_TYPES: &[&str] = &[
    "progress",
    "summary",
    "file-history-snapshot",
    "queue-operation",
];

pub(crate) fn reduce(
    record: &Map<String, Value>,
    index: usize,
    ctx: &mut EventContext<'_>,
) -> Option<EventOutput> {
    let event_type = lower_string(record, "type").unwrap_or_default();

    match event_type.as_str() {
        "user" | "assistant" => Some(reduce_conversation(record, &event_type)),
        "system" => Some(reduce_system(record)),
        t if NOISE_TYPES.contains(&t) => None,
        _ => Some(unknown_shape_output(record, index, ctx)),
    }
}

fn reduce_conversation(record: &Map<String, Value>, event_type: &str) -> EventOutput {
    let message = read_record(record, "message");

    // Event type takes precedence; the envelope role is the fallback.
    let role_category = match event_type {
        "assistant" => MessageCategory::Assistant,
        "user" => MessageCategory::User,
        _ => message
            .and_then(|m| lower_string(m, "role"))
            .filter(|r| r == "assistant")
            .map(|_| MessageCategory::Assistant)
            .unwrap_or(MessageCategory::User),
    };

    let (token_input, token_output) = message.map(extract_usage).unwrap_or((None, None));

    let mut segments = Vec::new();
    if let Some(content) = message.and_then(|m| m.get("content")) {
        collect_content_segments(content, role_category, &mut segments);
    }

    EventOutput {
        source_id: read_string(record, "uuid").or_else(|| read_string(record, "id")),
        created_at: extract_timestamp(record),
        token_input,
        token_output,
        segments,
    }
}

fn collect_content_segments(
    content: &Value,
    role_category: MessageCategory,
    segments: &mut Vec<Segment>,
) {
    match content {
        Value::String(text) => segments.push(Segment::new(role_category, text.clone())),
        Value::Array(blocks) => {
            for block in blocks {
                let Some(block_record) = block.as_object() else {
                    continue;
                };
                match lower_string(block_record, "type").as_deref() {
                    Some("text") => {
                        if let Some(text) = read_str(block_record, "text") {
                            segments.push(Segment::new(role_category, text));
                        }
                    }
                    Some("thinking") => {
                        if let Some(text) = read_str(block_record, "thinking")
                            .or_else(|| read_str(block_record, "text"))
                        {
                            segments.push(Segment::new(MessageCategory::Thinking, text));
                        }
                    }
                    Some("tool_use") => {
                        let name = read_str(block_record, "name").unwrap_or("");
                        let serialized = serialize(block);
                        let category = tool_use_category(name, &serialized);
                        segments.push(Segment::new(category, serialized));
                    }
                    Some("tool_result") => {
                        let content = block_record
                            .get("content")
                            .and_then(extract_text)
                            .unwrap_or_else(|| serialize(block));
                        segments.push(Segment::new(MessageCategory::ToolResult, content));
                    }
                    _ => {
                        // Unknown block shapes keep their payload searchable.
                        segments.push(Segment::new(MessageCategory::System, serialize(block)));
                    }
                }
            }
        }
        other => {
            if let Some(text) = extract_text(other) {
                segments.push(Segment::new(role_category, text));
            }
        }
    }
}

fn reduce_system(record: &Map<String, Value>) -> EventOutput {
    let content = record
        .get("content")
        .and_then(extract_text)
        .unwrap_or_else(|| serialize(&Value::Object(record.clone())));

    EventOutput {
        source_id: read_string(record, "uuid").or_else(|| read_string(record, "id")),
        created_at: extract_timestamp(record),
        segments: vec![Segment::new(MessageCategory::System, content)],
        ..Default::default()
    }
}
