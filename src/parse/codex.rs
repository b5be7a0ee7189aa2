//! Codex rollout events (JSONL, one event per line).
//!
//! Events wrap a typed `payload`; conversation items arrive as
//! `response_item` / `event_msg` records. Tool outputs may carry a native
//! execution duration, either as a top-level numeric field or embedded in a
//! JSON-encoded `output` string.

use serde_json::{Map, Value};

use super::{serialize, tool_use_category, unknown_shape_output, EventContext, EventOutput, Segment};
use crate::helpers::{
    extract_timestamp, extract_usage, lower_string, read_array, read_f64, read_record, read_str,
    read_string,
};
use crate::model::MessageCategory;

const DURATION_KEYS: &[&str] = &["duration_seconds", "exec_duration_seconds", "duration"];

/// How deep to chase duration fields through nested/embedded JSON.
const DURATION_SEARCH_DEPTH: usize = 4;

pub(crate) fn reduce(
    record: &Map<String, Value>,
    index: usize,
    ctx: &mut EventContext<'_>,
) -> Option<EventOutput> {
    let event_type = lower_string(record, "type").unwrap_or_default();

    match event_type.as_str() {
        // Consumed by discovery; carries no conversation content.
        "session_meta" => None,
        "turn_context" => None,
        "response_item" | "event_msg" | "request_item" => {
            let Some(payload) = read_record(record, "payload") else {
                return Some(unknown_shape_output(record, index, ctx));
            };
            reduce_payload(record, payload, index, ctx)
        }
        _ => Some(unknown_shape_output(record, index, ctx)),
    }
}

fn reduce_payload(
    record: &Map<String, Value>,
    payload: &Map<String, Value>,
    index: usize,
    ctx: &mut EventContext<'_>,
) -> Option<EventOutput> {
    let payload_type = lower_string(payload, "type").unwrap_or_default();
    let created_at = extract_timestamp(record);
    let source_id = read_string(payload, "id")
        .or_else(|| read_string(payload, "call_id"))
        .or_else(|| read_string(record, "id"));

    let mut output = EventOutput {
        source_id,
        created_at,
        ..Default::default()
    };

    match payload_type.as_str() {
        "message" => {
            let category = match lower_string(payload, "role").as_deref() {
                Some("assistant") => MessageCategory::Assistant,
                _ => MessageCategory::User,
            };
            let (token_input, token_output) = extract_usage(payload);
            output.token_input = token_input;
            output.token_output = token_output;
            if let Some(items) = read_array(payload, "content") {
                for item in items {
                    if let Some(text) = item
                        .as_object()
                        .and_then(|rec| read_str(rec, "text"))
                        .or_else(|| item.as_str())
                    {
                        output.segments.push(Segment::new(category, text));
                    }
                }
            } else if let Some(text) = read_str(payload, "content") {
                output.segments.push(Segment::new(category, text));
            }
        }
        "reasoning" => {
            for key in ["summary", "content"] {
                if let Some(items) = read_array(payload, key) {
                    for item in items {
                        if let Some(text) = item
                            .as_object()
                            .and_then(|rec| read_str(rec, "text"))
                            .or_else(|| item.as_str())
                        {
                            output
                                .segments
                                .push(Segment::new(MessageCategory::Thinking, text));
                        }
                    }
                }
            }
        }
        "function_call" | "custom_tool_call" | "local_shell_call" => {
            let name = read_str(payload, "name").unwrap_or("shell");
            let serialized = serialize(&Value::Object(payload.clone()));
            let category = tool_use_category(name, &serialized);
            output.segments.push(Segment::new(category, serialized));
        }
        "function_call_output" | "custom_tool_call_output" => {
            let content = payload
                .get("output")
                .and_then(output_text)
                .unwrap_or_else(|| serialize(&Value::Object(payload.clone())));
            let mut segment = Segment::new(MessageCategory::ToolResult, content);
            if let Some(duration_ms) = native_duration_ms(payload) {
                segment = segment.with_native_duration(duration_ms);
            }
            output.segments.push(segment);
        }
        _ => return Some(unknown_shape_output(record, index, ctx)),
    }

    Some(output)
}

/// Tool output bodies are strings, `{content: ...}` wrappers, or structured
/// records; keep whatever text is most useful for search.
fn output_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(rec) => read_str(rec, "content")
            .or_else(|| read_str(rec, "output"))
            .map(|s| s.to_string())
            .or_else(|| Some(serialize(value))),
        _ => Some(serialize(value)),
    }
}

/// Native execution duration in milliseconds, when the payload carries one.
///
/// Top-level numeric keys win; otherwise JSON-encoded `output` strings are
/// parsed and searched recursively for the same keys. Values are seconds.
fn native_duration_ms(payload: &Map<String, Value>) -> Option<u64> {
    for key in DURATION_KEYS {
        if let Some(seconds) = read_f64(payload, key) {
            return seconds_to_ms(seconds);
        }
    }
    find_duration_seconds(&Value::Object(payload.clone()), DURATION_SEARCH_DEPTH)
        .and_then(seconds_to_ms)
}

fn find_duration_seconds(value: &Value, depth: usize) -> Option<f64> {
    if depth == 0 {
        return None;
    }
    match value {
        Value::Object(record) => {
            for key in DURATION_KEYS {
                if let Some(seconds) = read_f64(record, key) {
                    return Some(seconds);
                }
            }
            record
                .values()
                .find_map(|v| find_duration_seconds(v, depth - 1))
        }
        Value::Array(items) => items.iter().find_map(|v| find_duration_seconds(v, depth - 1)),
        Value::String(s) => {
            let embedded: Value = serde_json::from_str(s).ok()?;
            find_duration_seconds(&embedded, depth - 1)
        }
        _ => None,
    }
}

fn seconds_to_ms(seconds: f64) -> Option<u64> {
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Some((seconds * 1000.0).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{diag_code, DurationConfidence, DurationSource, Provider};
    use crate::parse::parse;

    #[test]
    fn test_message_roles() {
        let payload = concat!(
            r#"{"timestamp":"2025-02-01T09:00:01Z","type":"response_item","payload":{"type":"message","id":"m1","role":"user","content":[{"type":"input_text","text":"run the tests"}]}}"#,
            "\n",
            r#"{"timestamp":"2025-02-01T09:00:02Z","type":"response_item","payload":{"type":"message","id":"m2","role":"assistant","content":[{"type":"output_text","text":"running"}]}}"#,
        );
        let outcome = parse(Provider::Codex, "session_x", payload);
        assert_eq!(outcome.messages.len(), 2);
        assert_eq!(outcome.messages[0].category, MessageCategory::User);
        assert_eq!(outcome.messages[1].category, MessageCategory::Assistant);
        assert_eq!(outcome.messages[0].id, "m1");
    }

    #[test]
    fn test_reasoning_becomes_thinking() {
        let payload = r#"{"timestamp":"2025-02-01T09:00:01Z","type":"response_item","payload":{"type":"reasoning","id":"r1","summary":[{"type":"summary_text","text":"planning the fix"}]}}"#;
        let outcome = parse(Provider::Codex, "session_x", payload);
        assert_eq!(outcome.messages.len(), 1);
        assert_eq!(outcome.messages[0].category, MessageCategory::Thinking);
        assert_eq!(outcome.messages[0].content, "planning the fix");
    }

    #[test]
    fn test_function_call_and_output_with_native_duration() {
        let payload = concat!(
            r#"{"timestamp":"2025-02-01T09:00:03Z","type":"response_item","payload":{"type":"function_call","id":"f1","call_id":"c1","name":"shell","arguments":"{\"command\":[\"ls\"]}"}}"#,
            "\n",
            r#"{"timestamp":"2025-02-01T09:00:05Z","type":"response_item","payload":{"type":"function_call_output","call_id":"c1","duration_seconds":1.5,"output":"ok"}}"#,
        );
        let outcome = parse(Provider::Codex, "session_x", payload);
        assert_eq!(outcome.messages.len(), 2);
        assert_eq!(outcome.messages[0].category, MessageCategory::ToolUse);

        let result = &outcome.messages[1];
        assert_eq!(result.category, MessageCategory::ToolResult);
        assert_eq!(result.operation_duration_ms, Some(1500));
        assert_eq!(result.operation_duration_source, Some(DurationSource::Native));
        assert_eq!(
            result.operation_duration_confidence,
            Some(DurationConfidence::High)
        );
    }

    #[test]
    fn test_duration_embedded_in_json_output_string() {
        let payload = r#"{"timestamp":"2025-02-01T09:00:05Z","type":"response_item","payload":{"type":"custom_tool_call_output","call_id":"c2","output":"{\"metadata\":{\"exec_duration_seconds\":2.25},\"content\":\"done\"}"}}"#;
        let outcome = parse(Provider::Codex, "session_x", payload);
        assert_eq!(outcome.messages.len(), 1);
        assert_eq!(outcome.messages[0].operation_duration_ms, Some(2250));
    }

    #[test]
    fn test_apply_patch_promoted_to_edit() {
        let payload = r#"{"timestamp":"2025-02-01T09:00:03Z","type":"response_item","payload":{"type":"function_call","call_id":"c3","name":"shell","arguments":"{\"command\":[\"apply_patch\",\"*** Begin Patch\"]}"}}"#;
        let outcome = parse(Provider::Codex, "session_x", payload);
        assert_eq!(outcome.messages[0].category, MessageCategory::ToolEdit);
    }

    #[test]
    fn test_session_meta_skipped() {
        let payload = r#"{"timestamp":"2025-02-01T09:00:00Z","type":"session_meta","payload":{"id":"s1","cwd":"/w"}}"#;
        let outcome = parse(Provider::Codex, "session_x", payload);
        assert!(outcome.messages.is_empty());
        // Only the empty-file warning remains.
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.diagnostics[0].code, diag_code::NO_EVENTS_FOUND);
    }

    #[test]
    fn test_unknown_payload_type() {
        let payload = r#"{"timestamp":"2025-02-01T09:00:00Z","type":"response_item","payload":{"type":"compaction","id":"x1"}}"#;
        let outcome = parse(Provider::Codex, "session_x", payload);
        assert_eq!(outcome.messages.len(), 1);
        assert_eq!(outcome.messages[0].category, MessageCategory::System);
        assert!(outcome
            .diagnostics
            .iter()
            .any(|d| d.code == diag_code::UNKNOWN_EVENT_SHAPE));
    }
}
