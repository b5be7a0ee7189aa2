//! Gemini chat sessions (one JSON document per file).
//!
//! The document carries a `messages` array; each message may hold text
//! content, thought summaries, and tool calls with inline results. Thoughts
//! precede the text, tool calls follow it.

use serde_json::{Map, Value};

use super::{serialize, tool_use_category, Assembler, EventOutput, ParseOutcome, Segment};
use crate::helpers::{
    as_record, extract_text, extract_timestamp, extract_usage, lower_string, read_array,
    read_record, read_str, read_string,
};
use crate::model::{diag_code, Diagnostic, MessageCategory, Provider};

pub(crate) fn parse(session_id: &str, payload: &str) -> ParseOutcome {
    let mut outcome = ParseOutcome::default();

    let document: Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(e) => {
            outcome.diagnostics.push(Diagnostic::error(
                diag_code::NON_OBJECT_EVENT,
                Provider::Gemini,
                session_id,
                None,
                format!("session document is not valid JSON: {e}"),
            ));
            return outcome;
        }
    };

    let messages = as_record(&document).and_then(|doc| read_array(doc, "messages"));
    let Some(messages) = messages else {
        outcome.diagnostics.push(Diagnostic::warning(
            diag_code::UNKNOWN_EVENT_SHAPE,
            Provider::Gemini,
            session_id,
            None,
            "session document has no messages array",
        ));
        return outcome;
    };

    let mut assembler = Assembler::new(Provider::Gemini, session_id);
    for (index, message) in messages.iter().enumerate() {
        let output = match message.as_object() {
            Some(record) => reduce_message(record),
            None => super::non_object_output(
                Provider::Gemini,
                session_id,
                index,
                message,
                &mut outcome.diagnostics,
            ),
        };
        assembler.emit(index, output, &mut outcome);
    }

    outcome
}

fn reduce_message(record: &Map<String, Value>) -> EventOutput {
    let role_category = match lower_string(record, "type")
        .or_else(|| lower_string(record, "role"))
        .as_deref()
    {
        Some("gemini") | Some("assistant") | Some("model") => MessageCategory::Assistant,
        _ => MessageCategory::User,
    };

    let (token_input, token_output) = extract_usage(record);
    let mut segments = Vec::new();

    // Thoughts come first: they precede the visible reply.
    if let Some(thoughts) = read_array(record, "thoughts") {
        for thought in thoughts {
            if let Some(text) = thought_text(thought) {
                segments.push(Segment::new(MessageCategory::Thinking, text));
            }
        }
    }

    if let Some(content) = record.get("content") {
        if let Some(text) = extract_text(content) {
            if !text.is_empty() {
                segments.push(Segment::new(role_category, text));
            }
        }
    }

    if let Some(tool_calls) = read_array(record, "toolCalls") {
        for call in tool_calls {
            let Some(call_record) = call.as_object() else {
                continue;
            };
            let name = read_str(call_record, "name").unwrap_or("");
            let serialized = serialize(call);
            let category = tool_use_category(name, &serialized);
            segments.push(Segment::new(category, serialized));

            if let Some(result) = call_record.get("result") {
                let content = extract_text(result).unwrap_or_else(|| serialize(result));
                segments.push(Segment::new(MessageCategory::ToolResult, content));
            }
        }
    }

    EventOutput {
        source_id: read_string(record, "id"),
        created_at: extract_timestamp(record),
        token_input,
        token_output,
        segments,
    }
}

fn thought_text(thought: &Value) -> Option<String> {
    let record = thought.as_object()?;
    let subject = read_str(record, "subject");
    let description = read_str(record, "description");
    match (subject, description) {
        (Some(s), Some(d)) => Some(format!("{s}: {d}")),
        (Some(s), None) => Some(s.to_string()),
        (None, Some(d)) => Some(d.to_string()),
        (None, None) => extract_text(thought),
    }
}

/// Model name recorded on a message, when present. Shared with metadata
/// extraction so session model lists match what parsing saw.
pub(crate) fn message_model(record: &Map<String, Value>) -> Option<String> {
    read_string(record, "model")
        .or_else(|| read_record(record, "meta").and_then(|m| read_string(m, "model")))
}
