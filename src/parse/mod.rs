//! Provider event streams → canonical messages.
//!
//! Each provider module reduces one source event to an ordered list of
//! segments; the assembly here turns segments into canonical messages with
//! split ids (`<source>#2`, `#3`, …), first-split-only token usage, and
//! collected diagnostics. Parsing never fails: malformed input degrades to
//! `system` messages plus diagnostics.

pub mod claude;
pub mod codex;
pub mod gemini;

use serde_json::{Map, Value};

use crate::model::{
    diag_code, CanonicalMessage, Diagnostic, DurationConfidence, DurationSource, MessageCategory,
    Provider,
};

/// Timestamp assigned when a file yields no usable event time at all.
const EPOCH_TS: &str = "1970-01-01T00:00:00.000Z";

/// Tool-name fragments that mark a tool invocation as a file edit.
const EDIT_TOOL_HINTS: &[&str] = &[
    "edit",
    "write",
    "apply_patch",
    "str_replace",
    "multi_edit",
    "create_file",
    "patch",
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseOutcome {
    pub messages: Vec<CanonicalMessage>,
    pub diagnostics: Vec<Diagnostic>,
}

/// One normalized content segment extracted from a source event.
#[derive(Debug, Clone)]
pub(crate) struct Segment {
    pub category: MessageCategory,
    pub content: String,
    pub duration_ms: Option<u64>,
    pub duration_source: Option<DurationSource>,
    pub duration_confidence: Option<DurationConfidence>,
}

impl Segment {
    pub(crate) fn new(category: MessageCategory, content: impl Into<String>) -> Self {
        Self {
            category,
            content: content.into(),
            duration_ms: None,
            duration_source: None,
            duration_confidence: None,
        }
    }

    pub(crate) fn with_native_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self.duration_source = Some(DurationSource::Native);
        self.duration_confidence = Some(DurationConfidence::High);
        self
    }
}

/// A source event reduced to identity, timing, usage, and segments.
#[derive(Debug, Clone, Default)]
pub(crate) struct EventOutput {
    pub source_id: Option<String>,
    pub created_at: Option<String>,
    pub token_input: Option<u64>,
    pub token_output: Option<u64>,
    pub segments: Vec<Segment>,
}

/// Parse a raw session file into canonical messages plus diagnostics.
///
/// `session_id` is stamped into every message and diagnostic; callers pass
/// whichever session handle downstream storage keys on.
pub fn parse(provider: Provider, session_id: &str, payload: &str) -> ParseOutcome {
    let mut outcome = match provider {
        Provider::Claude => parse_jsonl(provider, session_id, payload, claude::reduce),
        Provider::Codex => parse_jsonl(provider, session_id, payload, codex::reduce),
        Provider::Gemini => gemini::parse(session_id, payload),
    };

    if outcome.messages.is_empty() {
        outcome.diagnostics.push(Diagnostic::warning(
            diag_code::NO_EVENTS_FOUND,
            provider,
            session_id,
            None,
            "no canonical messages produced from session file",
        ));
    }

    outcome
}

type ReduceFn = fn(
    record: &Map<String, Value>,
    index: usize,
    ctx: &mut EventContext<'_>,
) -> Option<EventOutput>;

/// Shared state handed to provider reducers.
pub(crate) struct EventContext<'a> {
    pub provider: Provider,
    pub session_id: &'a str,
    pub diagnostics: &'a mut Vec<Diagnostic>,
}

fn parse_jsonl(
    provider: Provider,
    session_id: &str,
    payload: &str,
    reduce: ReduceFn,
) -> ParseOutcome {
    let mut outcome = ParseOutcome::default();
    let mut assembler = Assembler::new(provider, session_id);

    for (index, line) in payload
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .enumerate()
    {
        let value: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            // Unparseable lines degrade to string payloads below.
            Err(_) => Value::String(line.to_string()),
        };

        let output = match value.as_object() {
            Some(record) => {
                let mut ctx = EventContext {
                    provider,
                    session_id,
                    diagnostics: &mut outcome.diagnostics,
                };
                match reduce(record, index, &mut ctx) {
                    Some(output) => output,
                    None => continue,
                }
            }
            None => non_object_output(provider, session_id, index, &value, &mut outcome.diagnostics),
        };

        assembler.emit(index, output, &mut outcome);
    }

    outcome
}

/// Fallback for events that are not JSON objects: one `system` segment
/// carrying the serialized payload, plus a warning.
pub(crate) fn non_object_output(
    provider: Provider,
    session_id: &str,
    index: usize,
    value: &Value,
    diagnostics: &mut Vec<Diagnostic>,
) -> EventOutput {
    diagnostics.push(Diagnostic::warning(
        diag_code::NON_OBJECT_EVENT,
        provider,
        session_id,
        Some(index),
        "event is not a JSON object",
    ));
    EventOutput {
        segments: vec![Segment::new(MessageCategory::System, serialize(value))],
        ..Default::default()
    }
}

/// Fallback for records whose `type` is unrecognized.
pub(crate) fn unknown_shape_output(
    record: &Map<String, Value>,
    index: usize,
    ctx: &mut EventContext<'_>,
) -> EventOutput {
    ctx.diagnostics.push(Diagnostic::warning(
        diag_code::UNKNOWN_EVENT_SHAPE,
        ctx.provider,
        ctx.session_id,
        Some(index),
        format!(
            "unrecognized event type {:?}",
            record.get("type").and_then(|v| v.as_str()).unwrap_or("<none>")
        ),
    ));
    EventOutput {
        source_id: crate::helpers::read_string(record, "id")
            .or_else(|| crate::helpers::read_string(record, "uuid")),
        created_at: crate::helpers::extract_timestamp(record),
        segments: vec![Segment::new(
            MessageCategory::System,
            serialize(&Value::Object(record.clone())),
        )],
        ..Default::default()
    }
}

pub(crate) fn serialize(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

/// Classify a tool invocation, promoting file-editing tools to `tool_edit`.
pub(crate) fn tool_use_category(tool_name: &str, serialized_args: &str) -> MessageCategory {
    let name = tool_name.to_ascii_lowercase().replace('-', "_");
    if EDIT_TOOL_HINTS.iter().any(|hint| name.contains(hint)) {
        return MessageCategory::ToolEdit;
    }
    // Shell-style tools wrapping a patch application.
    if serialized_args.to_ascii_lowercase().contains("apply_patch") {
        return MessageCategory::ToolEdit;
    }
    MessageCategory::ToolUse
}

/// Turns per-event segment lists into ordered canonical messages.
pub(crate) struct Assembler {
    provider: Provider,
    session_id: String,
    last_timestamp: Option<String>,
}

impl Assembler {
    pub(crate) fn new(provider: Provider, session_id: &str) -> Self {
        Self {
            provider,
            session_id: session_id.to_string(),
            last_timestamp: None,
        }
    }

    pub(crate) fn emit(&mut self, index: usize, output: EventOutput, outcome: &mut ParseOutcome) {
        if let Some(ts) = &output.created_at {
            self.last_timestamp = Some(ts.clone());
        }
        let created_at = output
            .created_at
            .or_else(|| self.last_timestamp.clone())
            .unwrap_or_else(|| EPOCH_TS.to_string());

        let source_id = output
            .source_id
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("evt-{index}"));

        // Collapse consecutive duplicate segments and drop empty ones.
        let mut segments: Vec<Segment> = Vec::with_capacity(output.segments.len());
        for segment in output.segments {
            if segment.content.is_empty() {
                continue;
            }
            if let Some(last) = segments.last() {
                if last.category == segment.category && last.content == segment.content {
                    continue;
                }
            }
            segments.push(segment);
        }

        for (position, segment) in segments.into_iter().enumerate() {
            let id = if position == 0 {
                source_id.clone()
            } else {
                format!("{source_id}#{}", position + 1)
            };
            let message = CanonicalMessage {
                id,
                session_id: self.session_id.clone(),
                provider: self.provider,
                category: segment.category,
                content: segment.content,
                created_at: created_at.clone(),
                // Usage belongs to the source event; only its first split
                // carries it so per-session sums stay correct.
                token_input: if position == 0 { output.token_input } else { None },
                token_output: if position == 0 { output.token_output } else { None },
                operation_duration_ms: segment.duration_ms,
                operation_duration_source: segment.duration_source,
                operation_duration_confidence: segment.duration_confidence,
            };

            match message.validate() {
                Ok(()) => outcome.messages.push(message),
                Err(reason) => outcome.diagnostics.push(Diagnostic::warning(
                    diag_code::INVALID_CANONICAL_MESSAGE,
                    self.provider,
                    &self.session_id,
                    Some(index),
                    reason,
                )),
            }
        }
    }
}
