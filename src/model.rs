use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Claude,
    Codex,
    Gemini,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::Claude, Provider::Codex, Provider::Gemini];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Claude => "claude",
            Provider::Codex => "codex",
            Provider::Gemini => "gemini",
        }
    }

    pub fn parse(s: &str) -> Option<Provider> {
        match s.to_ascii_lowercase().as_str() {
            "claude" => Some(Provider::Claude),
            "codex" => Some(Provider::Codex),
            "gemini" => Some(Provider::Gemini),
            _ => None,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Message categories
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageCategory {
    User,
    Assistant,
    ToolUse,
    ToolEdit,
    ToolResult,
    Thinking,
    System,
}

impl MessageCategory {
    pub const ALL: [MessageCategory; 7] = [
        MessageCategory::User,
        MessageCategory::Assistant,
        MessageCategory::ToolUse,
        MessageCategory::ToolEdit,
        MessageCategory::ToolResult,
        MessageCategory::Thinking,
        MessageCategory::System,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageCategory::User => "user",
            MessageCategory::Assistant => "assistant",
            MessageCategory::ToolUse => "tool_use",
            MessageCategory::ToolEdit => "tool_edit",
            MessageCategory::ToolResult => "tool_result",
            MessageCategory::Thinking => "thinking",
            MessageCategory::System => "system",
        }
    }

    /// Single ingress point for category strings. Hyphens are folded to
    /// underscores and legacy aliases (`tool_call`) are applied.
    pub fn parse(s: &str) -> Option<MessageCategory> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "user" => Some(MessageCategory::User),
            "assistant" => Some(MessageCategory::Assistant),
            "tool_use" | "tool_call" => Some(MessageCategory::ToolUse),
            "tool_edit" => Some(MessageCategory::ToolEdit),
            "tool_result" => Some(MessageCategory::ToolResult),
            "thinking" => Some(MessageCategory::Thinking),
            "system" => Some(MessageCategory::System),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category histogram with every category present, zeroed.
pub fn empty_category_counts() -> BTreeMap<String, i64> {
    MessageCategory::ALL
        .iter()
        .map(|c| (c.as_str().to_string(), 0))
        .collect()
}

// ---------------------------------------------------------------------------
// Canonical messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurationSource {
    Native,
    Derived,
}

impl DurationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DurationSource::Native => "native",
            DurationSource::Derived => "derived",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurationConfidence {
    High,
    Low,
}

impl DurationConfidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            DurationConfidence::High => "high",
            DurationConfidence::Low => "low",
        }
    }
}

/// The normalized unit of indexing, search, and display.
///
/// `id` is the parser-assigned source id: the first message out of a source
/// event inherits the event's own id, later splits append `#2`, `#3`, …
/// Token counts are carried by the first split only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalMessage {
    pub id: String,
    pub session_id: String,
    pub provider: Provider,
    pub category: MessageCategory,
    pub content: String,
    /// ISO-8601 UTC.
    pub created_at: String,
    pub token_input: Option<u64>,
    pub token_output: Option<u64>,
    pub operation_duration_ms: Option<u64>,
    pub operation_duration_source: Option<DurationSource>,
    pub operation_duration_confidence: Option<DurationConfidence>,
}

impl CanonicalMessage {
    /// Structural validity check applied before a message leaves a parser.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("empty message id".to_string());
        }
        if self.session_id.is_empty() {
            return Err("empty session id".to_string());
        }
        if chrono::DateTime::parse_from_rfc3339(&self.created_at).is_err() {
            return Err(format!("unparseable created_at: {:?}", self.created_at));
        }
        if self.operation_duration_ms.is_some() && self.operation_duration_source.is_none() {
            return Err("duration without a source".to_string());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

pub mod diag_code {
    pub const NON_OBJECT_EVENT: &str = "parser.non_object_event";
    pub const UNKNOWN_EVENT_SHAPE: &str = "parser.unknown_event_shape";
    pub const INVALID_CANONICAL_MESSAGE: &str = "parser.invalid_canonical_message";
    pub const NO_EVENTS_FOUND: &str = "parser.no_events_found";
}

/// A non-fatal observation collected while parsing a session file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: String,
    pub provider: Provider,
    pub session_id: String,
    pub event_index: Option<usize>,
    pub message: String,
}

impl Diagnostic {
    pub fn warning(
        code: &str,
        provider: Provider,
        session_id: &str,
        event_index: Option<usize>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity: Severity::Warning,
            code: code.to_string(),
            provider,
            session_id: session_id.to_string(),
            event_index,
            message: message.into(),
        }
    }

    pub fn error(
        code: &str,
        provider: Provider,
        session_id: &str,
        event_index: Option<usize>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity: Severity::Error,
            code: code.to_string(),
            provider,
            session_id: session_id.to_string(),
            event_index,
            message: message.into(),
        }
    }
}
