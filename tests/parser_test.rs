use hindsight::model::{MessageCategory, Provider};
use hindsight::parse::parse;

/// A Claude assistant event with thinking, text, and tool_use blocks splits
/// into three canonical messages with `#N` ids and first-split-only usage.
#[test]
fn test_claude_split_assistant_scenario() {
    let payload = r#"{"type":"assistant","uuid":"c-a-1","timestamp":"2024-01-01T10:00:00Z","message":{"role":"assistant","model":"claude-sonnet-4-5","usage":{"input_tokens":100,"output_tokens":50},"content":[{"type":"thinking","thinking":"let me check the config"},{"type":"text","text":"the port is wrong"},{"type":"tool_use","id":"toolu_1","name":"Read","input":{"file_path":"/etc/app.toml"}}]}}"#;

    let outcome = parse(Provider::Claude, "session_x", payload);
    assert_eq!(outcome.messages.len(), 3);

    let ids: Vec<&str> = outcome.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, ["c-a-1", "c-a-1#2", "c-a-1#3"]);

    let categories: Vec<MessageCategory> = outcome.messages.iter().map(|m| m.category).collect();
    assert_eq!(
        categories,
        [
            MessageCategory::Thinking,
            MessageCategory::Assistant,
            MessageCategory::ToolUse,
        ]
    );

    assert_eq!(outcome.messages[0].token_input, Some(100));
    assert_eq!(outcome.messages[0].token_output, Some(50));
    for later in &outcome.messages[1..] {
        assert!(later.token_input.is_none());
        assert!(later.token_output.is_none());
    }
}

/// Parsing is a pure function of its inputs, message ids included.
#[test]
fn test_parser_determinism_across_providers() {
    let claude = concat!(
        r#"{"type":"user","uuid":"u1","timestamp":"2024-01-01T00:00:00Z","message":{"role":"user","content":"hello"}}"#,
        "\n",
        r#"{"type":"weird-new-event","uuid":"w1","timestamp":"2024-01-01T00:00:01Z"}"#,
        "\n",
        "garbage line\n",
    );
    let codex = concat!(
        r#"{"timestamp":"2025-02-01T09:00:01Z","type":"response_item","payload":{"type":"reasoning","id":"r1","summary":[{"type":"summary_text","text":"thinking"}]}}"#,
        "\n",
        r#"{"timestamp":"2025-02-01T09:00:02Z","type":"response_item","payload":{"type":"function_call_output","call_id":"c1","duration_seconds":0.5,"output":"done"}}"#,
    );
    let gemini = r#"{"messages":[{"id":"m1","type":"gemini","timestamp":"2024-06-01T00:00:00Z","content":"hi","thoughts":[{"subject":"Plan","description":"reply"}]}]}"#;

    for (provider, payload) in [
        (Provider::Claude, claude),
        (Provider::Codex, codex),
        (Provider::Gemini, gemini),
    ] {
        let a = parse(provider, "session_x", payload);
        let b = parse(provider, "session_x", payload);
        assert_eq!(a, b, "{provider} parse should be deterministic");
        assert!(!a.messages.is_empty());
    }
}

/// At most the first split of any source event carries token usage.
#[test]
fn test_split_usage_law_holds_for_gemini() {
    let payload = r#"{"messages":[
        {"id":"m1","type":"gemini","timestamp":"2024-06-01T00:00:00Z",
         "content":"answer",
         "thoughts":[{"subject":"A","description":"b"},{"subject":"C","description":"d"}],
         "toolCalls":[{"id":"t1","name":"search","args":{"q":"x"},"result":"found"}],
         "tokens":{"input":50,"output":10}}
    ]}"#;

    let outcome = parse(Provider::Gemini, "session_x", payload);
    assert!(outcome.messages.len() >= 4);

    let with_usage: Vec<&hindsight::model::CanonicalMessage> = outcome
        .messages
        .iter()
        .filter(|m| m.token_input.is_some() || m.token_output.is_some())
        .collect();
    assert_eq!(with_usage.len(), 1);
    assert_eq!(with_usage[0].id, "m1");
}

/// Every emitted message passes canonical validation; a file with no usable
/// events reports the dedicated diagnostic instead of failing.
#[test]
fn test_canonical_validity_and_empty_file_diagnostics() {
    let outcome = parse(Provider::Codex, "session_x", "\n\n");
    assert!(outcome.messages.is_empty());
    assert!(outcome
        .diagnostics
        .iter()
        .any(|d| d.code == "parser.no_events_found"));

    let payload = r#"{"timestamp":"2025-02-01T09:00:01Z","type":"response_item","payload":{"type":"message","id":"m1","role":"user","content":[{"type":"input_text","text":"ok"}]}}"#;
    let outcome = parse(Provider::Codex, "session_x", payload);
    for message in &outcome.messages {
        assert!(message.validate().is_ok());
    }
}
