mod common;

use common::*;
use hindsight::rules::RuleOverrides;

#[test]
fn test_index_discovers_all_providers() {
    let fixture = Fixture::new();
    fixture.write_claude_session(
        "-Users-jane-work-api",
        "sess-claude",
        &[
            claude_user("u1", "2024-01-01T00:00:00Z", "hello"),
            claude_assistant("a1", "2024-01-01T00:00:01Z", "hi"),
        ],
    );
    fixture.write_codex_session(
        "2025/02/01/rollout-1.jsonl",
        "sess-codex",
        "/w/cli",
        &[codex_user("m1", "2025-02-01T09:00:01Z", "list files")],
    );
    fixture.write_gemini_session(
        "abc123",
        "/w/web",
        "sess-gemini",
        &gemini_document(
            "g1",
            r#"{"id":"m1","type":"user","timestamp":"2024-06-01T00:00:00Z","content":"hey"}"#,
        ),
    );

    let outcome = fixture.index();
    assert_eq!(outcome.discovered_files, 3);
    assert_eq!(outcome.indexed_files, 3);
    assert_eq!(outcome.skipped_files, 0);
    assert_eq!(outcome.removed_files, 0);
    assert!(!outcome.schema_rebuilt);

    assert_eq!(fixture.count("projects"), 3);
    assert_eq!(fixture.count("sessions"), 3);
    assert_eq!(fixture.count("indexed_files"), 3);
    // Every message is mirrored into the text index.
    assert_eq!(fixture.count("messages"), fixture.count("message_fts"));
}

#[test]
fn test_incremental_idempotence() {
    let fixture = Fixture::new();
    fixture.write_claude_session(
        "-Users-jane-work-api",
        "sess-1",
        &[claude_user("u1", "2024-01-01T00:00:00Z", "hello")],
    );

    let first = fixture.index();
    assert_eq!(first.indexed_files, 1);

    let message_count = fixture.count("messages");
    let session_count = fixture.count("sessions");
    let project_count = fixture.count("projects");

    let second = fixture.index();
    assert_eq!(second.indexed_files, 0);
    assert_eq!(second.skipped_files, 1);

    assert_eq!(fixture.count("messages"), message_count);
    assert_eq!(fixture.count("sessions"), session_count);
    assert_eq!(fixture.count("projects"), project_count);
}

#[test]
fn test_force_reindex_covers_everything() {
    let fixture = Fixture::new();
    fixture.write_claude_session(
        "-Users-jane-work-api",
        "sess-1",
        &[
            claude_user("u1", "2024-01-01T00:00:00Z", "hello"),
            claude_assistant("a1", "2024-01-01T00:00:01Z", "hi"),
        ],
    );
    fixture.write_codex_session(
        "2025/02/01/rollout-1.jsonl",
        "sess-codex",
        "/w/cli",
        &[codex_user("m1", "2025-02-01T09:00:01Z", "list files")],
    );

    fixture.index();
    let messages_before = fixture.count("messages");
    let sessions_before: Vec<String> = {
        let conn = fixture.open_db();
        let mut stmt = conn.prepare("SELECT id FROM sessions ORDER BY id").unwrap();
        let ids = stmt
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<Result<Vec<String>, _>>()
            .unwrap();
        ids
    };

    let forced = fixture.index_force();
    assert_eq!(forced.indexed_files, forced.discovered_files);
    assert_eq!(forced.skipped_files, 0);

    // Identical to a from-scratch run: same session ids, same row counts.
    assert_eq!(fixture.count("messages"), messages_before);
    let sessions_after: Vec<String> = {
        let conn = fixture.open_db();
        let mut stmt = conn.prepare("SELECT id FROM sessions ORDER BY id").unwrap();
        let ids = stmt
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<Result<Vec<String>, _>>()
            .unwrap();
        ids
    };
    assert_eq!(sessions_before, sessions_after);
}

#[test]
fn test_removed_file_drops_session_and_project() {
    let fixture = Fixture::new();
    let path = fixture.write_claude_session(
        "-Users-jane-work-api",
        "sess-1",
        &[claude_user("u1", "2024-01-01T00:00:00Z", "hello")],
    );
    fixture.index();
    assert_eq!(fixture.count("sessions"), 1);

    std::fs::remove_file(path).unwrap();
    let outcome = fixture.index();
    assert_eq!(outcome.removed_files, 1);

    assert_eq!(fixture.count("sessions"), 0);
    assert_eq!(fixture.count("messages"), 0);
    assert_eq!(fixture.count("message_fts"), 0);
    // The sweep drops projects that lost their last session.
    assert_eq!(fixture.count("projects"), 0);
}

#[test]
fn test_modified_file_reindexed() {
    let fixture = Fixture::new();
    fixture.write_claude_session(
        "-Users-jane-work-api",
        "sess-1",
        &[claude_user("u1", "2024-01-01T00:00:00Z", "hello")],
    );
    fixture.index();
    assert_eq!(fixture.count("messages"), 1);

    // Rewrite with one more event; size changes, so the signature mismatches.
    fixture.write_claude_session(
        "-Users-jane-work-api",
        "sess-1",
        &[
            claude_user("u1", "2024-01-01T00:00:00Z", "hello"),
            claude_assistant("a1", "2024-01-01T00:00:01Z", "hi there"),
        ],
    );
    let outcome = fixture.index();
    assert_eq!(outcome.indexed_files, 1);
    assert_eq!(fixture.count("messages"), 2);
    // Still one session for the path: the rewrite replaced, not duplicated.
    assert_eq!(fixture.count("sessions"), 1);
}

#[test]
fn test_codex_duplicate_session_id_stays_distinct() {
    let fixture = Fixture::new();
    fixture.write_codex_session(
        "2025/02/01/rollout-1.jsonl",
        "copied-session-id",
        "/w/cli",
        &[codex_user("m1", "2025-02-01T09:00:01Z", "first copy")],
    );
    fixture.write_codex_session(
        "2025/02/02/rollout-1.jsonl",
        "copied-session-id",
        "/w/cli",
        &[codex_user("m1", "2025-02-02T09:00:01Z", "second copy")],
    );

    let outcome = fixture.index();
    assert_eq!(outcome.discovered_files, 2);
    assert_eq!(outcome.indexed_files, 2);
    assert_eq!(fixture.count("sessions"), 2);
}

#[test]
fn test_schema_bump_rebuilds() {
    let fixture = Fixture::new();
    fixture.write_claude_session(
        "-Users-jane-work-api",
        "sess-1",
        &[claude_user("u1", "2024-01-01T00:00:00Z", "hello")],
    );
    fixture.index();

    fixture
        .open_db()
        .execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', '999')",
            [],
        )
        .unwrap();

    let outcome = fixture.index();
    assert!(outcome.schema_rebuilt);
    assert_eq!(outcome.indexed_files, outcome.discovered_files);
    assert_eq!(outcome.skipped_files, 0);
    assert_eq!(fixture.count("sessions"), 1);
}

#[test]
fn test_unreadable_file_counts_error_and_continues() {
    let fixture = Fixture::new();
    fixture.write_claude_session(
        "-Users-jane-work-api",
        "good",
        &[claude_user("u1", "2024-01-01T00:00:00Z", "hello")],
    );
    // Invalid UTF-8 makes the read fail; the run keeps going.
    let dir = fixture.tmp.path().join("claude").join("-Users-jane-work-api");
    std::fs::write(dir.join("bad.jsonl"), [0xff, 0xfe, 0xfd]).unwrap();

    let outcome = fixture.index();
    assert_eq!(outcome.discovered_files, 2);
    assert_eq!(outcome.indexed_files, 1);
    assert!(outcome.errors >= 1);
    assert_eq!(fixture.count("sessions"), 1);
}

#[test]
fn test_tool_calls_created_for_tool_messages() {
    let fixture = Fixture::new();
    fixture.write_claude_session(
        "-Users-jane-work-api",
        "sess-1",
        &[
            claude_tool_use("t1", "2024-01-01T00:00:00Z", "Read"),
            claude_tool_use("t2", "2024-01-01T00:00:01Z", "Edit"),
        ],
    );
    fixture.index();

    assert_eq!(fixture.count("tool_calls"), 2);
    let conn = fixture.open_db();
    let categories: Vec<String> = {
        let mut stmt = conn
            .prepare("SELECT category FROM messages ORDER BY created_at")
            .unwrap();
        let rows = stmt
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<Result<Vec<String>, _>>()
            .unwrap();
        rows
    };
    assert_eq!(categories, ["tool_use", "tool_edit"]);

    let tool_name: String = conn
        .query_row(
            "SELECT tool_name FROM tool_calls tc
             JOIN messages m ON m.id = tc.message_id
             WHERE m.category = 'tool_edit'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(tool_name, "Edit");
}

#[test]
fn test_session_aggregates_and_metadata() {
    let fixture = Fixture::new();
    fixture.write_claude_session(
        "-Users-jane-work-api",
        "sess-1",
        &[
            claude_user("u1", "2024-01-01T00:00:00Z", "hello"),
            claude_assistant("a1", "2024-01-01T00:01:00Z", "hi"),
        ],
    );
    fixture.index();

    let conn = fixture.open_db();
    let row: (String, String, i64, i64, i64, String, String) = conn
        .query_row(
            "SELECT started_at, ended_at, duration_ms, token_input_total, token_output_total,
                    git_branch, model_names
             FROM sessions",
            [],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                    r.get(6)?,
                ))
            },
        )
        .unwrap();

    assert_eq!(row.0, "2024-01-01T00:00:00Z");
    assert_eq!(row.1, "2024-01-01T00:01:00Z");
    assert_eq!(row.2, 60_000);
    assert_eq!(row.3, 10);
    assert_eq!(row.4, 20);
    assert_eq!(row.5, "main");
    assert_eq!(row.6, "claude-sonnet-4-5");
}

#[test]
fn test_system_rule_overrides_applied() {
    let fixture = Fixture::new();
    fixture.write_claude_session(
        "-Users-jane-work-api",
        "sess-1",
        &[claude_user("u1", "2024-01-01T00:00:00Z", "MACHINE: generated banner")],
    );

    let mut overrides = RuleOverrides::new();
    overrides.insert("claude".to_string(), vec!["^MACHINE:".to_string()]);
    fixture.index_with(false, overrides);

    let category: String = fixture
        .open_db()
        .query_row("SELECT category FROM messages", [], |r| r.get(0))
        .unwrap();
    assert_eq!(category, "system");
}

#[test]
fn test_message_ids_are_stable_across_reindex() {
    let fixture = Fixture::new();
    fixture.write_claude_session(
        "-Users-jane-work-api",
        "sess-1",
        &[claude_user("u1", "2024-01-01T00:00:00Z", "hello")],
    );
    fixture.index();
    let id_before: String = fixture
        .open_db()
        .query_row("SELECT id FROM messages", [], |r| r.get(0))
        .unwrap();

    fixture.index_force();
    let id_after: String = fixture
        .open_db()
        .query_row("SELECT id FROM messages", [], |r| r.get(0))
        .unwrap();

    assert_eq!(id_before, id_after);
    assert!(id_before.starts_with("msg_"));
}
