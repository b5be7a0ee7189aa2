mod common;

use common::*;
use hindsight::bookmarks::BookmarkStore;
use hindsight::db;
use hindsight::query::QueryService;

struct World {
    fixture: Fixture,
    service: QueryService,
}

impl World {
    fn new() -> Self {
        let fixture = Fixture::new();
        fixture.write_claude_session(
            "-Users-jane-work-api",
            "sess-api",
            &[
                claude_user("u1", "2024-01-01T00:00:00Z", "bookmark me"),
                claude_assistant("a1", "2024-01-01T00:00:05Z", "noted"),
            ],
        );
        fixture.write_claude_session(
            "-Users-jane-work-api",
            "sess-other",
            &[claude_user("u1", "2024-03-01T00:00:00Z", "unrelated session")],
        );
        fixture.index();
        let service = QueryService::open(&fixture.db_path()).unwrap();
        Self { fixture, service }
    }

    fn first_message(&self) -> (String, String, String, String) {
        self.fixture
            .open_db()
            .query_row(
                "SELECT s.project_id, m.session_id, m.id, m.source_id
                 FROM messages m
                 JOIN sessions s ON s.id = m.session_id
                 WHERE m.content = 'bookmark me'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .unwrap()
    }

    fn reconcile(&self) -> hindsight::bookmarks::ReconcileReport {
        let store = BookmarkStore::open(&db::bookmarks_db_path(&self.fixture.db_path())).unwrap();
        store
            .reconcile_with_indexed_data(&self.fixture.db_path())
            .unwrap()
    }
}

#[test]
fn test_toggle_then_list() {
    let world = World::new();
    let (project_id, session_id, message_id, source_id) = world.first_message();

    let on = world
        .service
        .toggle_bookmark(&project_id, &session_id, &message_id, &source_id)
        .unwrap();
    assert!(on);

    let listing = world
        .service
        .list_project_bookmarks(&project_id, None, None)
        .unwrap();
    assert_eq!(listing.total_count, 1);
    assert_eq!(listing.filtered_count, 1);
    assert_eq!(listing.results[0].content, "bookmark me");
    assert!(!listing.results[0].is_orphaned);
    assert_eq!(listing.results[0].session_title.as_deref(), Some("bookmark me"));

    let off = world
        .service
        .toggle_bookmark(&project_id, &session_id, &message_id, &source_id)
        .unwrap();
    assert!(!off);
    let listing = world
        .service
        .list_project_bookmarks(&project_id, None, None)
        .unwrap();
    assert_eq!(listing.total_count, 0);
}

#[test]
fn test_toggle_mismatch_refuses() {
    let world = World::new();
    let (project_id, session_id, message_id, _source_id) = world.first_message();

    let result = world
        .service
        .toggle_bookmark(&project_id, &session_id, &message_id, "wrong-source")
        .unwrap();
    assert!(!result);
    assert_eq!(
        world
            .service
            .list_project_bookmarks(&project_id, None, None)
            .unwrap()
            .total_count,
        0
    );
}

#[test]
fn test_orphan_and_restore_cycle() {
    let world = World::new();
    let (project_id, session_id, message_id, source_id) = world.first_message();
    world
        .service
        .toggle_bookmark(&project_id, &session_id, &message_id, &source_id)
        .unwrap();

    // Delete the backing message straight out of the index.
    world
        .fixture
        .open_db()
        .execute("DELETE FROM messages WHERE id = ?1", [&message_id])
        .unwrap();

    let report = world.reconcile();
    assert_eq!(report.marked_orphaned, 1);

    let listing = world
        .service
        .list_project_bookmarks(&project_id, None, None)
        .unwrap();
    assert!(listing.results[0].is_orphaned);
    // Snapshot content still renders.
    assert_eq!(listing.results[0].content, "bookmark me");

    // A forced re-index recreates the message with identical ids.
    world.fixture.index_force();
    let report = world.reconcile();
    assert_eq!(report.restored, 1);

    let listing = world
        .service
        .list_project_bookmarks(&project_id, None, None)
        .unwrap();
    assert!(!listing.results[0].is_orphaned);
}

#[test]
fn test_removed_file_orphans_bookmark() {
    let world = World::new();
    let (project_id, session_id, message_id, source_id) = world.first_message();
    world
        .service
        .toggle_bookmark(&project_id, &session_id, &message_id, &source_id)
        .unwrap();

    // Remove the session file; the project survives through its second
    // session, so the bookmark is orphaned rather than deleted.
    let path: String = world
        .fixture
        .open_db()
        .query_row(
            "SELECT file_path FROM sessions WHERE id = ?1",
            [&session_id],
            |r| r.get(0),
        )
        .unwrap();
    std::fs::remove_file(path).unwrap();

    let outcome = world.fixture.index();
    assert!(outcome.removed_files >= 1);

    let report = world.reconcile();
    assert_eq!(report.marked_orphaned, 1);
    assert_eq!(report.deleted_missing_projects, 0);
}

#[test]
fn test_bookmark_deleted_with_project() {
    let fixture = Fixture::new();
    fixture.write_claude_session(
        "-Users-jane-work-solo",
        "sess-solo",
        &[claude_user("u1", "2024-01-01T00:00:00Z", "only session here")],
    );
    fixture.index();

    let service = QueryService::open(&fixture.db_path()).unwrap();
    let (project_id, session_id, message_id, source_id): (String, String, String, String) =
        fixture
            .open_db()
            .query_row(
                "SELECT s.project_id, m.session_id, m.id, m.source_id
                 FROM messages m JOIN sessions s ON s.id = m.session_id",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .unwrap();
    service
        .toggle_bookmark(&project_id, &session_id, &message_id, &source_id)
        .unwrap();

    // Losing the only session sweeps the project; reconciliation then drops
    // the bookmark entirely.
    let dir = fixture.tmp.path().join("claude").join("-Users-jane-work-solo");
    std::fs::remove_dir_all(dir).unwrap();
    fixture.index();

    let store = BookmarkStore::open(&db::bookmarks_db_path(&fixture.db_path())).unwrap();
    let report = store
        .reconcile_with_indexed_data(&fixture.db_path())
        .unwrap();
    assert_eq!(report.deleted_missing_projects, 1);
}

#[test]
fn test_bookmark_query_filter() {
    let world = World::new();
    let (project_id, session_id, message_id, source_id) = world.first_message();
    world
        .service
        .toggle_bookmark(&project_id, &session_id, &message_id, &source_id)
        .unwrap();

    let hit = world
        .service
        .list_project_bookmarks(&project_id, Some("BOOKMARK"), None)
        .unwrap();
    assert_eq!(hit.filtered_count, 1);

    let miss = world
        .service
        .list_project_bookmarks(&project_id, Some("absent"), None)
        .unwrap();
    assert_eq!(miss.filtered_count, 0);
    // Total count stays unfiltered.
    assert_eq!(miss.total_count, 1);
}
