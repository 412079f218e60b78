// tests/integration_test.rs

//! Integration tests exercising kbengine end to end, across the database,
//! merge, package, and LAN layers.

use kbengine::conflict::Resolution;
use kbengine::db;
use kbengine::db::models::{Problem, SourceKind, Tag};
use kbengine::engine::{KbEngine, OwnedHardDeleteFilter, OwnedProfessionFilter};
use kbengine::identity::Paths;
use kbengine::lan::{ExportMode as LanExportMode, LanBackend, LanServer};
use kbengine::package::manifest::ExportMode as PkgExportMode;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[test]
fn test_database_lifecycle() {
    let temp_file = NamedTempFile::new().unwrap();
    let db_path = temp_file.path().to_str().unwrap().to_string();
    drop(temp_file);

    let init_result = db::init(&db_path);
    assert!(init_result.is_ok(), "Database initialization should succeed");
    assert!(std::path::Path::new(&db_path).exists(), "Database file should exist after initialization");

    let conn_result = db::open(&db_path);
    assert!(conn_result.is_ok(), "Opening database should succeed");

    let conn = conn_result.unwrap();
    let result: Result<i32, _> = conn.query_row("SELECT 1", [], |row| row.get(0));
    assert_eq!(result.unwrap(), 1, "Should be able to execute queries");
}

#[test]
fn test_database_init_creates_parent_directories() {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir.path().join("nested/path/to/kbengine.db").to_str().unwrap().to_string();

    let result = db::init(&db_path);
    assert!(result.is_ok(), "Should create parent directories");
    assert!(std::path::Path::new(&db_path).exists(), "Database should exist in nested path");
}

#[test]
fn test_database_pragmas_are_set() {
    let temp_file = NamedTempFile::new().unwrap();
    let db_path = temp_file.path().to_str().unwrap().to_string();
    drop(temp_file);

    db::init(&db_path).unwrap();
    let conn = db::open(&db_path).unwrap();

    let foreign_keys: i32 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0)).unwrap();
    assert_eq!(foreign_keys, 1, "Foreign keys should be enabled");

    let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0)).unwrap();
    assert_eq!(journal_mode.to_lowercase(), "wal", "Journal mode should be WAL");
}

async fn open_engine_at(root: &std::path::Path) -> KbEngine {
    let paths = Paths::new(root.join("config"), root.join("data"));
    KbEngine::open(paths).unwrap()
}

fn problem(id: &str, title: &str, updated_at_utc: &str, updated_by: &str) -> Problem {
    Problem {
        id: id.to_string(),
        title: title.to_string(),
        symptom: String::new(),
        root_cause: String::new(),
        solution: String::new(),
        environment_json: "{}".into(),
        severity: 0,
        status: 0,
        created_by: None,
        source_kind: SourceKind::Personal,
        is_deleted: false,
        deleted_at_utc: None,
        created_at_utc: updated_at_utc.to_string(),
        updated_at_utc: updated_at_utc.to_string(),
        updated_by_instance_id: updated_by.to_string(),
    }
}

/// Scenario: both peers edit the same problem before exchanging packages.
/// The import with the earlier `updatedAtUtc` loses and lands in the
/// conflict ledger instead of overwriting the newer local row.
#[tokio::test]
async fn test_concurrent_edit_produces_reviewable_conflict() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let engine_a = open_engine_at(dir_a.path()).await;
    let engine_b = open_engine_at(dir_b.path()).await;

    engine_a
        .upsert_problem(problem("p1", "original title", "2024-01-01T00:00:00.000Z", &engine_a.instance().instance_id.clone()))
        .await
        .unwrap();

    let out_dir = dir_a.path().join("out");
    std::fs::create_dir_all(&out_dir).unwrap();
    let report = engine_a
        .export(engine_b.instance().instance_id.clone(), PkgExportMode::Full, None, None, out_dir)
        .await
        .unwrap();

    let scratch = dir_b.path().join("scratch");
    std::fs::create_dir_all(&scratch).unwrap();
    engine_b.import_package(PathBuf::from(&report.package_path), scratch).await.unwrap();

    // B edits locally with a later timestamp than A's original export.
    engine_b
        .upsert_problem(problem("p1", "b's newer title", "2024-06-01T00:00:00.000Z", &engine_b.instance().instance_id.clone()))
        .await
        .unwrap();

    // A re-exports its (still older) version and B imports it again.
    let out_dir_2 = dir_a.path().join("out2");
    std::fs::create_dir_all(&out_dir_2).unwrap();
    let report_2 = engine_a
        .export(engine_b.instance().instance_id.clone(), PkgExportMode::Full, None, None, out_dir_2)
        .await
        .unwrap();
    let scratch_2 = dir_b.path().join("scratch2");
    std::fs::create_dir_all(&scratch_2).unwrap();
    let import_report = engine_b.import_package(PathBuf::from(&report_2.package_path), scratch_2).await.unwrap();

    assert_eq!(import_report.conflicts, 1);
    assert_eq!(import_report.imported, 0);

    let row = engine_b.get_problem_by_id("p1".into()).await.unwrap().unwrap();
    assert_eq!(row.title, "b's newer title", "newer local row must survive an older import");

    let conflicts = engine_b.get_unresolved_conflicts(10).await.unwrap();
    assert_eq!(conflicts.len(), 1);
    let conflict_id = conflicts[0].id.clone();

    engine_b.resolve_conflict(conflict_id.clone(), Resolution::UseImported, "reviewer".into()).await.unwrap();
    let resolved = engine_b.get_conflict_detail(conflict_id).await.unwrap().unwrap();
    assert!(resolved.record.resolved_at_utc.is_some());

    let row = engine_b.get_problem_by_id("p1".into()).await.unwrap().unwrap();
    assert_eq!(row.title, "original title", "UseImported must overwrite with the imported snapshot");
}

#[tokio::test]
async fn test_purge_dry_run_then_hard_delete() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine_at(dir.path()).await;

    let by = engine.instance().instance_id.clone();
    engine.upsert_problem(problem("p1", "keep me", "2024-01-01T00:00:00.000Z", &by)).await.unwrap();
    engine.upsert_problem(problem("p2", "drop me", "2024-01-01T00:00:00.000Z", &by)).await.unwrap();
    engine.soft_delete_problem("p2".into(), by.clone()).await.unwrap();

    let filter = OwnedHardDeleteFilter {
        tag_ids: vec![],
        profession: OwnedProfessionFilter::All,
        updated_from_utc: None,
        updated_to_utc: None,
        include_soft_deleted: true,
    };

    let would_delete = engine.count_problems_for_hard_delete_filter(filter.clone()).await.unwrap();
    assert_eq!(would_delete, 2);

    let narrower = OwnedHardDeleteFilter { include_soft_deleted: false, ..filter.clone() };
    assert_eq!(engine.count_problems_for_hard_delete_filter(narrower).await.unwrap(), 1);

    let deleted = engine.hard_delete_problems(filter).await.unwrap();
    assert_eq!(deleted, 2);
    assert!(engine.get_problem_by_id("p1".into()).await.unwrap().is_none());
    assert!(engine.get_problem_by_id("p2".into()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_attach_file_is_content_addressed_and_retrievable() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine_at(dir.path()).await;
    let by = engine.instance().instance_id.clone();

    engine.upsert_problem(problem("p1", "has an attachment", "2024-01-01T00:00:00.000Z", &by)).await.unwrap();

    let source = dir.path().join("log.txt");
    std::fs::write(&source, b"sensor trace").unwrap();

    let attachment = engine.add_attachment(source, "p1".into(), by.clone()).await.unwrap();
    assert_eq!(attachment.size_bytes, "sensor trace".len() as i64);

    let stored_path = engine.get_attachment_local_path(&attachment.content_hash);
    assert!(stored_path.is_file());
    assert_eq!(std::fs::read(stored_path).unwrap(), b"sensor trace");

    let for_problem = engine.get_attachments_for_problem("p1".into()).await.unwrap();
    assert_eq!(for_problem.len(), 1);
    assert_eq!(for_problem[0].id, attachment.id);
}

#[tokio::test]
async fn test_tag_create_is_idempotent_by_case_folded_name() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine_at(dir.path()).await;
    let by = engine.instance().instance_id.clone();

    let a: Tag = engine.create_tag("Electrical".into(), by.clone()).await.unwrap();
    let b: Tag = engine.create_tag("electrical".into(), by.clone()).await.unwrap();
    assert_eq!(a.id, b.id, "case-folded duplicate tag names should resolve to the same tag");

    let tags = engine.get_all_tags().await.unwrap();
    assert_eq!(tags.len(), 1);
}

/// Scenario F: peer B pulls from peer A over the LAN endpoint using the
/// real HTTP server and a fresh `reqwest` client, the shared key required.
#[tokio::test]
async fn test_lan_export_over_http_then_import() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let engine_a = open_engine_at(dir_a.path()).await;
    let engine_b = open_engine_at(dir_b.path()).await;

    engine_a
        .upsert_problem(problem("p1", "visible over LAN", "2024-01-01T00:00:00.000Z", &engine_a.instance().instance_id.clone()))
        .await
        .unwrap();

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let backend: Arc<dyn LanBackend> = Arc::new(engine_a.clone());
    let server = LanServer::new(backend, Some("shared-secret".to_string()));
    let (tx, rx) = tokio::sync::oneshot::channel();
    let handle = tokio::spawn(server.serve(port, rx));
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let request = format!(
        "GET /lan/export?mode=full&remoteInstanceId={} HTTP/1.1\r\nHost: localhost\r\nX-Lan-Key: shared-secret\r\n\r\n",
        engine_b.instance().instance_id
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();

    tx.send(()).ok();
    let _ = handle.await;

    let split = response.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
    assert!(response.starts_with(b"HTTP/1.1 200"));
    let body = &response[split..];

    let scratch = dir_b.path().join("scratch");
    std::fs::create_dir_all(&scratch).unwrap();
    let package_path = scratch.join("from-a.zip");
    std::fs::write(&package_path, body).unwrap();

    let import_report = engine_b.import_package(package_path, scratch).await.unwrap();
    assert_eq!(import_report.imported, 1);

    let row = engine_b.get_problem_by_id("p1".into()).await.unwrap().unwrap();
    assert_eq!(row.title, "visible over LAN");

    // mode/instance id plumbing also exercised directly through the trait.
    let direct_bytes = engine_a
        .export_package_bytes(LanExportMode::Full, &engine_b.instance().instance_id)
        .await
        .unwrap();
    assert!(!direct_bytes.is_empty());
}
