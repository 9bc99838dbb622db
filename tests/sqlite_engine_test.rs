//! File-based containers end to end, using a shell stand-in for `sqlite3`.
#![cfg(unix)]

mod common;

use common::{install_fake_sqlite, test_context, test_platform};
use dbfleet::backup::{BackupOptions, OutputFormat};
use dbfleet::engine::{Engine, EngineKind, EngineSet, ScriptSource, SqliteEngine};
use dbfleet::progress::Progress;
use dbfleet::registry::absolute_path;
use dbfleet::{CreateRequest, Error, FormatKind, Orchestrator};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

struct Fixture {
    dir: TempDir,
    orchestrator: Orchestrator,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let ctx = test_context(&dir.path().join("home"));
    install_fake_sqlite(&ctx);
    let engine = SqliteEngine::new(ctx.clone(), test_platform());
    let orchestrator = Orchestrator::builder()
        .context(ctx)
        .engines(EngineSet::from_engines([Arc::new(engine) as Arc<dyn Engine>]))
        .build()
        .expect("Failed to build orchestrator");
    Fixture { dir, orchestrator }
}

async fn create(fx: &Fixture, name: &str, database: Option<&Path>) -> PathBuf {
    let mut request = CreateRequest::new(EngineKind::Sqlite);
    if let Some(path) = database {
        request = request.database(path.to_string_lossy());
    }
    let outcome = fx
        .orchestrator
        .create(name, request, &Progress::none())
        .await
        .expect("Create should succeed");
    assert_eq!(outcome.config.port, 0);
    PathBuf::from(outcome.config.database)
}

fn registered_path(fx: &Fixture, name: &str) -> Option<PathBuf> {
    fx.orchestrator
        .registry()
        .get(name)
        .expect("Registry should be readable")
        .map(|entry| entry.file_path)
}

// =============================================================================
// Create / start / status
// =============================================================================

#[tokio::test]
async fn test_create_materializes_file_and_registers_it() {
    let fx = fixture();
    let db = create(&fx, "app", None).await;

    assert!(db.is_absolute());
    assert!(db.ends_with("containers/sqlite/app/app.sqlite"));
    assert!(dbfleet::engine::is_sqlite_file(&db));
    assert_eq!(registered_path(&fx, "app"), Some(db));
}

#[tokio::test]
async fn test_start_is_a_file_check() {
    let fx = fixture();
    let db = create(&fx, "app", None).await;

    let started = fx
        .orchestrator
        .start("app", None, &Progress::none())
        .await
        .expect("Start should succeed");
    assert_eq!(started.outcome.port, 0);
    assert_eq!(
        started.outcome.connection_string,
        format!("sqlite://{}", db.display())
    );
    assert!(fx
        .orchestrator
        .registry()
        .get("app")
        .expect("Registry should be readable")
        .and_then(|e| e.last_verified)
        .is_some());

    fs::remove_file(&db).expect("Failed to remove database file");
    let state = fx
        .orchestrator
        .status("app", None)
        .await
        .expect("Status should succeed");
    assert!(!state.status.running);
}

#[tokio::test]
async fn test_two_containers_cannot_share_a_file() {
    let fx = fixture();
    let shared = fx.dir.path().join("shared.sqlite");
    create(&fx, "first", Some(&shared)).await;

    let err = fx
        .orchestrator
        .create(
            "second",
            CreateRequest::new(EngineKind::Sqlite).database(shared.to_string_lossy()),
            &Progress::none(),
        )
        .await
        .expect_err("Second binding should fail");
    assert!(matches!(err, Error::FilePathInUse { .. }), "unexpected error: {err}");
    assert!(!fx
        .orchestrator
        .containers()
        .exists("second", EngineKind::Sqlite));
}

// =============================================================================
// Databases
// =============================================================================

#[tokio::test]
async fn test_created_database_is_listed_without_leftovers() {
    let fx = fixture();
    let db = create(&fx, "app", None).await;

    fx.orchestrator
        .create_database("app", None, "analytics")
        .await
        .expect("Create database should succeed");

    let sibling = db.with_file_name("analytics.sqlite");
    assert!(dbfleet::engine::is_sqlite_file(&sibling));

    let listed = fx
        .orchestrator
        .list_databases("app", None)
        .await
        .expect("List databases should succeed");
    assert_eq!(listed, vec!["app".to_string(), "analytics".to_string()]);

    fx.orchestrator
        .drop_database("app", None, "analytics")
        .await
        .expect("Drop database should succeed");
    assert!(!sibling.exists());
}

#[tokio::test]
async fn test_sibling_names_with_separators_are_rejected() {
    let fx = fixture();
    create(&fx, "app", None).await;

    let err = fx
        .orchestrator
        .create_database("app", None, "../escape")
        .await
        .expect_err("Path-like names should fail");
    assert!(matches!(err, Error::InvalidName { .. }));
}

// =============================================================================
// Backup / scripts
// =============================================================================

#[tokio::test]
async fn test_sql_backup_writes_dump() {
    let fx = fixture();
    create(&fx, "app", None).await;
    let output = fx.dir.path().join("backups/app.sql");

    let result = fx
        .orchestrator
        .backup("app", None, &output, &BackupOptions::default())
        .await
        .expect("Backup should succeed");

    assert_eq!(result.format, FormatKind::SqlText);
    assert!(result.size > 0);
    let text = fs::read_to_string(&output).expect("Failed to read dump");
    assert!(text.contains("CREATE TABLE"));
    assert_eq!(
        fx.orchestrator.detect(&output).expect("Detect").format,
        FormatKind::SqlText
    );
}

#[tokio::test]
async fn test_native_backup_is_a_database_file() {
    let fx = fixture();
    create(&fx, "app", None).await;
    let output = fx.dir.path().join("app-copy.bin");

    let options = BackupOptions {
        format: OutputFormat::Native,
        ..BackupOptions::default()
    };
    let result = fx
        .orchestrator
        .backup("app", None, &output, &options)
        .await
        .expect("Backup should succeed");

    assert_eq!(result.format, FormatKind::SqliteFile);
    assert_eq!(
        fx.orchestrator.detect(&output).expect("Detect").format,
        FormatKind::SqliteFile,
        "header must win over the unknown extension"
    );
}

#[tokio::test]
async fn test_run_inline_script() {
    let fx = fixture();
    create(&fx, "app", None).await;

    let output = fx
        .orchestrator
        .run_script(
            "app",
            None,
            &ScriptSource::Inline("SELECT 1;".to_string()),
            None,
        )
        .await
        .expect("Script should succeed");
    assert_eq!(output.code, Some(0));
}

// =============================================================================
// Rename / clone / relocate / delete
// =============================================================================

#[tokio::test]
async fn test_rename_repoints_file_inside_container_dir() {
    let fx = fixture();
    create(&fx, "app", None).await;

    let renamed = fx
        .orchestrator
        .rename("app", "shop", None)
        .await
        .expect("Rename should succeed");

    let moved = PathBuf::from(&renamed.database);
    assert!(moved.ends_with("containers/sqlite/shop/app.sqlite"));
    assert!(moved.is_file());
    assert_eq!(registered_path(&fx, "shop"), Some(moved));
    assert_eq!(registered_path(&fx, "app"), None);
}

#[tokio::test]
async fn test_clone_gets_its_own_file() {
    let fx = fixture();
    let external = fx.dir.path().join("data/app.sqlite");
    let source = create(&fx, "app", Some(&external)).await;

    let cloned = fx
        .orchestrator
        .clone_container("app", "app_copy", None)
        .await
        .expect("Clone should succeed");

    let copy = PathBuf::from(&cloned.database);
    assert_ne!(copy, source);
    assert_eq!(copy.file_name().and_then(|n| n.to_str()), Some("app_copy.sqlite"));
    assert!(copy.is_file());
    assert_eq!(registered_path(&fx, "app_copy"), Some(copy));
    assert_eq!(registered_path(&fx, "app"), Some(source));
}

#[tokio::test]
async fn test_relocate_into_directory_keeps_file_name() {
    let fx = fixture();
    let old = create(&fx, "app", None).await;
    let dest = fx.dir.path().join("moved");
    fs::create_dir_all(&dest).expect("Failed to create destination");

    let updated = fx
        .orchestrator
        .relocate("app", &dest)
        .expect("Relocate should succeed");

    let expected = absolute_path(&dest.join("app.sqlite")).expect("absolute path");
    assert_eq!(PathBuf::from(&updated.database), expected);
    assert!(expected.is_file());
    assert!(!old.exists());
    assert_eq!(registered_path(&fx, "app"), Some(expected));
}

#[tokio::test]
async fn test_relocate_across_devices_copies_then_removes() {
    let fx = fixture();
    let old = create(&fx, "app", None).await;
    // Sidecar left by an interrupted write must travel with the database.
    let wal = PathBuf::from(format!("{}-wal", old.display()));
    fs::write(&wal, b"wal").expect("Failed to write sidecar");
    let target = fx.dir.path().join("other-disk/app.sqlite");

    let renames = AtomicU32::new(0);
    let updated = fx
        .orchestrator
        .relocate_with("app", &target, |_, _| {
            renames.fetch_add(1, Ordering::SeqCst);
            Err(io::Error::from_raw_os_error(nix::errno::Errno::EXDEV as i32))
        })
        .expect("Relocate should fall back to copying");

    let expected = absolute_path(&target).expect("absolute path");
    assert_eq!(PathBuf::from(&updated.database), expected);
    assert!(expected.is_file());
    assert!(!old.exists(), "source must be removed after the copy");
    assert!(PathBuf::from(format!("{}-wal", expected.display())).is_file());
    assert!(!wal.exists());
    assert_eq!(renames.load(Ordering::SeqCst), 2);

    assert_eq!(registered_path(&fx, "app"), Some(expected.clone()));
    let entries = fx.orchestrator.registry().list().expect("Registry list");
    assert!(entries.iter().all(|e| e.file_path != old));
}

#[tokio::test]
async fn test_relocate_refuses_existing_target() {
    let fx = fixture();
    let old = create(&fx, "app", None).await;
    let target = fx.dir.path().join("taken.sqlite");
    fs::write(&target, b"occupied").expect("Failed to write target");

    let err = fx
        .orchestrator
        .relocate("app", &target)
        .expect_err("Existing target should be refused");
    assert!(matches!(err, Error::DataDirExists { .. }));
    assert!(old.is_file());
}

#[tokio::test]
async fn test_delete_keeps_external_file() {
    let fx = fixture();
    let external = fx.dir.path().join("keep/app.sqlite");
    let db = create(&fx, "app", Some(&external)).await;

    fx.orchestrator
        .delete("app", None)
        .await
        .expect("Delete should succeed");

    assert!(db.is_file(), "external database must survive delete");
    assert_eq!(registered_path(&fx, "app"), None);
    assert!(!fx.orchestrator.containers().exists("app", EngineKind::Sqlite));
}

#[tokio::test]
async fn test_orphans_are_found_and_pruned() {
    let fx = fixture();
    let external = fx.dir.path().join("gone/app.sqlite");
    let db = create(&fx, "app", Some(&external)).await;
    create(&fx, "kept", None).await;

    fs::remove_file(&db).expect("Failed to remove database file");

    let orphans = fx.orchestrator.orphans().expect("Orphan scan");
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].name, "app");

    let pruned = fx.orchestrator.prune_orphans().expect("Prune");
    assert_eq!(pruned.len(), 1);
    assert!(!fx.orchestrator.containers().exists("app", EngineKind::Sqlite));
    assert!(fx.orchestrator.containers().exists("kept", EngineKind::Sqlite));
    assert!(fx.orchestrator.orphans().expect("Orphan scan").is_empty());
}
