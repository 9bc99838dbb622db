//! Binary acquisition against a local HTTP responder: install, cache hits,
//! failure cleanup and archive layout normalization.

mod common;

use common::{
    serve, serve_routes, tar_gz, test_context_with, test_platform, test_settings, MockSource,
    Reply,
};
use dbfleet::binary::{BinaryManager, VerifyPolicy, VersionPrecision};
use dbfleet::progress::{Progress, Stage};
use dbfleet::{Context, Error};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn manager(dir: &TempDir, base_url: &str, timeout: Duration) -> (Context, BinaryManager) {
    manager_with(dir, base_url, timeout, MockSource::new())
}

fn manager_with(
    dir: &TempDir,
    base_url: &str,
    timeout: Duration,
    source: MockSource,
) -> (Context, BinaryManager) {
    let mut settings = test_settings();
    settings.release_base_url = base_url.to_string();
    settings.download_timeout = timeout;
    let ctx = test_context_with(dir.path(), settings);
    let manager = BinaryManager::with_platform(ctx.clone(), Arc::new(source), test_platform());
    (ctx, manager)
}

fn version_checked() -> MockSource {
    MockSource::new().with_verify(VerifyPolicy::VersionFlag {
        flag: "--version",
        precision: VersionPrecision::Major,
    })
}

/// An archive whose `mockdb` reports `reported` for `--version`.
fn reporting_archive(reported: &str) -> Vec<u8> {
    let script = format!("#!/bin/sh\necho \"mockdb (Mock) {}\"\n", reported);
    tar_gz(&[("mockdb-16.6.0/bin/mockdb", script.as_bytes(), 0o755)])
}

/// No staging leftovers or install dirs besides `expected`.
fn bin_entries(ctx: &Context) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(ctx.bin_dir())
        .expect("Failed to read bin dir")
        .map(|e| {
            e.expect("Failed to read entry")
                .file_name()
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    names.sort();
    names
}

// =============================================================================
// Successful installs
// =============================================================================

#[tokio::test]
async fn test_install_then_cache_hit() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let archive = tar_gz(&[
        ("mockdb-16.6.0/bin/mockdb", b"#!/bin/sh\necho 16.6.0\n", 0o755),
        ("mockdb-16.6.0/share/README", b"docs", 0o644),
    ]);
    let base = serve(Reply::Ok(archive)).await;
    let (ctx, manager) = manager(&dir, &base, Duration::from_secs(30));

    let (progress, mut events) = Progress::channel(64);
    let installed = manager
        .ensure_installed("16", &progress)
        .await
        .expect("Install should succeed");
    drop(progress);

    assert_eq!(installed.version, "16.6.0");
    assert_eq!(installed.path, manager.install_dir("16.6.0"));
    assert!(installed.executable("mockdb").is_file());
    assert!(installed.path.join("share/README").is_file());

    let mut stages = Vec::new();
    while let Some(event) = events.recv().await {
        stages.push(event.stage);
    }
    assert!(stages.contains(&Stage::Downloading));
    assert!(stages.contains(&Stage::Installed));

    // Aliases land on the same install without another download.
    let (progress, mut events) = Progress::channel(64);
    let again = manager
        .ensure_installed("16.6", &progress)
        .await
        .expect("Cached install should succeed");
    drop(progress);
    assert_eq!(again.path, installed.path);
    let mut stages = Vec::new();
    while let Some(event) = events.recv().await {
        stages.push(event.stage);
    }
    assert!(stages.contains(&Stage::Cached));
    assert!(!stages.contains(&Stage::Downloading));

    assert_eq!(bin_entries(&ctx), vec!["mockdb-16.6.0-linux-x64".to_string()]);
}

#[tokio::test]
async fn test_flat_archive_is_sorted_into_bin() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let archive = tar_gz(&[
        ("mockdb", b"#!/bin/sh\n", 0o755),
        ("LICENSE", b"license", 0o644),
    ]);
    let base = serve(Reply::Ok(archive)).await;
    let (_ctx, manager) = manager(&dir, &base, Duration::from_secs(30));

    let installed = manager
        .ensure_installed("17", &Progress::none())
        .await
        .expect("Install should succeed");

    assert_eq!(installed.version, "17.2.0");
    assert!(installed.path.join("bin/mockdb").is_file());
    assert!(!installed.path.join("mockdb").exists());
}

#[tokio::test]
async fn test_concurrent_installs_share_one_result() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let archive = tar_gz(&[("mockdb-16.6.0/bin/mockdb", b"#!/bin/sh\n", 0o755)]);
    let base = serve(Reply::Ok(archive)).await;
    let (ctx, manager) = manager(&dir, &base, Duration::from_secs(30));

    let (first, second) = (Progress::none(), Progress::none());
    let (a, b) = tokio::join!(
        manager.ensure_installed("16", &first),
        manager.ensure_installed("16.6.0", &second),
    );
    let a = a.expect("First install should succeed");
    let b = b.expect("Second install should succeed");
    assert_eq!(a.path, b.path);
    assert_eq!(bin_entries(&ctx), vec!["mockdb-16.6.0-linux-x64".to_string()]);
}

#[tokio::test]
async fn test_archiver_metadata_is_skipped() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let archive = tar_gz(&[
        ("mockdb-16.6.0/bin/mockdb", b"#!/bin/sh\n", 0o755),
        ("__MACOSX/mockdb-16.6.0/bin/._mockdb", b"resource fork", 0o644),
        ("mockdb-16.6.0/.DS_Store", b"finder", 0o644),
    ]);
    let base = serve(Reply::Ok(archive)).await;
    let (_ctx, manager) = manager(&dir, &base, Duration::from_secs(30));

    let installed = manager
        .ensure_installed("16", &Progress::none())
        .await
        .expect("Install should succeed");

    assert!(installed.path.join("bin/mockdb").is_file());
    assert!(!installed.path.join("__MACOSX").exists());
    assert!(!installed.path.join(".DS_Store").exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_version_flag_accepts_matching_major() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let base = serve(Reply::Ok(reporting_archive("16.2"))).await;
    let (_ctx, manager) = manager_with(&dir, &base, Duration::from_secs(30), version_checked());

    let installed = manager
        .ensure_installed("16", &Progress::none())
        .await
        .expect("Matching major should install");
    assert_eq!(installed.version, "16.6.0");
    assert!(manager.is_installed("16"));
}

#[tokio::test]
async fn test_checksum_match_installs() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let archive = tar_gz(&[("mockdb-16.6.0/bin/mockdb", b"#!/bin/sh\n", 0o755)]);
    let digest = hex::encode(Sha256::digest(&archive));
    let base = serve_routes(vec![
        (".sha256", Reply::Ok(format!("{}  mockdb.tar.gz\n", digest).into_bytes())),
        ("", Reply::Ok(archive)),
    ])
    .await;
    let (_ctx, manager) = manager_with(
        &dir,
        &base,
        Duration::from_secs(30),
        MockSource::new().with_checksums(),
    );

    manager
        .ensure_installed("16", &Progress::none())
        .await
        .expect("Matching checksum should install");
    assert!(manager.is_installed("16.6.0"));
}

// =============================================================================
// Failures leave nothing behind
// =============================================================================

#[tokio::test]
async fn test_http_error_is_typed_and_cleans_up() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let base = serve(Reply::Status(404)).await;
    let (ctx, manager) = manager(&dir, &base, Duration::from_secs(30));

    let err = manager
        .ensure_installed("16", &Progress::none())
        .await
        .expect_err("404 should fail");

    assert!(matches!(err, Error::DownloadHttp { status: 404, .. }), "unexpected error: {err}");
    assert!(!manager.install_dir("16.6.0").exists());
    assert!(bin_entries(&ctx).is_empty(), "staging must be removed");
}

#[tokio::test]
async fn test_stalled_download_times_out() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let base = serve(Reply::Stall).await;
    let (ctx, manager) = manager(&dir, &base, Duration::from_millis(300));

    let err = manager
        .ensure_installed("16", &Progress::none())
        .await
        .expect_err("Stalled download should fail");

    assert!(matches!(err, Error::DownloadTimeout { .. }), "unexpected error: {err}");
    assert!(!manager.is_installed("16"));
    assert!(bin_entries(&ctx).is_empty());
}

#[tokio::test]
async fn test_archive_without_executables_fails_extraction() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let archive = tar_gz(&[("README", b"nothing useful", 0o644), ("NOTES", b"x", 0o644)]);
    let base = serve(Reply::Ok(archive)).await;
    let (ctx, manager) = manager(&dir, &base, Duration::from_secs(30));

    let err = manager
        .ensure_installed("16", &Progress::none())
        .await
        .expect_err("Archive without executables should fail");

    assert!(matches!(err, Error::Extraction(_)), "unexpected error: {err}");
    assert!(bin_entries(&ctx).is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_version_mismatch_fails_verification_and_cleans_up() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let base = serve(Reply::Ok(reporting_archive("15.4"))).await;
    let (ctx, manager) = manager_with(&dir, &base, Duration::from_secs(30), version_checked());

    let err = manager
        .ensure_installed("16", &Progress::none())
        .await
        .expect_err("Wrong major should fail verification");

    match err {
        Error::Verification { expected, actual } => {
            assert_eq!(expected, "16.6.0");
            assert_eq!(actual, "15.4");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!manager.install_dir("16.6.0").exists());
    assert!(bin_entries(&ctx).is_empty(), "no partial install may remain");
}

#[tokio::test]
async fn test_checksum_mismatch_fails_and_cleans_up() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let archive = tar_gz(&[("mockdb-16.6.0/bin/mockdb", b"#!/bin/sh\n", 0o755)]);
    let bogus = "0".repeat(64);
    let base = serve_routes(vec![
        (".sha256", Reply::Ok(format!("{}  mockdb.tar.gz\n", bogus).into_bytes())),
        ("", Reply::Ok(archive.clone())),
    ])
    .await;
    let (ctx, manager) = manager_with(
        &dir,
        &base,
        Duration::from_secs(30),
        MockSource::new().with_checksums(),
    );

    let err = manager
        .ensure_installed("16", &Progress::none())
        .await
        .expect_err("Checksum mismatch should fail");

    match err {
        Error::Checksum { expected, actual } => {
            assert_eq!(expected, bogus);
            assert_eq!(actual, hex::encode(Sha256::digest(&archive)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!manager.is_installed("16"));
    assert!(bin_entries(&ctx).is_empty());
}

// =============================================================================
// Listing and removal
// =============================================================================

#[tokio::test]
async fn test_list_and_uninstall() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let archive = tar_gz(&[("bin/mockdb", b"#!/bin/sh\n", 0o755)]);
    let base = serve(Reply::Ok(archive)).await;
    let (_ctx, manager) = manager(&dir, &base, Duration::from_secs(30));

    manager
        .ensure_installed("16", &Progress::none())
        .await
        .expect("Install 16 should succeed");
    manager
        .ensure_installed("17", &Progress::none())
        .await
        .expect("Install 17 should succeed");

    let versions: Vec<String> = manager
        .list_installed()
        .expect("Listing should succeed")
        .into_iter()
        .map(|b| b.version)
        .collect();
    assert_eq!(versions, vec!["17.2.0".to_string(), "16.6.0".to_string()]);

    assert!(manager.uninstall("17").expect("Uninstall should succeed"));
    assert!(!manager.uninstall("17").expect("Second uninstall should succeed"));
    assert!(manager.get_installed("17").is_err());
    assert!(manager.get_installed("16").is_ok());
}
