//! Backup classification from artifact shape and header bytes.

use dbfleet::backup::{detect_format, FormatKind};
use dbfleet::Error;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("Failed to compress");
    encoder.finish().expect("Failed to finish gzip")
}

fn write(dir: &TempDir, name: &str, contents: &[u8]) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).expect("Failed to write artifact");
    path
}

#[test]
fn test_gzip_magic_wins_regardless_of_extension() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let compressed = gzip(b"CREATE TABLE t (id int);\n");
    for name in ["backup.sql", "backup.gz", "backup"] {
        let path = write(&dir, name, &compressed);
        let format = detect_format(&path).expect("Detect should succeed");
        assert_eq!(format.format, FormatKind::CompressedSnapshot, "{name}");
    }
}

#[test]
fn test_sqlite_and_custom_dump_headers() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let mut sqlite = b"SQLite format 3\0".to_vec();
    sqlite.extend_from_slice(&[0u8; 84]);
    let path = write(&dir, "export.sql", &sqlite);
    assert_eq!(detect_format(&path).expect("Detect").format, FormatKind::SqliteFile);

    let path = write(&dir, "nightly", b"PGDMP\x01\x0f\x00\x04\x08");
    let format = detect_format(&path).expect("Detect");
    assert_eq!(format.format, FormatKind::CustomDump);
    assert_eq!(format.restore_command.as_deref(), Some("pg_restore"));
}

#[test]
fn test_zip_archive() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = write(&dir, "bundle.bin", b"PK\x03\x04rest-of-zip");
    assert_eq!(detect_format(&path).expect("Detect").format, FormatKind::ZipArchive);
}

#[test]
fn test_directory_dump_with_toc() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let dump = dir.path().join("dump_dir");
    fs::create_dir_all(&dump).expect("Failed to create dump dir");
    fs::write(dump.join("toc.dat"), b"PGDMP").expect("Failed to write toc");
    fs::write(dump.join("3001.dat.gz"), b"").expect("Failed to write data");

    let format = detect_format(&dump).expect("Detect");
    assert_eq!(format.format, FormatKind::DirectoryDump);
}

#[test]
fn test_schema_data_pair_directory() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let pair = dir.path().join("pair");
    fs::create_dir_all(&pair).expect("Failed to create dir");
    fs::write(pair.join("schema.sql"), "CREATE TABLE t (id int);").expect("write");
    fs::write(pair.join("data.sql.gz"), gzip(b"INSERT INTO t VALUES (1);")).expect("write");

    assert_eq!(
        detect_format(&pair).expect("Detect").format,
        FormatKind::SchemaDataPair
    );
}

#[test]
fn test_plain_sql_by_keywords() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = write(
        &dir,
        "export.txt",
        b"--\n-- PostgreSQL database dump\n--\nSET statement_timeout = 0;\nCREATE TABLE t (id int);\n",
    );
    assert_eq!(detect_format(&path).expect("Detect").format, FormatKind::SqlText);
}

#[test]
fn test_unknown_comes_with_a_hint() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = write(&dir, "mystery.bin", &[0u8, 159, 146, 150, 7, 7, 7]);

    let format = detect_format(&path).expect("Detect should not fail");
    assert!(format.is_unknown());
    assert!(format.restore_command.is_none());
    assert!(format.hint.as_deref().is_some_and(|h| !h.is_empty()));

    let err = format.require_known().expect_err("Unknown must be refused");
    assert!(matches!(err, Error::UnknownBackupFormat { .. }));

    let empty = dir.path().join("empty_dir");
    fs::create_dir_all(&empty).expect("Failed to create dir");
    assert!(detect_format(&empty).expect("Detect").is_unknown());
}

#[test]
fn test_missing_artifact_is_not_found() {
    let err = detect_format(Path::new("/definitely/not/here.dump")).expect_err("Missing file");
    assert!(matches!(err, Error::BackupNotFound(_)));
}
