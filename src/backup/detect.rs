use super::{BackupFormat, FormatKind};
use crate::error::{Error, Result};
use std::fs;
use std::io::Read;
use std::path::Path;

/// Bytes inspected when sniffing a file.
pub const HEADER_LEN: usize = 4096;

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const SQLITE_MAGIC: &[u8] = b"SQLite format 3\0";
const PG_CUSTOM_MAGIC: &[u8] = b"PGDMP";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

const SQL_KEYWORDS: &[&str] = &[
    "create table",
    "insert into",
    "create schema",
    "create index",
    "begin transaction",
    "pragma ",
    "set statement_timeout",
    "-- postgresql database dump",
    "copy ",
];

const UNKNOWN_HINT: &str = "Could not identify this backup. Supported inputs are SQL text \
(.sql), gzip-compressed SQL (.sql.gz), pg_dump custom (-Fc) or directory (-Fd) dumps, \
schema.sql + data.sql directories, and SQLite database files. Re-export with one of these \
formats or decompress the file first.";

/// Classify the backup at `path`.
///
/// Directories are classified by shape. For files, a recognized binary
/// signature in the header wins over the extension, the extension wins over
/// content keywords, and anything left over is `unknown` with a hint.
pub fn detect_format(path: &Path) -> Result<BackupFormat> {
    let meta = fs::metadata(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::BackupNotFound(path.to_path_buf()),
        _ => Error::Io(e),
    })?;

    if meta.is_dir() {
        return Ok(detect_directory(path));
    }

    let header = read_header(path)?;
    if let Some(format) = from_magic(&header) {
        return Ok(format);
    }
    if let Some(format) = from_extension(path) {
        return Ok(format);
    }
    if let Some(format) = from_keywords(&header) {
        return Ok(format);
    }
    Ok(BackupFormat::unknown(
        format!("{}: no recognizable markers", path.display()),
        UNKNOWN_HINT,
    ))
}

fn read_header(path: &Path) -> Result<Vec<u8>> {
    let file = fs::File::open(path)?;
    let mut header = Vec::with_capacity(HEADER_LEN);
    file.take(HEADER_LEN as u64).read_to_end(&mut header)?;
    Ok(header)
}

fn detect_directory(path: &Path) -> BackupFormat {
    if path.join("toc.dat").is_file() {
        return BackupFormat::new(
            FormatKind::DirectoryDump,
            "pg_dump directory archive",
            "pg_restore",
        );
    }
    let has = |stem: &str| {
        ["sql", "sql.gz"]
            .iter()
            .any(|ext| path.join(format!("{}.{}", stem, ext)).is_file())
    };
    if has("schema") && has("data") {
        return BackupFormat::new(
            FormatKind::SchemaDataPair,
            "schema and data SQL pair",
            "psql",
        );
    }
    BackupFormat::unknown(
        format!("{}: directory without a known dump layout", path.display()),
        UNKNOWN_HINT,
    )
}

fn from_magic(header: &[u8]) -> Option<BackupFormat> {
    if header.starts_with(GZIP_MAGIC) {
        Some(BackupFormat::new(
            FormatKind::CompressedSnapshot,
            "gzip-compressed snapshot",
            "gunzip, then restore the inner file",
        ))
    } else if header.starts_with(SQLITE_MAGIC) {
        Some(BackupFormat::new(
            FormatKind::SqliteFile,
            "SQLite database file",
            "sqlite3",
        ))
    } else if header.starts_with(PG_CUSTOM_MAGIC) {
        Some(BackupFormat::new(
            FormatKind::CustomDump,
            "pg_dump custom-format archive",
            "pg_restore",
        ))
    } else if header.starts_with(ZIP_MAGIC) {
        Some(BackupFormat::new(FormatKind::ZipArchive, "zip archive", "unzip"))
    } else {
        None
    }
}

fn from_extension(path: &Path) -> Option<BackupFormat> {
    let name = path.file_name()?.to_string_lossy().to_lowercase();
    let ext = name.rsplit('.').next()?;
    if !name.contains('.') {
        return None;
    }
    let format = match ext {
        "sql" | "psql" => BackupFormat::new(FormatKind::SqlText, "SQL text", "psql"),
        "gz" | "tgz" => BackupFormat::new(
            FormatKind::CompressedSnapshot,
            "gzip-compressed snapshot",
            "gunzip, then restore the inner file",
        ),
        "dump" | "backup" | "custom" => {
            BackupFormat::new(FormatKind::CustomDump, "pg_dump custom-format archive", "pg_restore")
        }
        "sqlite" | "sqlite3" | "db" => {
            BackupFormat::new(FormatKind::SqliteFile, "SQLite database file", "sqlite3")
        }
        "zip" => BackupFormat::new(FormatKind::ZipArchive, "zip archive", "unzip"),
        _ => return None,
    };
    Some(format)
}

fn from_keywords(header: &[u8]) -> Option<BackupFormat> {
    // Binary data is not SQL no matter what it happens to contain.
    if header.contains(&0) {
        return None;
    }
    let text = String::from_utf8_lossy(header).to_lowercase();
    SQL_KEYWORDS
        .iter()
        .any(|k| text.contains(k))
        .then(|| BackupFormat::new(FormatKind::SqlText, "SQL text", "psql"))
}
