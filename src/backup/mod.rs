//! Backup artifact classification and the restore result contract.
//!
//! [`detect_format`] looks at a path and decides what kind of backup it is
//! without reading more than a small header. Engines receive the detected
//! [`BackupFormat`] alongside the path and pick their own restore strategy;
//! [`evaluate_restore`] gives every engine the same success/soft-success rule.

mod detect;

pub use detect::{detect_format, HEADER_LEN};

use crate::error::{Error, Result};
use crate::process::CommandOutput;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Coarse backup representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FormatKind {
    /// Plain SQL statements.
    SqlText,
    /// Gzip-compressed payload (usually SQL text).
    CompressedSnapshot,
    /// `pg_dump -Fc` custom archive.
    CustomDump,
    /// `pg_dump -Fd` directory with a table of contents.
    DirectoryDump,
    /// Directory holding a `schema.sql` + `data.sql` pair.
    SchemaDataPair,
    /// A complete SQLite database file.
    SqliteFile,
    /// Zip archive.
    ZipArchive,
    Unknown,
}

impl fmt::Display for FormatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FormatKind::SqlText => "sql",
            FormatKind::CompressedSnapshot => "compressed",
            FormatKind::CustomDump => "custom",
            FormatKind::DirectoryDump => "directory",
            FormatKind::SchemaDataPair => "schema-data",
            FormatKind::SqliteFile => "sqlite",
            FormatKind::ZipArchive => "zip",
            FormatKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Advisory description of a backup artifact. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupFormat {
    pub format: FormatKind,
    pub description: String,
    /// Tool normally used to restore this format.
    pub restore_command: Option<String>,
    /// Remediation for formats we could not classify.
    pub hint: Option<String>,
}

impl BackupFormat {
    pub(crate) fn new(format: FormatKind, description: &str, restore_command: &str) -> Self {
        Self {
            format,
            description: description.to_string(),
            restore_command: Some(restore_command.to_string()),
            hint: None,
        }
    }

    pub(crate) fn unknown(description: String, hint: &str) -> Self {
        Self {
            format: FormatKind::Unknown,
            description,
            restore_command: None,
            hint: Some(hint.to_string()),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.format == FormatKind::Unknown
    }

    /// Fail with the remediation hint when the format was not recognized.
    pub fn require_known(&self) -> Result<()> {
        if self.is_unknown() {
            return Err(Error::UnknownBackupFormat {
                description: self.description.clone(),
                hint: self.hint.clone().unwrap_or_default(),
            });
        }
        Ok(())
    }
}

/// Output representation requested from `backup` and remote dumps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Plain SQL text.
    #[default]
    Sql,
    /// Engine-native binary format (custom dump, database file copy).
    Native,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct BackupOptions {
    /// Database to back up; the container's primary database when unset.
    pub database: Option<String>,
    pub format: OutputFormat,
}

/// Recognized restore switches. Unknown keys are rejected when deserialized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct RestoreOptions {
    /// Target database; the container's primary database when unset.
    pub database: Option<String>,
    /// Create the target database before restoring into it.
    pub create_database: bool,
    /// Drop existing objects before recreating them.
    pub drop: bool,
    /// Refuse dumps produced by a newer server major than the container runs.
    pub validate_version: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct DumpOptions {
    pub format: OutputFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupResult {
    pub path: PathBuf,
    pub format: FormatKind,
    pub size: u64,
}

/// Uniform restore outcome across engines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreResult {
    pub format: FormatKind,
    pub stdout: String,
    pub stderr: String,
    pub code: i32,
    /// Non-zero exit accepted because the tool reported a partial import.
    pub warnings: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DumpResult {
    pub path: PathBuf,
    pub format: FormatKind,
    pub size: u64,
}

/// Phrases restore tools print when they exit non-zero after a usable import.
const SOFT_SUCCESS_MARKERS: &[&str] = &[
    "errors ignored on restore",
    "completed with warnings",
    "completed with errors",
];

/// Whether a failed restore still produced a usable result.
pub fn is_soft_success(output: &CommandOutput) -> bool {
    let combined = format!("{}\n{}", output.stdout, output.stderr).to_lowercase();
    SOFT_SUCCESS_MARKERS.iter().any(|m| combined.contains(m))
}

/// Map a restore tool's exit into a [`RestoreResult`] or a typed failure.
pub fn evaluate_restore(
    command: &str,
    format: FormatKind,
    output: CommandOutput,
) -> Result<RestoreResult> {
    let code = output.code_or_signal();
    if output.success() {
        return Ok(RestoreResult {
            format,
            stdout: output.stdout,
            stderr: output.stderr,
            code,
            warnings: false,
        });
    }
    if is_soft_success(&output) {
        tracing::warn!("{} exited with {} but reported a partial restore", command, code);
        return Ok(RestoreResult {
            format,
            stdout: output.stdout,
            stderr: output.stderr,
            code,
            warnings: true,
        });
    }
    Err(Error::ProcessFailed {
        command: command.to_string(),
        code,
        stderr: output.stderr.trim().to_string(),
    })
}

/// Gunzip `src` into `dest`, streaming.
pub fn decompress_gzip(src: &Path, dest: &Path) -> Result<u64> {
    let input = fs::File::open(src)?;
    let mut decoder = flate2::read::GzDecoder::new(io::BufReader::new(input));
    let mut output = fs::File::create(dest)?;
    io::copy(&mut decoder, &mut output)
        .map_err(|e| Error::Extraction(format!("{}: {}", src.display(), e)))
}

/// Size of a file, or the summed size of a directory tree.
pub fn artifact_size(path: &Path) -> Result<u64> {
    let meta = fs::metadata(path)?;
    if !meta.is_dir() {
        return Ok(meta.len());
    }
    let mut total = 0;
    for entry in fs::read_dir(path)? {
        total += artifact_size(&entry?.path())?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(code: i32, stderr: &str) -> CommandOutput {
        CommandOutput {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn clean_exit_is_success() {
        let r = evaluate_restore("psql", FormatKind::SqlText, output(0, "")).unwrap();
        assert!(!r.warnings);
        assert_eq!(r.code, 0);
    }

    #[test]
    fn warning_phrasing_is_soft_success() {
        let r = evaluate_restore(
            "pg_restore",
            FormatKind::CustomDump,
            output(1, "pg_restore: warning: errors ignored on restore: 2"),
        )
        .unwrap();
        assert!(r.warnings);
        assert_eq!(r.code, 1);
    }

    #[test]
    fn plain_failure_is_process_error() {
        let err =
            evaluate_restore("psql", FormatKind::SqlText, output(3, "FATAL: no such db")).unwrap_err();
        assert!(matches!(err, Error::ProcessFailed { code: 3, .. }));
    }

    #[test]
    fn restore_options_reject_unknown_fields() {
        let ok: RestoreOptions =
            serde_json::from_str(r#"{"database":"app","createDatabase":true}"#).unwrap();
        assert!(ok.create_database);
        assert!(!ok.drop);
        assert!(serde_json::from_str::<RestoreOptions>(r#"{"force":true}"#).is_err());
    }

    #[test]
    fn gunzip_round_trip() {
        use std::io::Write;
        let dir = tempfile::tempdir().unwrap();
        let gz = dir.path().join("dump.sql.gz");
        let mut enc = flate2::write::GzEncoder::new(
            fs::File::create(&gz).unwrap(),
            flate2::Compression::default(),
        );
        enc.write_all(b"CREATE TABLE t (id int);\n").unwrap();
        enc.finish().unwrap();

        let out = dir.path().join("dump.sql");
        let n = decompress_gzip(&gz, &out).unwrap();
        assert_eq!(n, 25);
        assert_eq!(artifact_size(&out).unwrap(), 25);
    }
}
