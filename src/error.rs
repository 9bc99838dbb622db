// Allow unused_assignments at module level because thiserror's generated code
// for struct variants triggers false positive warnings - the fields ARE used
// in the Display impl but rustc's lint pass doesn't see this.
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Machine-checkable classification of an [`Error`].
///
/// Callers branch on the kind instead of inspecting message text. The kind is
/// fixed at the point the failure is first observed (e.g. an engine reading
/// its server log after a failed bind), never re-derived later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    UnsupportedPlatform,
    DownloadFailure,
    ExtractionFailure,
    VerificationFailure,
    PortInUse,
    VersionIncompatible,
    UnsupportedOperation,
    ProcessFailure,
    InvalidInput,
    Internal,
}

#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    #[diagnostic(code(dbfleet::config::error))]
    Config(String),

    #[error("Invalid container name '{name}': {reason}")]
    #[diagnostic(
        code(dbfleet::container::invalid_name),
        help("Names must start with a letter and contain only letters, digits, '-' and '_'")
    )]
    InvalidName { name: String, reason: String },

    #[error("Container '{0}' not found")]
    #[diagnostic(
        code(dbfleet::container::not_found),
        help("List containers with `dbf list`")
    )]
    ContainerNotFound(String),

    #[error("Container '{name}' already exists for engine {engine}")]
    #[diagnostic(code(dbfleet::container::exists))]
    AlreadyExists { engine: String, name: String },

    #[error("Container '{0}' is running")]
    #[diagnostic(
        code(dbfleet::container::running),
        help("Stop it first with: dbf stop {0}")
    )]
    ContainerRunning(String),

    #[error("Database '{database}' not found in container '{container}'")]
    DatabaseNotFound { container: String, database: String },

    #[error("No installed binaries for {engine} {version}")]
    #[diagnostic(
        code(dbfleet::binary::not_found),
        help("Install them with: dbf install {engine} {version}")
    )]
    BinaryNotFound { engine: String, version: String },

    #[error("{engine} {version} is still used by: {containers}")]
    #[diagnostic(
        code(dbfleet::binary::in_use),
        help("Delete those containers before uninstalling")
    )]
    BinaryInUse {
        engine: String,
        version: String,
        containers: String,
    },

    #[error("No registry entry for '{0}'")]
    RegistryEntryNotFound(String),

    #[error("Backup {0} does not exist")]
    BackupNotFound(PathBuf),

    #[error("File {path} is already registered as '{existing}'")]
    #[diagnostic(code(dbfleet::registry::path_in_use))]
    FilePathInUse { path: PathBuf, existing: String },

    #[error("Data for '{name}' already exists at {path}")]
    #[diagnostic(
        code(dbfleet::engine::data_exists),
        help("Delete the existing container or choose another name")
    )]
    DataDirExists { name: String, path: PathBuf },

    #[error("{engine} has no published binaries for {platform}")]
    #[diagnostic(code(dbfleet::binary::unsupported_platform))]
    UnsupportedPlatform { engine: String, platform: String },

    #[error("Download of {url} timed out after {seconds}s")]
    #[diagnostic(
        code(dbfleet::download::timeout),
        help("Check your network connection or raise download_timeout in config.yaml")
    )]
    DownloadTimeout { url: String, seconds: u64 },

    #[error("Download of {url} failed with HTTP {status}")]
    #[diagnostic(
        code(dbfleet::download::http),
        help("A 404 usually means the version does not exist for this platform")
    )]
    DownloadHttp { url: String, status: u16 },

    #[error("Download failed: {0}")]
    #[diagnostic(code(dbfleet::download::network))]
    Download(String),

    #[error("Archive extraction failed: {0}")]
    #[diagnostic(code(dbfleet::binary::extraction))]
    Extraction(String),

    #[error("Binary verification failed: expected version {expected}, found {actual}")]
    #[diagnostic(code(dbfleet::binary::verification))]
    Verification { expected: String, actual: String },

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    #[diagnostic(code(dbfleet::binary::checksum))]
    Checksum { expected: String, actual: String },

    #[error("Port {port} is already in use")]
    #[diagnostic(
        code(dbfleet::port::in_use),
        help("Find what's using the port with: lsof -i :{port}")
    )]
    PortInUse { port: u16 },

    #[error("No available port in range {start}-{end}")]
    #[diagnostic(code(dbfleet::port::exhausted))]
    NoAvailablePort { start: u16, end: u16 },

    #[error("Unrecognized backup format: {description}")]
    #[diagnostic(code(dbfleet::backup::unknown_format))]
    UnknownBackupFormat { description: String, hint: String },

    #[error("Version incompatible: {0}")]
    #[diagnostic(code(dbfleet::backup::version))]
    VersionIncompatible(String),

    #[error("{engine} does not support {operation}")]
    #[diagnostic(code(dbfleet::engine::unsupported))]
    UnsupportedOperation { engine: String, operation: String },

    #[error("{command} exited with code {code}: {stderr}")]
    #[diagnostic(code(dbfleet::process::failed))]
    ProcessFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("Failed to launch {command}: {reason}")]
    #[diagnostic(
        code(dbfleet::process::spawn),
        help("Check that the command exists and is executable")
    )]
    Spawn { command: String, reason: String },

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Invalid PID {pid}: {reason}")]
    InvalidPid { pid: u32, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ContainerNotFound(_)
            | Error::DatabaseNotFound { .. }
            | Error::BinaryNotFound { .. }
            | Error::RegistryEntryNotFound(_)
            | Error::BackupNotFound(_) => ErrorKind::NotFound,
            Error::AlreadyExists { .. } | Error::FilePathInUse { .. } | Error::DataDirExists { .. } => {
                ErrorKind::AlreadyExists
            }
            Error::UnsupportedPlatform { .. } => ErrorKind::UnsupportedPlatform,
            Error::DownloadTimeout { .. }
            | Error::DownloadHttp { .. }
            | Error::Download(_)
            | Error::Http(_) => ErrorKind::DownloadFailure,
            Error::Extraction(_) => ErrorKind::ExtractionFailure,
            Error::Verification { .. } | Error::Checksum { .. } => ErrorKind::VerificationFailure,
            Error::PortInUse { .. } | Error::NoAvailablePort { .. } => ErrorKind::PortInUse,
            Error::VersionIncompatible(_) => ErrorKind::VersionIncompatible,
            Error::UnsupportedOperation { .. } => ErrorKind::UnsupportedOperation,
            Error::ProcessFailed { .. } | Error::Spawn { .. } | Error::Timeout(_) => {
                ErrorKind::ProcessFailure
            }
            Error::InvalidName { .. }
            | Error::UnknownBackupFormat { .. }
            | Error::ContainerRunning(_)
            | Error::BinaryInUse { .. }
            | Error::Config(_)
            | Error::Yaml(_)
            | Error::InvalidPid { .. } => ErrorKind::InvalidInput,
            Error::Io(_) | Error::Json(_) => ErrorKind::Internal,
        }
    }

    /// True when a start attempt failed because the port was taken.
    ///
    /// Only a bind failure on a specific port qualifies; an exhausted range
    /// cannot be fixed by picking another port.
    pub fn is_port_in_use(&self) -> bool {
        matches!(self, Error::PortInUse { .. })
    }

    /// Returns a helpful suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Error::ContainerNotFound(name) => Some(format!(
                "Check `dbf list` for existing containers, or create it with: dbf create {}",
                name
            )),
            Error::ContainerRunning(name) => Some(format!("Stop it first with: dbf stop {}", name)),
            Error::BinaryNotFound { engine, version } => {
                Some(format!("Install with: dbf install {} {}", engine, version))
            }
            Error::PortInUse { port } => Some(format!(
                "Port {} is already in use. Pass --port to pick another one, or stop the process holding it.",
                port
            )),
            Error::NoAvailablePort { start, end } => Some(format!(
                "Every port between {} and {} is taken. Stop some containers or widen port_ranges in config.yaml.",
                start, end
            )),
            Error::DownloadHttp { status: 404, .. } => Some(
                "The requested version may not exist for this platform. Try a major version such as `16`."
                    .to_string(),
            ),
            Error::DownloadTimeout { .. } | Error::Download(_) => {
                Some("Check your network connection and retry.".to_string())
            }
            Error::Verification { .. } | Error::Checksum { .. } => Some(
                "The downloaded binaries were removed. Retry the install; if it keeps failing, report the version.".to_string(),
            ),
            Error::FilePathInUse { existing, .. } => Some(format!(
                "Delete '{}' first or choose a different file.",
                existing
            )),
            Error::UnknownBackupFormat { hint, .. } => Some(hint.clone()),
            Error::Config(_) | Error::Yaml(_) => {
                Some("Check config.yaml in your dbfleet home directory.".to_string())
            }
            _ => None,
        }
    }

    /// Formats the error with its suggestion (if any) for user-friendly display.
    pub fn with_suggestion(&self) -> String {
        match self.suggestion() {
            Some(suggestion) => format!("{}\n\nHint: {}", self, suggestion),
            None => self.to_string(),
        }
    }
}

/// Validates and converts a u32 PID to nix::unistd::Pid safely.
/// Returns Err for PID 0 (process group), PID 1 (init), or values > i32::MAX.
pub fn validate_pid(pid: u32, owner: &str) -> Result<nix::unistd::Pid> {
    if pid == 0 {
        return Err(Error::InvalidPid {
            pid,
            reason: format!(
                "PID 0 is invalid for '{}' (refers to process group, not a process)",
                owner
            ),
        });
    }
    if pid == 1 {
        return Err(Error::InvalidPid {
            pid,
            reason: format!("refusing to operate on PID 1 (init) for '{}'", owner),
        });
    }
    if pid > i32::MAX as u32 {
        return Err(Error::InvalidPid {
            pid,
            reason: format!(
                "PID {} exceeds i32::MAX for '{}', cannot convert safely",
                pid, owner
            ),
        });
    }
    Ok(nix::unistd::Pid::from_raw(pid as i32))
}

/// Same as validate_pid but allows PID 1 for read-only existence checks.
pub fn validate_pid_for_check(pid: u32) -> Option<nix::unistd::Pid> {
    if pid == 0 || pid > i32::MAX as u32 {
        return None;
    }
    Some(nix::unistd::Pid::from_raw(pid as i32))
}
