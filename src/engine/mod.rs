//! The engine contract and its implementations.
//!
//! Every database technology plugs in through the [`Engine`] trait, so the
//! orchestrator, CLI and container manager never branch on engine identity.
//! Two reference adapters ship with the crate:
//!
//! - [`PostgresEngine`]: a TCP server with a data directory, readiness probe
//!   and graceful shutdown.
//! - [`SqliteEngine`]: an embedded file. Port 0, `start`/`stop` are no-ops and
//!   the container is identified by its file path.
//!
//! # Example
//!
//! ```ignore
//! use dbfleet::engine::{EngineSet, EngineKind};
//!
//! let engines = EngineSet::new(&ctx)?;
//! let pg = engines.get(EngineKind::Postgresql)?;
//! let url = pg.connection_string(&config, None);
//! ```

mod postgres;
mod sqlite;

pub use postgres::*;
pub use sqlite::*;

use crate::backup::{
    BackupFormat, BackupOptions, BackupResult, DumpOptions, DumpResult, RestoreOptions,
    RestoreResult,
};
use crate::binary::{BinaryManager, InstalledBinary};
use crate::config::Context;
use crate::container::ContainerConfig;
use crate::error::{Error, Result};
use crate::platform::Platform;
use crate::process::CommandOutput;
use crate::progress::Progress;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use url::Url;

/// Tag selecting an engine implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Postgresql,
    Sqlite,
}

impl EngineKind {
    pub fn all() -> &'static [EngineKind] {
        &[EngineKind::Postgresql, EngineKind::Sqlite]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Postgresql => "postgresql",
            EngineKind::Sqlite => "sqlite",
        }
    }

    /// Embedded engines are identified by a file, not a process.
    pub fn is_file_based(&self) -> bool {
        matches!(self, EngineKind::Sqlite)
    }

    /// Preferred port; 0 when the engine has none.
    pub fn default_port(&self) -> u16 {
        match self {
            EngineKind::Postgresql => 5432,
            EngineKind::Sqlite => 0,
        }
    }

    /// Extension of the database file for file-based engines.
    pub fn file_extension(&self) -> Option<&'static str> {
        match self {
            EngineKind::Postgresql => None,
            EngineKind::Sqlite => Some("sqlite"),
        }
    }

    /// Version alias used when the caller does not pick one.
    pub fn default_version(&self) -> &'static str {
        match self {
            EngineKind::Postgresql => "17",
            EngineKind::Sqlite => "3",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" | "pg" => Ok(EngineKind::Postgresql),
            "sqlite" | "sqlite3" => Ok(EngineKind::Sqlite),
            other => Err(Error::Config(format!(
                "Unknown engine '{}' (expected one of: postgresql, sqlite)",
                other
            ))),
        }
    }
}

/// Options for preparing on-disk state before the first start.
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Port recorded in the engine's own configuration, if it has one.
    pub port: u16,
    /// Primary database name, or the database file path for file engines.
    pub database: String,
}

/// What a successful `start` reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartOutcome {
    pub port: u16,
    pub connection_string: String,
    /// Server PID when the engine runs a process.
    pub pid: Option<u32>,
}

/// Best-effort liveness. Unreachability is data, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub running: bool,
    pub message: String,
}

impl StatusReport {
    pub fn running(message: impl Into<String>) -> Self {
        Self {
            running: true,
            message: message.into(),
        }
    }

    pub fn stopped(message: impl Into<String>) -> Self {
        Self {
            running: false,
            message: message.into(),
        }
    }
}

/// SQL handed to [`Engine::run_script`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptSource {
    File(PathBuf),
    Inline(String),
}

/// Capability set every engine implements.
///
/// Implementations receive a copy of the container record and must never
/// persist it; state changes go back through the container manager.
#[async_trait]
pub trait Engine: Send + Sync + fmt::Debug {
    fn kind(&self) -> EngineKind;

    /// Acquisition pipeline configured with this engine's hooks.
    fn binaries(&self) -> &BinaryManager;

    /// Archive URL for `version` on `platform`. Deterministic.
    fn resolve_binary_url(&self, version: &str, platform: &Platform) -> Result<Url> {
        self.binaries().resolve_url_for(version, platform)
    }

    fn is_binary_installed(&self, version: &str) -> bool {
        self.binaries().is_installed(version)
    }

    /// Install binaries for `version` if missing. Idempotent.
    async fn ensure_binaries(&self, version: &str, progress: &Progress) -> Result<InstalledBinary> {
        self.binaries().ensure_installed(version, progress).await
    }

    /// Create the state needed before first start. Never overwrites another
    /// container's state.
    async fn init_data_dir(
        &self,
        name: &str,
        binary: &InstalledBinary,
        options: &InitOptions,
    ) -> Result<PathBuf>;

    /// Start and wait until ready. Starting a running container is a no-op.
    async fn start(&self, config: &ContainerConfig, progress: &Progress) -> Result<StartOutcome>;

    /// Graceful, then forceful. Stopping a stopped container is a no-op.
    async fn stop(&self, config: &ContainerConfig) -> Result<()>;

    async fn status(&self, config: &ContainerConfig) -> StatusReport;

    async fn create_database(&self, config: &ContainerConfig, database: &str) -> Result<()>;

    async fn drop_database(&self, config: &ContainerConfig, database: &str) -> Result<()>;

    /// Databases as the engine itself sees them.
    async fn list_databases(&self, config: &ContainerConfig) -> Result<Vec<String>>;

    async fn backup(
        &self,
        config: &ContainerConfig,
        output: &Path,
        options: &BackupOptions,
    ) -> Result<BackupResult>;

    /// Restore `backup`, already classified as `format`.
    async fn restore(
        &self,
        config: &ContainerConfig,
        backup: &Path,
        format: &BackupFormat,
        options: &RestoreOptions,
    ) -> Result<RestoreResult>;

    fn connection_string(&self, config: &ContainerConfig, database: Option<&str>) -> String;

    /// Pull a backup from a remote instance of the same engine family.
    async fn dump_from_connection_string(
        &self,
        uri: &str,
        output: &Path,
        options: &DumpOptions,
    ) -> Result<DumpResult>;

    async fn run_script(
        &self,
        config: &ContainerConfig,
        script: &ScriptSource,
        database: Option<&str>,
    ) -> Result<CommandOutput>;
}

/// Engines by kind.
#[derive(Debug, Clone, Default)]
pub struct EngineSet {
    engines: HashMap<EngineKind, Arc<dyn Engine>>,
}

impl EngineSet {
    /// The built-in engines for the host platform.
    pub fn new(ctx: &Context) -> Result<Self> {
        let platform = Platform::current()?;
        Ok(Self::from_engines([
            Arc::new(PostgresEngine::new(ctx.clone(), platform)) as Arc<dyn Engine>,
            Arc::new(SqliteEngine::new(ctx.clone(), platform)) as Arc<dyn Engine>,
        ]))
    }

    pub fn from_engines(engines: impl IntoIterator<Item = Arc<dyn Engine>>) -> Self {
        Self {
            engines: engines.into_iter().map(|e| (e.kind(), e)).collect(),
        }
    }

    pub fn get(&self, kind: EngineKind) -> Result<Arc<dyn Engine>> {
        self.engines
            .get(&kind)
            .cloned()
            .ok_or_else(|| Error::UnsupportedOperation {
                engine: kind.to_string(),
                operation: "this build".to_string(),
            })
    }

    pub fn kinds(&self) -> Vec<EngineKind> {
        let mut kinds: Vec<_> = self.engines.keys().copied().collect();
        kinds.sort();
        kinds
    }
}
