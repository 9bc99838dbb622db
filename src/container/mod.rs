//! Persisted container records.
//!
//! Each container is one JSON file at
//! `containers/<engine>/<name>/container.json`. [`ContainerManager`] is the only
//! writer: engines get a copy of the record and hand changes back through
//! [`ContainerManager::update_config`]. Every read-modify-write cycle runs under
//! an exclusive lock on `locks/containers.lock`, and every write is
//! temp-then-rename, so a crash never leaves a half-written record.

use crate::config::Context;
use crate::engine::{Engine, EngineKind};
use crate::error::{Error, Result};
use crate::fsutil::{self, FileLock};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

const RECORD_FILE: &str = "container.json";
const LOCK_FILE: &str = "containers.lock";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Created,
    Running,
    Stopped,
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerStatus::Created => write!(f, "created"),
            ContainerStatus::Running => write!(f, "running"),
            ContainerStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// A named database instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerConfig {
    pub name: String,
    pub engine: EngineKind,
    /// Resolved full version.
    pub version: String,
    /// 0 for engines without a network port.
    pub port: u16,
    /// Primary database name, or the database file path for file-based engines.
    pub database: String,
    /// Secondary databases we know about. Informational until synced.
    #[serde(default)]
    pub databases: Vec<String>,
    pub status: ContainerStatus,
    /// Install root of the binaries pinned at creation.
    pub binary_path: PathBuf,
    pub created: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone_source: Option<String>,
}

impl ContainerConfig {
    pub fn is_running(&self) -> bool {
        self.status == ContainerStatus::Running
    }

    /// Path of an executable from the pinned install.
    pub fn executable(&self, base: &str) -> PathBuf {
        let name = if cfg!(windows) {
            format!("{}.exe", base)
        } else {
            base.to_string()
        };
        self.binary_path.join("bin").join(name)
    }
}

/// Fields supplied when creating a container.
#[derive(Debug, Clone)]
pub struct NewContainer {
    pub engine: EngineKind,
    pub version: String,
    pub port: u16,
    pub database: String,
    pub binary_path: PathBuf,
}

/// Partial update merged into an existing record. `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerUpdate {
    pub version: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub databases: Option<Vec<String>>,
    pub status: Option<ContainerStatus>,
    pub binary_path: Option<PathBuf>,
}

impl ContainerUpdate {
    pub fn status(status: ContainerStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn port(port: u16) -> Self {
        Self {
            port: Some(port),
            ..Self::default()
        }
    }

    fn apply(self, config: &mut ContainerConfig) {
        if let Some(v) = self.version {
            config.version = v;
        }
        if let Some(p) = self.port {
            config.port = p;
        }
        if let Some(d) = self.database {
            config.database = d;
        }
        if let Some(list) = self.databases {
            config.databases = list;
        }
        if let Some(s) = self.status {
            config.status = s;
        }
        if let Some(b) = self.binary_path {
            config.binary_path = b;
        }
    }
}

fn name_regex() -> &'static Regex {
    static NAME_RE: OnceLock<Regex> = OnceLock::new();
    NAME_RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z][A-Za-z0-9_-]*$").expect("static regex pattern is valid")
    })
}

/// Reject names that are not `[A-Za-z][A-Za-z0-9_-]*`.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidName {
            name: name.to_string(),
            reason: "name is empty".to_string(),
        });
    }
    if !name_regex().is_match(name) {
        return Err(Error::InvalidName {
            name: name.to_string(),
            reason: "must start with a letter and contain only letters, digits, '-' or '_'"
                .to_string(),
        });
    }
    Ok(())
}

/// Sole writer of container records.
#[derive(Debug, Clone)]
pub struct ContainerManager {
    ctx: Context,
}

impl ContainerManager {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Directory holding a container's record and engine state.
    pub fn container_dir(&self, engine: EngineKind, name: &str) -> PathBuf {
        self.ctx.container_dir(engine.as_str(), name)
    }

    fn record_path(&self, engine: EngineKind, name: &str) -> PathBuf {
        self.container_dir(engine, name).join(RECORD_FILE)
    }

    fn lock(&self) -> Result<FileLock> {
        FileLock::acquire(&self.ctx.locks_dir().join(LOCK_FILE))
    }

    fn read_record(path: &Path) -> Result<ContainerConfig> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn write_record(&self, config: &ContainerConfig) -> Result<()> {
        let json = serde_json::to_vec_pretty(config)?;
        fsutil::atomic_write(&self.record_path(config.engine, &config.name), &json)
    }

    pub fn exists(&self, name: &str, engine: EngineKind) -> bool {
        self.record_path(engine, name).is_file()
    }

    /// Persist a new record with status `created`.
    pub fn create(&self, name: &str, new: NewContainer) -> Result<ContainerConfig> {
        validate_name(name)?;
        let _lock = self.lock()?;
        if self.exists(name, new.engine) {
            return Err(Error::AlreadyExists {
                engine: new.engine.to_string(),
                name: name.to_string(),
            });
        }
        let config = ContainerConfig {
            name: name.to_string(),
            engine: new.engine,
            version: new.version,
            port: new.port,
            database: new.database,
            databases: Vec::new(),
            status: ContainerStatus::Created,
            binary_path: new.binary_path,
            created: Utc::now(),
            clone_source: None,
        };
        self.write_record(&config)?;
        tracing::info!("Created {} container '{}'", config.engine, name);
        Ok(config)
    }

    /// Look up a container. With `engine = None` every engine is searched; a
    /// name present under more than one engine is ambiguous.
    pub fn get_config(&self, name: &str, engine: Option<EngineKind>) -> Result<Option<ContainerConfig>> {
        if let Some(engine) = engine {
            let path = self.record_path(engine, name);
            if !path.is_file() {
                return Ok(None);
            }
            return Self::read_record(&path).map(Some);
        }

        let mut found: Vec<ContainerConfig> = Vec::new();
        for kind in EngineKind::all() {
            if let Some(config) = self.get_config(name, Some(*kind))? {
                found.push(config);
            }
        }
        match found.len() {
            0 => Ok(None),
            1 => Ok(found.pop()),
            _ => Err(Error::InvalidName {
                name: name.to_string(),
                reason: format!(
                    "exists for several engines ({}); specify --engine",
                    found
                        .iter()
                        .map(|c| c.engine.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            }),
        }
    }

    /// Like [`get_config`](Self::get_config) but missing is an error.
    pub fn require(&self, name: &str, engine: Option<EngineKind>) -> Result<ContainerConfig> {
        self.get_config(name, engine)?
            .ok_or_else(|| Error::ContainerNotFound(name.to_string()))
    }

    /// All containers sorted by engine, then name. Unreadable records are
    /// skipped with a warning.
    pub fn list(&self) -> Result<Vec<ContainerConfig>> {
        let mut all = Vec::new();
        for kind in EngineKind::all() {
            all.extend(self.list_by_engine(*kind)?);
        }
        Ok(all)
    }

    pub fn list_by_engine(&self, engine: EngineKind) -> Result<Vec<ContainerConfig>> {
        let dir = self.ctx.engine_containers_dir(engine.as_str());
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut configs = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path().join(RECORD_FILE);
            if !path.is_file() {
                continue;
            }
            match Self::read_record(&path) {
                Ok(config) => configs.push(config),
                Err(e) => tracing::warn!("Skipping unreadable record {:?}: {}", path, e),
            }
        }
        configs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(configs)
    }

    /// Merge `update` into the stored record and return the result.
    pub fn update_config(
        &self,
        name: &str,
        engine: EngineKind,
        update: ContainerUpdate,
    ) -> Result<ContainerConfig> {
        let _lock = self.lock()?;
        let mut config = self
            .get_config(name, Some(engine))?
            .ok_or_else(|| Error::ContainerNotFound(name.to_string()))?;
        update.apply(&mut config);
        self.write_record(&config)?;
        Ok(config)
    }

    /// Rename a stopped container, moving its directory.
    pub fn rename(&self, old: &str, new: &str, engine: EngineKind) -> Result<ContainerConfig> {
        validate_name(new)?;
        let _lock = self.lock()?;
        let mut config = self
            .get_config(old, Some(engine))?
            .ok_or_else(|| Error::ContainerNotFound(old.to_string()))?;
        if config.is_running() {
            return Err(Error::ContainerRunning(old.to_string()));
        }
        if self.exists(new, engine) {
            return Err(Error::AlreadyExists {
                engine: engine.to_string(),
                name: new.to_string(),
            });
        }

        fsutil::move_path(&self.container_dir(engine, old), &self.container_dir(engine, new))?;
        config.name = new.to_string();
        self.write_record(&config)?;
        tracing::info!("Renamed {} container '{}' to '{}'", engine, old, new);
        Ok(config)
    }

    /// Delete the record and everything in the container directory.
    pub fn remove(&self, name: &str, engine: EngineKind) -> Result<()> {
        let _lock = self.lock()?;
        let dir = self.container_dir(engine, name);
        if !dir.join(RECORD_FILE).is_file() {
            return Err(Error::ContainerNotFound(name.to_string()));
        }
        fsutil::remove_path(&dir)?;
        tracing::info!("Removed {} container '{}'", engine, name);
        Ok(())
    }

    /// Copy a stopped container's directory under a new name.
    ///
    /// The copy starts out `created` and remembers its source. `database`
    /// overrides the primary database (file-based engines point the clone at
    /// their copied file).
    pub fn clone_container(
        &self,
        source: &str,
        target: &str,
        engine: EngineKind,
        database: Option<String>,
    ) -> Result<ContainerConfig> {
        validate_name(target)?;
        let _lock = self.lock()?;
        let original = self
            .get_config(source, Some(engine))?
            .ok_or_else(|| Error::ContainerNotFound(source.to_string()))?;
        if original.is_running() {
            return Err(Error::ContainerRunning(source.to_string()));
        }
        if self.exists(target, engine) {
            return Err(Error::AlreadyExists {
                engine: engine.to_string(),
                name: target.to_string(),
            });
        }

        let target_dir = self.container_dir(engine, target);
        if let Err(e) = fsutil::copy_dir_recursive(&self.container_dir(engine, source), &target_dir)
        {
            let _ = fsutil::remove_path(&target_dir);
            return Err(e);
        }

        let mut config = original.clone();
        config.name = target.to_string();
        config.status = ContainerStatus::Created;
        config.created = Utc::now();
        config.clone_source = Some(source.to_string());
        if let Some(db) = database {
            config.database = db;
        }
        self.write_record(&config)?;
        Ok(config)
    }

    /// Track a secondary database. Does not touch the server.
    pub fn add_database(&self, name: &str, engine: EngineKind, database: &str) -> Result<ContainerConfig> {
        let _lock = self.lock()?;
        let mut config = self.require(name, Some(engine))?;
        if config.database != database && !config.databases.iter().any(|d| d == database) {
            config.databases.push(database.to_string());
            self.write_record(&config)?;
        }
        Ok(config)
    }

    /// Stop tracking a secondary database. Does not touch the server.
    pub fn remove_database(
        &self,
        name: &str,
        engine: EngineKind,
        database: &str,
    ) -> Result<ContainerConfig> {
        let _lock = self.lock()?;
        let mut config = self.require(name, Some(engine))?;
        let before = config.databases.len();
        config.databases.retain(|d| d != database);
        if config.databases.len() != before {
            self.write_record(&config)?;
        }
        Ok(config)
    }

    /// Replace the tracking list with what the engine reports.
    ///
    /// Best-effort: if the engine cannot be queried the stored list is kept
    /// and the failure is only logged.
    pub async fn sync_databases(
        &self,
        name: &str,
        engine: &dyn Engine,
    ) -> Result<ContainerConfig> {
        let config = self.require(name, Some(engine.kind()))?;
        let listed = match engine.list_databases(&config).await {
            Ok(listed) => listed,
            Err(e) => {
                tracing::warn!("Could not list databases of '{}': {}", name, e);
                return Ok(config);
            }
        };
        let secondary: Vec<String> = listed
            .into_iter()
            .filter(|d| *d != config.database && !is_system_database(d))
            .collect();
        self.update_config(
            name,
            engine.kind(),
            ContainerUpdate {
                databases: Some(secondary),
                ..ContainerUpdate::default()
            },
        )
    }

    /// Ports held by containers recorded as running.
    pub fn running_ports(&self) -> Result<HashSet<u16>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|c| c.is_running() && c.port != 0)
            .map(|c| c.port)
            .collect())
    }

    /// Downgrade a `running` record to `stopped` when the engine says it is not.
    pub fn mark_stopped_if_dead(
        &self,
        config: &ContainerConfig,
        alive: bool,
    ) -> Result<ContainerConfig> {
        if alive || !config.is_running() {
            return Ok(config.clone());
        }
        tracing::info!(
            "Container '{}' is recorded as running but is not alive; marking stopped",
            config.name
        );
        self.update_config(
            &config.name,
            config.engine,
            ContainerUpdate::status(ContainerStatus::Stopped),
        )
    }
}

fn is_system_database(name: &str) -> bool {
    matches!(name, "postgres" | "template0" | "template1")
}
