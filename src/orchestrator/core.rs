use super::builder::OrchestratorBuilder;
use super::retry::{StartRetry, StartRetryOutcome};
use crate::backup::{
    self, BackupFormat, BackupOptions, BackupResult, DumpOptions, DumpResult, RestoreOptions,
    RestoreResult,
};
use crate::binary::InstalledBinary;
use crate::config::Context;
use crate::container::{
    validate_name, ContainerConfig, ContainerManager, ContainerStatus, ContainerUpdate,
    NewContainer,
};
use crate::engine::{Engine, EngineKind, EngineSet, InitOptions, ScriptSource, StatusReport};
use crate::error::{Error, Result};
use crate::fsutil;
use crate::port::PortAllocator;
use crate::process::CommandOutput;
use crate::progress::{Progress, Stage};
use crate::registry::{absolute_path, FileRegistry, RegistryEntry};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Journal files SQLite keeps next to a database.
const SIDECAR_SUFFIXES: &[&str] = &["-wal", "-shm", "-journal"];

/// What to create. Unset fields fall back to engine defaults.
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub engine: EngineKind,
    pub version: Option<String>,
    /// Preferred port; the engine default when unset.
    pub port: Option<u16>,
    /// Primary database name, or the database file path for file-based engines.
    pub database: Option<String>,
}

impl CreateRequest {
    pub fn new(engine: EngineKind) -> Self {
        Self {
            engine,
            version: None,
            port: None,
            database: None,
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOutcome {
    pub config: ContainerConfig,
    /// False when the preferred port was taken and another was allocated.
    pub port_is_default: bool,
    pub binary: InstalledBinary,
}

/// A record reconciled against what the engine reports.
#[derive(Debug, Clone, Serialize)]
pub struct ContainerState {
    pub config: ContainerConfig,
    pub status: StatusReport,
}

/// Entry point for every container operation.
///
/// The orchestrator owns no state of its own. Records live in the
/// [`ContainerManager`], file bindings in the [`FileRegistry`], and each
/// engine only sees a copy of the record it is asked to act on.
///
/// # Example
///
/// ```no_run
/// use dbfleet::{CreateRequest, EngineKind, Orchestrator, Progress};
///
/// # async fn example() -> dbfleet::Result<()> {
/// let orchestrator = Orchestrator::builder().build()?;
/// let progress = Progress::none();
/// orchestrator
///     .create("devpg", CreateRequest::new(EngineKind::Postgresql).version("16"), &progress)
///     .await?;
/// let started = orchestrator.start("devpg", None, &progress).await?;
/// println!("{}", started.outcome.connection_string);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Orchestrator {
    ctx: Context,
    containers: ContainerManager,
    registry: FileRegistry,
    allocator: PortAllocator,
    engines: EngineSet,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Orchestrator with the built-in engines rooted at `ctx`.
    pub fn new(ctx: Context) -> Result<Self> {
        let engines = EngineSet::new(&ctx)?;
        Self::from_parts(ctx, engines, PortAllocator::new())
    }

    pub fn from_parts(ctx: Context, engines: EngineSet, allocator: PortAllocator) -> Result<Self> {
        ctx.ensure_dirs()?;
        Ok(Self {
            containers: ContainerManager::new(ctx.clone()),
            registry: FileRegistry::new(&ctx),
            ctx,
            allocator,
            engines,
        })
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn containers(&self) -> &ContainerManager {
        &self.containers
    }

    pub fn registry(&self) -> &FileRegistry {
        &self.registry
    }

    pub fn allocator(&self) -> &PortAllocator {
        &self.allocator
    }

    pub fn engine(&self, kind: EngineKind) -> Result<Arc<dyn Engine>> {
        self.engines.get(kind)
    }

    fn lookup(
        &self,
        name: &str,
        engine: Option<EngineKind>,
    ) -> Result<(ContainerConfig, Arc<dyn Engine>)> {
        let config = self.containers.require(name, engine)?;
        let engine = self.engines.get(config.engine)?;
        Ok((config, engine))
    }

    /// Refresh a record from the engine's view of liveness.
    async fn reconcile(&self, config: ContainerConfig, engine: &dyn Engine) -> Result<ContainerState> {
        let status = engine.status(&config).await;
        let config = self.containers.mark_stopped_if_dead(&config, status.running)?;
        Ok(ContainerState { config, status })
    }

    /// File-based containers have no process, so "stopping" one only clears
    /// the recorded status. Server records are returned unchanged.
    fn quiesce(&self, config: ContainerConfig) -> Result<ContainerConfig> {
        if config.engine.is_file_based() && config.is_running() {
            return self.containers.update_config(
                &config.name,
                config.engine,
                ContainerUpdate::status(ContainerStatus::Stopped),
            );
        }
        Ok(config)
    }

    /// Create a container: binaries, port, on-disk state, then the record.
    ///
    /// A failure after the record is written removes the record again (and
    /// the registry entry for file-based engines).
    #[tracing::instrument(skip(self, request, progress), fields(engine = %request.engine))]
    pub async fn create(
        &self,
        name: &str,
        request: CreateRequest,
        progress: &Progress,
    ) -> Result<CreateOutcome> {
        validate_name(name)?;
        let kind = request.engine;
        let engine = self.engines.get(kind)?;
        if self.containers.exists(name, kind) {
            return Err(Error::AlreadyExists {
                engine: kind.to_string(),
                name: name.to_string(),
            });
        }

        let version = request
            .version
            .unwrap_or_else(|| kind.default_version().to_string());
        let binary = engine.ensure_binaries(&version, progress).await?;

        let (port, port_is_default) = if kind.is_file_based() {
            (0, true)
        } else {
            let preferred = request.port.unwrap_or_else(|| kind.default_port());
            let range = self.ctx.settings().port_range(kind.as_str(), preferred);
            let allocation =
                self.allocator
                    .find_available_excluding_managed(preferred, range, &self.containers)?;
            if !allocation.is_default {
                tracing::info!(
                    "Port {} is taken, '{}' will use {}",
                    preferred,
                    name,
                    allocation.port
                );
            }
            (allocation.port, allocation.is_default)
        };

        let database = if kind.is_file_based() {
            let path = self.database_file_for(name, kind, request.database.as_deref())?;
            if let Some(existing) = self.registry.find_by_path(&path)? {
                return Err(Error::FilePathInUse {
                    path,
                    existing: existing.name,
                });
            }
            path.to_string_lossy().into_owned()
        } else {
            request.database.unwrap_or_else(|| name.to_string())
        };

        let config = self.containers.create(
            name,
            NewContainer {
                engine: kind,
                version: binary.version.clone(),
                port,
                database,
                binary_path: binary.path.clone(),
            },
        )?;

        if kind.is_file_based() {
            if let Err(e) = self.registry.register(name, Path::new(&config.database)) {
                self.rollback_create(&config);
                return Err(e);
            }
        }

        progress.report(Stage::Initializing, format!("Initializing {}", name));
        let init = InitOptions {
            port,
            database: config.database.clone(),
        };
        if let Err(e) = engine.init_data_dir(name, &binary, &init).await {
            self.rollback_create(&config);
            return Err(e);
        }

        Ok(CreateOutcome {
            config,
            port_is_default,
            binary,
        })
    }

    /// Absolute database file for a new file-based container. The default
    /// lives inside the container directory.
    fn database_file_for(
        &self,
        name: &str,
        kind: EngineKind,
        requested: Option<&str>,
    ) -> Result<PathBuf> {
        let path = match requested {
            Some(p) => PathBuf::from(p),
            None => self.containers.container_dir(kind, name).join(format!(
                "{}.{}",
                name,
                kind.file_extension().unwrap_or("db")
            )),
        };
        // Create the parent so the absolute form is stable before and after.
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        absolute_path(&path)
    }

    fn rollback_create(&self, config: &ContainerConfig) {
        if config.engine.is_file_based() {
            if let Err(e) = self.registry.remove(&config.name) {
                tracing::warn!("Failed to deregister '{}': {}", config.name, e);
            }
        }
        if let Err(e) = self.containers.remove(&config.name, config.engine) {
            tracing::warn!("Failed to remove partial container '{}': {}", config.name, e);
        }
    }

    /// Start a container, moving to a fresh port if its own is taken.
    pub async fn start(
        &self,
        name: &str,
        engine: Option<EngineKind>,
        progress: &Progress,
    ) -> Result<StartRetryOutcome> {
        let (config, engine) = self.lookup(name, engine)?;
        self.start_with(config, engine.as_ref(), progress).await
    }

    async fn start_with(
        &self,
        config: ContainerConfig,
        engine: &dyn Engine,
        progress: &Progress,
    ) -> Result<StartRetryOutcome> {
        let mut started = StartRetry::new(engine, &self.containers, &self.allocator)
            .run(config, progress)
            .await?;
        started.config = self.containers.update_config(
            &started.config.name,
            started.config.engine,
            ContainerUpdate {
                status: Some(ContainerStatus::Running),
                port: Some(started.outcome.port),
                ..ContainerUpdate::default()
            },
        )?;
        if engine.kind().is_file_based() {
            if let Err(e) = self.registry.touch_verified(&started.config.name) {
                tracing::debug!("Could not refresh registry entry: {}", e);
            }
        }
        Ok(started)
    }

    /// Stop a container. Stopping a stopped container is a no-op.
    pub async fn stop(&self, name: &str, engine: Option<EngineKind>) -> Result<ContainerConfig> {
        let (config, engine) = self.lookup(name, engine)?;
        engine.stop(&config).await?;
        if config.status == ContainerStatus::Stopped {
            return Ok(config);
        }
        self.containers.update_config(
            name,
            config.engine,
            ContainerUpdate::status(ContainerStatus::Stopped),
        )
    }

    /// Liveness of one container. A record claiming `running` for a dead
    /// server is corrected to `stopped`.
    pub async fn status(&self, name: &str, engine: Option<EngineKind>) -> Result<ContainerState> {
        let (config, engine) = self.lookup(name, engine)?;
        self.reconcile(config, engine.as_ref()).await
    }

    /// Every container, reconciled.
    pub async fn list(&self) -> Result<Vec<ContainerState>> {
        let mut states = Vec::new();
        for config in self.containers.list()? {
            let engine = self.engines.get(config.engine)?;
            states.push(self.reconcile(config, engine.as_ref()).await?);
        }
        Ok(states)
    }

    /// Stop if needed, then remove the record, its directory and any
    /// registry entry. Database files outside the container directory are
    /// left where they are.
    pub async fn delete(&self, name: &str, engine: Option<EngineKind>) -> Result<ContainerConfig> {
        let (config, engine) = self.lookup(name, engine)?;
        let state = self.reconcile(config, engine.as_ref()).await?;
        if state.status.running && !engine.kind().is_file_based() {
            engine.stop(&state.config).await?;
        }
        let kind = state.config.engine;
        if kind.is_file_based() {
            let file = PathBuf::from(&state.config.database);
            let dir = absolute_path(&self.containers.container_dir(kind, name))?;
            if !file.starts_with(&dir) && file.exists() {
                tracing::info!("Keeping database file {:?} of deleted '{}'", file, name);
            }
            self.registry.remove(name)?;
        }
        self.containers.remove(name, kind)?;
        Ok(state.config)
    }

    /// Rename a stopped container.
    pub async fn rename(
        &self,
        old: &str,
        new: &str,
        engine: Option<EngineKind>,
    ) -> Result<ContainerConfig> {
        let (config, engine) = self.lookup(old, engine)?;
        let state = self.reconcile(config, engine.as_ref()).await?;
        let config = self.quiesce(state.config)?;
        let kind = config.engine;

        let old_dir = absolute_path(&self.containers.container_dir(kind, old))?;
        let renamed = self.containers.rename(old, new, kind)?;
        if !kind.is_file_based() {
            return Ok(renamed);
        }

        match self.rename_file_binding(&renamed, old, &old_dir) {
            Ok(config) => Ok(config),
            Err(e) => {
                if let Err(undo) = self.containers.rename(new, old, kind) {
                    tracing::warn!("Failed to undo rename of '{}': {}", old, undo);
                }
                Err(e)
            }
        }
    }

    /// Carry the registry entry over to the new name, and repoint the
    /// database path when the file moved along with the directory.
    fn rename_file_binding(
        &self,
        renamed: &ContainerConfig,
        old: &str,
        old_dir: &Path,
    ) -> Result<ContainerConfig> {
        let kind = renamed.engine;
        match self.registry.rename(old, &renamed.name) {
            Ok(_) => {}
            Err(Error::RegistryEntryNotFound(_)) => {
                self.registry
                    .register(&renamed.name, Path::new(&renamed.database))?;
            }
            Err(e) => return Err(e),
        }

        let file = PathBuf::from(&renamed.database);
        let Ok(relative) = file.strip_prefix(old_dir) else {
            return Ok(renamed.clone());
        };
        let new_dir = absolute_path(&self.containers.container_dir(kind, &renamed.name))?;
        let moved = new_dir.join(relative);
        self.registry.update_path(&renamed.name, &moved)?;
        self.containers.update_config(
            &renamed.name,
            kind,
            ContainerUpdate {
                database: Some(moved.to_string_lossy().into_owned()),
                ..ContainerUpdate::default()
            },
        )
    }

    /// Move a file-based container's database. `destination` may be a
    /// directory, in which case the file name is kept.
    pub fn relocate(&self, name: &str, destination: &Path) -> Result<ContainerConfig> {
        self.relocate_with(name, destination, |from, to| fs::rename(from, to))
    }

    /// [`relocate`](Self::relocate) with a custom rename primitive. A rename
    /// that fails with `EXDEV` falls back to copy-then-remove.
    pub fn relocate_with<F>(&self, name: &str, destination: &Path, rename: F) -> Result<ContainerConfig>
    where
        F: Fn(&Path, &Path) -> io::Result<()>,
    {
        let config = self.containers.require(name, None)?;
        let kind = config.engine;
        if !kind.is_file_based() {
            return Err(Error::UnsupportedOperation {
                engine: kind.to_string(),
                operation: "relocate".to_string(),
            });
        }

        let source = PathBuf::from(&config.database);
        if !source.is_file() {
            return Err(Error::DatabaseNotFound {
                container: name.to_string(),
                database: config.database.clone(),
            });
        }

        let mut target = destination.to_path_buf();
        if target.is_dir() {
            if let Some(file_name) = source.file_name() {
                target = target.join(file_name);
            }
        }
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let target = absolute_path(&target)?;
        if target == source {
            return Ok(config);
        }
        if target.exists() {
            return Err(Error::DataDirExists {
                name: name.to_string(),
                path: target,
            });
        }
        if let Some(other) = self.registry.find_by_path(&target)? {
            if other.name != name {
                return Err(Error::FilePathInUse {
                    path: target,
                    existing: other.name,
                });
            }
        }

        self.quiesce(config)?;
        fsutil::move_path_with(&source, &target, |from, to| rename(from, to))?;
        for suffix in SIDECAR_SUFFIXES {
            let from = sidecar(&source, suffix);
            if from.exists() {
                let to = sidecar(&target, suffix);
                if let Err(e) = fsutil::move_path_with(&from, &to, |a, b| rename(a, b)) {
                    tracing::warn!("Could not move {:?}: {}", from, e);
                }
            }
        }

        let registered = match self.registry.update_path(name, &target) {
            Err(Error::RegistryEntryNotFound(_)) => self.registry.register(name, &target),
            other => other,
        };
        if let Err(e) = registered {
            if let Err(undo) = fsutil::move_path(&target, &source) {
                tracing::warn!("Failed to move {:?} back: {}", target, undo);
            }
            return Err(e);
        }

        let updated = self.containers.update_config(
            name,
            kind,
            ContainerUpdate {
                database: Some(target.to_string_lossy().into_owned()),
                ..ContainerUpdate::default()
            },
        )?;
        tracing::info!("Relocated '{}' from {:?} to {:?}", name, source, target);
        Ok(updated)
    }

    /// Copy a stopped container under a new name. Server clones get their
    /// own port; file-based clones get their own database file.
    pub async fn clone_container(
        &self,
        source: &str,
        target: &str,
        engine: Option<EngineKind>,
    ) -> Result<ContainerConfig> {
        validate_name(target)?;
        let (config, engine) = self.lookup(source, engine)?;
        let state = self.reconcile(config, engine.as_ref()).await?;
        let original = self.quiesce(state.config)?;
        let kind = original.engine;

        let cloned = self.containers.clone_container(source, target, kind, None)?;
        let result = if kind.is_file_based() {
            self.clone_file(&original, &cloned)
        } else {
            self.clone_port(&original, &cloned)
        };
        result.inspect_err(|_| {
            if let Err(e) = self.containers.remove(target, kind) {
                tracing::warn!("Failed to remove partial clone '{}': {}", target, e);
            }
        })
    }

    fn clone_port(&self, original: &ContainerConfig, cloned: &ContainerConfig) -> Result<ContainerConfig> {
        let kind = cloned.engine;
        let mut excluded = self.containers.running_ports()?;
        excluded.insert(original.port);
        let range = self.ctx.settings().port_range(kind.as_str(), original.port);
        let allocation = self
            .allocator
            .find_available_excluding(original.port, range, &excluded)?;
        self.containers
            .update_config(&cloned.name, kind, ContainerUpdate::port(allocation.port))
    }

    fn clone_file(&self, original: &ContainerConfig, cloned: &ContainerConfig) -> Result<ContainerConfig> {
        let kind = cloned.engine;
        let source_file = PathBuf::from(&original.database);
        let source_dir = absolute_path(&self.containers.container_dir(kind, &original.name))?;

        let target_file = match source_file.strip_prefix(&source_dir) {
            // Already copied along with the container directory.
            Ok(relative) => {
                absolute_path(&self.containers.container_dir(kind, &cloned.name))?.join(relative)
            }
            Err(_) => {
                let extension = source_file
                    .extension()
                    .and_then(|e| e.to_str())
                    .or(kind.file_extension())
                    .unwrap_or("db");
                let copy = source_file.with_file_name(format!("{}.{}", cloned.name, extension));
                if copy.exists() {
                    return Err(Error::DataDirExists {
                        name: cloned.name.clone(),
                        path: copy,
                    });
                }
                fs::copy(&source_file, &copy)?;
                absolute_path(&copy)?
            }
        };

        if let Err(e) = self.registry.register(&cloned.name, &target_file) {
            // The container directory copy goes with the rolled-back clone.
            if source_file.strip_prefix(&source_dir).is_err() {
                let _ = fsutil::remove_path(&target_file);
            }
            return Err(e);
        }
        self.containers.update_config(
            &cloned.name,
            kind,
            ContainerUpdate {
                database: Some(target_file.to_string_lossy().into_owned()),
                ..ContainerUpdate::default()
            },
        )
    }

    pub async fn backup(
        &self,
        name: &str,
        engine: Option<EngineKind>,
        output: &Path,
        options: &BackupOptions,
    ) -> Result<BackupResult> {
        let (config, engine) = self.lookup(name, engine)?;
        engine.backup(&config, output, options).await
    }

    /// Classify a backup artifact without restoring it.
    pub fn detect(&self, path: &Path) -> Result<BackupFormat> {
        backup::detect_format(path)
    }

    /// Detect the format of `source` and hand it to the container's engine.
    pub async fn restore(
        &self,
        name: &str,
        engine: Option<EngineKind>,
        source: &Path,
        options: &RestoreOptions,
    ) -> Result<RestoreResult> {
        let (config, engine) = self.lookup(name, engine)?;
        let format = backup::detect_format(source)?;
        format.require_known()?;
        tracing::info!("Restoring {} backup {:?} into '{}'", format.format, source, name);

        let result = engine.restore(&config, source, &format, options).await?;
        if let Some(database) = options.database.as_deref() {
            if database != config.database {
                if let Err(e) = self.containers.add_database(name, config.engine, database) {
                    tracing::warn!("Could not track database '{}': {}", database, e);
                }
            }
        }
        Ok(result)
    }

    pub fn connection_string(
        &self,
        name: &str,
        engine: Option<EngineKind>,
        database: Option<&str>,
    ) -> Result<String> {
        let (config, engine) = self.lookup(name, engine)?;
        Ok(engine.connection_string(&config, database))
    }

    pub async fn run_script(
        &self,
        name: &str,
        engine: Option<EngineKind>,
        script: &ScriptSource,
        database: Option<&str>,
    ) -> Result<CommandOutput> {
        let (config, engine) = self.lookup(name, engine)?;
        engine.run_script(&config, script, database).await
    }

    /// Pull a backup from a remote server of the given engine family.
    pub async fn dump_remote(
        &self,
        kind: EngineKind,
        uri: &str,
        output: &Path,
        options: &DumpOptions,
    ) -> Result<DumpResult> {
        self.engines
            .get(kind)?
            .dump_from_connection_string(uri, output, options)
            .await
    }

    pub async fn create_database(
        &self,
        name: &str,
        engine: Option<EngineKind>,
        database: &str,
    ) -> Result<ContainerConfig> {
        let (config, engine) = self.lookup(name, engine)?;
        engine.create_database(&config, database).await?;
        self.containers.add_database(name, config.engine, database)
    }

    pub async fn drop_database(
        &self,
        name: &str,
        engine: Option<EngineKind>,
        database: &str,
    ) -> Result<ContainerConfig> {
        let (config, engine) = self.lookup(name, engine)?;
        if database == config.database {
            return Err(Error::UnsupportedOperation {
                engine: config.engine.to_string(),
                operation: "dropping the primary database".to_string(),
            });
        }
        engine.drop_database(&config, database).await?;
        self.containers.remove_database(name, config.engine, database)
    }

    /// Databases as the engine reports them. The tracking list is refreshed
    /// on the way.
    pub async fn list_databases(
        &self,
        name: &str,
        engine: Option<EngineKind>,
    ) -> Result<Vec<String>> {
        let (config, engine) = self.lookup(name, engine)?;
        let listed = engine.list_databases(&config).await?;
        self.containers.sync_databases(name, engine.as_ref()).await?;
        Ok(listed)
    }

    pub async fn install(
        &self,
        kind: EngineKind,
        version: &str,
        progress: &Progress,
    ) -> Result<InstalledBinary> {
        self.engines.get(kind)?.ensure_binaries(version, progress).await
    }

    /// Installed binaries, newest first per engine.
    pub fn installed(&self, kind: Option<EngineKind>) -> Result<Vec<InstalledBinary>> {
        let kinds = match kind {
            Some(kind) => vec![kind],
            None => self.engines.kinds(),
        };
        let mut all = Vec::new();
        for kind in kinds {
            all.extend(self.engines.get(kind)?.binaries().list_installed()?);
        }
        Ok(all)
    }

    /// Remove an installed version unless a container is pinned to it.
    pub fn uninstall(&self, kind: EngineKind, version: &str) -> Result<bool> {
        let engine = self.engines.get(kind)?;
        let binaries = engine.binaries();
        let full = binaries.normalize_version(version);
        let dir = binaries.install_dir(&full);
        let users: Vec<String> = self
            .containers
            .list_by_engine(kind)?
            .into_iter()
            .filter(|c| c.binary_path == dir)
            .map(|c| c.name)
            .collect();
        if !users.is_empty() {
            return Err(Error::BinaryInUse {
                engine: kind.to_string(),
                version: full,
                containers: users.join(", "),
            });
        }
        binaries.uninstall(&full)
    }

    /// Registry entries whose database file is gone.
    pub fn orphans(&self) -> Result<Vec<RegistryEntry>> {
        self.registry.find_orphans()
    }

    /// Drop orphaned registry entries together with their container records.
    pub fn prune_orphans(&self) -> Result<Vec<RegistryEntry>> {
        let removed = self.registry.remove_orphans()?;
        for entry in &removed {
            for kind in EngineKind::all().iter().filter(|k| k.is_file_based()) {
                if self.containers.exists(&entry.name, *kind) {
                    if let Err(e) = self.containers.remove(&entry.name, *kind) {
                        tracing::warn!("Failed to remove record of '{}': {}", entry.name, e);
                    }
                }
            }
        }
        Ok(removed)
    }
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}
