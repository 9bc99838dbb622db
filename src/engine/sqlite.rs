use super::{Engine, EngineKind, InitOptions, ScriptSource, StartOutcome, StatusReport};
use crate::backup::{
    artifact_size, decompress_gzip, detect_format, evaluate_restore, BackupFormat,
    BackupOptions, BackupResult, DumpOptions, DumpResult, FormatKind, OutputFormat,
    RestoreOptions, RestoreResult,
};
use crate::binary::{
    download_to_file, BinaryManager, BinarySource, InstalledBinary, VerifyPolicy, VersionMap,
    VersionPrecision,
};
use crate::config::Context;
use crate::container::ContainerConfig;
use crate::error::{Error, Result};
use crate::platform::Platform;
use crate::process::{CommandOutput, CommandSpec};
use crate::progress::{Progress, Stage};
use async_trait::async_trait;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const SQLITE_HEADER: &[u8] = b"SQLite format 3\0";

/// A write that forces SQLite to materialize the file, leaving no trace.
const MATERIALIZE_SQL: &str =
    "CREATE TABLE IF NOT EXISTS _dbfleet_init (id INTEGER); DROP TABLE _dbfleet_init;";

const DEFAULT_EXTENSION: &str = "sqlite";

const EXECUTABLES: &[&str] = &["sqlite3", "sqldiff", "sqlite3_analyzer", "sqlite3_rsync"];

/// Release metadata for the SQLite command-line tools.
#[derive(Debug)]
pub struct SqliteSource {
    map: VersionMap,
}

impl SqliteSource {
    pub fn new() -> Self {
        Self {
            map: VersionMap::new([("3", "3.51.2")]),
        }
    }
}

impl Default for SqliteSource {
    fn default() -> Self {
        Self::new()
    }
}

impl BinarySource for SqliteSource {
    fn engine(&self) -> &'static str {
        "sqlite"
    }

    fn version_map(&self) -> &VersionMap {
        &self.map
    }

    fn executables(&self) -> &[&'static str] {
        EXECUTABLES
    }

    fn verify_policy(&self) -> VerifyPolicy {
        VerifyPolicy::VersionFlag {
            flag: "--version",
            precision: VersionPrecision::MajorMinor,
        }
    }
}

/// Embedded SQLite databases.
///
/// A container is a database file; secondary databases are sibling files in
/// the same directory with the same extension. There is no server, so the
/// port is always 0 and `start`/`stop` only check the file.
#[derive(Debug)]
pub struct SqliteEngine {
    ctx: Context,
    binaries: BinaryManager,
}

/// True when `path` begins with the SQLite file header.
pub fn is_sqlite_file(path: &Path) -> bool {
    let mut header = [0u8; 16];
    match fs::File::open(path) {
        Ok(mut file) => file.read_exact(&mut header).is_ok() && header == SQLITE_HEADER,
        Err(_) => false,
    }
}

/// Escape a value for a single-quoted SQL string literal.
fn sql_string(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

impl SqliteEngine {
    pub fn new(ctx: Context, platform: Platform) -> Self {
        Self::with_source(ctx, Arc::new(SqliteSource::new()), platform)
    }

    pub fn with_source(ctx: Context, source: Arc<dyn BinarySource>, platform: Platform) -> Self {
        let binaries = BinaryManager::with_platform(ctx.clone(), source, platform);
        Self { ctx, binaries }
    }

    fn command_timeout(&self) -> Duration {
        self.ctx.settings().command_timeout
    }

    fn primary_path(config: &ContainerConfig) -> PathBuf {
        PathBuf::from(&config.database)
    }

    fn extension(config: &ContainerConfig) -> String {
        Self::primary_path(config)
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
    }

    /// Primary database name: the file stem.
    fn primary_name(config: &ContainerConfig) -> String {
        Self::primary_path(config)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| config.name.clone())
    }

    /// File backing `database`, which may be the primary's name or a sibling.
    pub fn database_path(config: &ContainerConfig, database: Option<&str>) -> Result<PathBuf> {
        let primary = Self::primary_path(config);
        let Some(db) = database else {
            return Ok(primary);
        };
        if db == Self::primary_name(config) || Path::new(db) == primary {
            return Ok(primary);
        }
        if db.is_empty() || db.contains(['/', '\\']) || db.starts_with('.') {
            return Err(Error::InvalidName {
                name: db.to_string(),
                reason: "database names cannot contain path separators".to_string(),
            });
        }
        let dir = primary.parent().unwrap_or_else(|| Path::new("."));
        Ok(dir.join(format!("{}.{}", db, Self::extension(config))))
    }

    fn sqlite3(executable: PathBuf, db: &Path) -> CommandSpec {
        CommandSpec::new(executable).arg("-bail").arg(db)
    }

    async fn materialize(&self, executable: PathBuf, db: &Path) -> Result<()> {
        if let Some(parent) = db.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::sqlite3(executable, db)
            .arg(MATERIALIZE_SQL)
            .run_checked(self.command_timeout())
            .await?;
        Ok(())
    }

    async fn client_binaries(&self) -> Result<InstalledBinary> {
        if let Some(newest) = self.binaries.list_installed()?.into_iter().next() {
            return Ok(newest);
        }
        self.binaries
            .ensure_installed(EngineKind::Sqlite.default_version(), &Progress::none())
            .await
    }

    /// Write a SQL or native copy of `db` to `output`.
    async fn export(
        &self,
        executable: PathBuf,
        db: &Path,
        output: &Path,
        format: OutputFormat,
    ) -> Result<FormatKind> {
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }
        match format {
            OutputFormat::Sql => {
                let out = Self::sqlite3(executable, db)
                    .arg(".dump")
                    .run_checked(self.command_timeout())
                    .await?;
                fs::write(output, out.stdout)?;
                Ok(FormatKind::SqlText)
            }
            OutputFormat::Native => {
                if output.exists() {
                    fs::remove_file(output)?;
                }
                Self::sqlite3(executable, db)
                    .arg(format!("VACUUM INTO {}", sql_string(&output.to_string_lossy())))
                    .run_checked(self.command_timeout())
                    .await?;
                Ok(FormatKind::SqliteFile)
            }
        }
    }

    /// Local file for a remote reference, downloading http(s) sources.
    async fn fetch_source(&self, uri: &str, scratch: &Path) -> Result<PathBuf> {
        if uri.starts_with("http://") || uri.starts_with("https://") {
            let dest = scratch.join("remote.sqlite");
            download_to_file(
                &reqwest::Client::new(),
                uri,
                &dest,
                self.ctx.settings().download_timeout,
            )
            .await?;
            return Ok(dest);
        }
        let path = uri
            .strip_prefix("sqlite://")
            .or_else(|| uri.strip_prefix("file:"))
            .unwrap_or(uri);
        let path = PathBuf::from(path);
        if !path.is_file() {
            return Err(Error::BackupNotFound(path));
        }
        Ok(path)
    }
}

fn remove_with_sidecars(path: &Path) -> Result<()> {
    for suffix in ["", "-wal", "-shm", "-journal"] {
        let candidate = PathBuf::from(format!("{}{}", path.display(), suffix));
        if candidate.exists() {
            fs::remove_file(&candidate)?;
        }
    }
    Ok(())
}

#[async_trait]
impl Engine for SqliteEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Sqlite
    }

    fn binaries(&self) -> &BinaryManager {
        &self.binaries
    }

    async fn init_data_dir(
        &self,
        name: &str,
        binary: &InstalledBinary,
        options: &InitOptions,
    ) -> Result<PathBuf> {
        let path = PathBuf::from(&options.database);
        if path.exists() {
            let len = fs::metadata(&path)?.len();
            if len > 0 && !is_sqlite_file(&path) {
                return Err(Error::DataDirExists {
                    name: name.to_string(),
                    path,
                });
            }
            if len > 0 {
                tracing::info!("Adopting existing SQLite file {:?} for '{}'", path, name);
                return Ok(path);
            }
        }
        self.materialize(binary.executable("sqlite3"), &path).await?;
        tracing::info!("Created SQLite database {:?} for '{}'", path, name);
        Ok(path)
    }

    #[tracing::instrument(skip(self, config, progress), fields(container = %config.name))]
    async fn start(&self, config: &ContainerConfig, progress: &Progress) -> Result<StartOutcome> {
        let path = Self::primary_path(config);
        if !path.is_file() {
            return Err(Error::DatabaseNotFound {
                container: config.name.clone(),
                database: path.display().to_string(),
            });
        }
        progress.report(Stage::Ready, format!("'{}' is a file-based database", config.name));
        Ok(StartOutcome {
            port: 0,
            connection_string: self.connection_string(config, None),
            pid: None,
        })
    }

    #[tracing::instrument(skip(self, config), fields(container = %config.name))]
    async fn stop(&self, config: &ContainerConfig) -> Result<()> {
        tracing::debug!("'{}' has no server process to stop", config.name);
        Ok(())
    }

    async fn status(&self, config: &ContainerConfig) -> StatusReport {
        let path = Self::primary_path(config);
        if path.is_file() {
            StatusReport::running(format!("database file {}", path.display()))
        } else {
            StatusReport::stopped(format!("database file {} is missing", path.display()))
        }
    }

    async fn create_database(&self, config: &ContainerConfig, database: &str) -> Result<()> {
        let path = Self::database_path(config, Some(database))?;
        if is_sqlite_file(&path) {
            return Ok(());
        }
        self.materialize(config.executable("sqlite3"), &path).await
    }

    async fn drop_database(&self, config: &ContainerConfig, database: &str) -> Result<()> {
        let path = Self::database_path(config, Some(database))?;
        if path == Self::primary_path(config) {
            return Err(Error::UnsupportedOperation {
                engine: EngineKind::Sqlite.to_string(),
                operation: "dropping the primary database (delete the container instead)"
                    .to_string(),
            });
        }
        remove_with_sidecars(&path)
    }

    async fn list_databases(&self, config: &ContainerConfig) -> Result<Vec<String>> {
        let primary = Self::primary_path(config);
        if !primary.is_file() {
            return Err(Error::DatabaseNotFound {
                container: config.name.clone(),
                database: primary.display().to_string(),
            });
        }
        let extension = Self::extension(config);
        let mut siblings = Vec::new();
        if let Some(dir) = primary.parent() {
            for entry in fs::read_dir(dir)? {
                let path = entry?.path();
                if path == primary
                    || path.extension().and_then(|e| e.to_str()) != Some(extension.as_str())
                    || !is_sqlite_file(&path)
                {
                    continue;
                }
                if let Some(stem) = path.file_stem() {
                    siblings.push(stem.to_string_lossy().into_owned());
                }
            }
        }
        siblings.sort();
        let mut all = vec![Self::primary_name(config)];
        all.extend(siblings);
        Ok(all)
    }

    async fn backup(
        &self,
        config: &ContainerConfig,
        output: &Path,
        options: &BackupOptions,
    ) -> Result<BackupResult> {
        let db = Self::database_path(config, options.database.as_deref())?;
        let format = self
            .export(config.executable("sqlite3"), &db, output, options.format)
            .await?;
        Ok(BackupResult {
            path: output.to_path_buf(),
            format,
            size: artifact_size(output)?,
        })
    }

    async fn restore(
        &self,
        config: &ContainerConfig,
        backup: &Path,
        format: &BackupFormat,
        options: &RestoreOptions,
    ) -> Result<RestoreResult> {
        format.require_known()?;
        let target = Self::database_path(config, options.database.as_deref())?;
        let sqlite3 = config.executable("sqlite3");

        match format.format {
            FormatKind::SqlText => {
                if options.drop {
                    remove_with_sidecars(&target)?;
                }
                if options.create_database || options.drop {
                    self.materialize(sqlite3.clone(), &target).await?;
                }
                let sql = fs::read(backup)?;
                let out = Self::sqlite3(sqlite3, &target)
                    .stdin(sql)
                    .run(self.command_timeout())
                    .await?;
                evaluate_restore("sqlite3", format.format, out)
            }
            FormatKind::SqliteFile => {
                let occupied = fs::metadata(&target).map(|m| m.len() > 0).unwrap_or(false);
                if occupied && !options.drop {
                    return Err(Error::DataDirExists {
                        name: config.name.clone(),
                        path: target,
                    });
                }
                remove_with_sidecars(&target)?;
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(backup, &target)?;
                Ok(RestoreResult {
                    format: format.format,
                    stdout: String::new(),
                    stderr: String::new(),
                    code: 0,
                    warnings: false,
                })
            }
            FormatKind::CompressedSnapshot => {
                let staging = tempfile::tempdir()?;
                let inner = staging.path().join("restore.inner");
                decompress_gzip(backup, &inner)?;
                let inner_format = detect_format(&inner)?;
                if inner_format.format == FormatKind::CompressedSnapshot {
                    return Err(Error::Extraction(format!(
                        "{} is compressed more than once",
                        backup.display()
                    )));
                }
                self.restore(config, &inner, &inner_format, options).await
            }
            other => Err(Error::UnsupportedOperation {
                engine: EngineKind::Sqlite.to_string(),
                operation: format!("restoring {} backups", other),
            }),
        }
    }

    fn connection_string(&self, config: &ContainerConfig, database: Option<&str>) -> String {
        let path = Self::database_path(config, database)
            .unwrap_or_else(|_| Self::primary_path(config));
        format!("sqlite://{}", path.display())
    }

    async fn dump_from_connection_string(
        &self,
        uri: &str,
        output: &Path,
        options: &DumpOptions,
    ) -> Result<DumpResult> {
        let scratch = tempfile::tempdir()?;
        let source = self.fetch_source(uri, scratch.path()).await?;
        if !is_sqlite_file(&source) {
            return Err(Error::Config(format!("{} is not a SQLite database", uri)));
        }
        let tools = self.client_binaries().await?;
        let format = self
            .export(tools.executable("sqlite3"), &source, output, options.format)
            .await?;
        Ok(DumpResult {
            path: output.to_path_buf(),
            format,
            size: artifact_size(output)?,
        })
    }

    async fn run_script(
        &self,
        config: &ContainerConfig,
        script: &ScriptSource,
        database: Option<&str>,
    ) -> Result<CommandOutput> {
        let db = Self::database_path(config, database)?;
        let sql = match script {
            ScriptSource::File(path) => fs::read(path)?,
            ScriptSource::Inline(sql) => sql.clone().into_bytes(),
        };
        Self::sqlite3(config.executable("sqlite3"), &db)
            .stdin(sql)
            .run_checked(self.command_timeout())
            .await
    }
}
