use super::{Engine, EngineKind, InitOptions, ScriptSource, StartOutcome, StatusReport};
use crate::backup::{
    self, artifact_size, decompress_gzip, detect_format, evaluate_restore, BackupFormat,
    BackupOptions, BackupResult, DumpOptions, DumpResult, FormatKind, OutputFormat,
    RestoreOptions, RestoreResult,
};
use crate::binary::{
    major, BinaryManager, BinarySource, InstalledBinary, VerifyPolicy, VersionMap,
    VersionPrecision,
};
use crate::config::Context;
use crate::container::ContainerConfig;
use crate::error::{Error, Result};
use crate::platform::Platform;
use crate::port::PortAllocator;
use crate::process::{self, CommandOutput, CommandSpec};
use crate::progress::{Progress, Stage};
use async_trait::async_trait;
use regex::Regex;
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

const SUPERUSER: &str = "postgres";
const HOST: &str = "127.0.0.1";

/// Server log phrases that mean the listen socket could not be bound.
const BIND_FAILURE_MARKERS: &[&str] = &[
    "address already in use",
    "could not bind ipv4 address",
    "could not bind ipv6 address",
    "could not create any tcp/ip sockets",
];

const EXECUTABLES: &[&str] = &[
    "postgres",
    "pg_ctl",
    "initdb",
    "psql",
    "pg_dump",
    "pg_dumpall",
    "pg_restore",
    "pg_isready",
    "createdb",
    "dropdb",
];

/// Release metadata for PostgreSQL server builds.
#[derive(Debug)]
pub struct PostgresSource {
    map: VersionMap,
}

impl PostgresSource {
    pub fn new() -> Self {
        Self {
            map: VersionMap::new([
                ("14", "14.15.0"),
                ("15", "15.10.0"),
                ("16", "16.6.0"),
                ("17", "17.2.0"),
            ]),
        }
    }
}

impl Default for PostgresSource {
    fn default() -> Self {
        Self::new()
    }
}

impl BinarySource for PostgresSource {
    fn engine(&self) -> &'static str {
        "postgresql"
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
            precision: VersionPrecision::Major,
        }
    }
}

/// Local PostgreSQL server per container.
///
/// State lives in `containers/postgresql/<name>/data`; the server log is
/// `containers/postgresql/<name>/postgres.log`. The server listens on
/// 127.0.0.1 only, with Unix sockets disabled, and trusts the local
/// `postgres` superuser.
#[derive(Debug)]
pub struct PostgresEngine {
    ctx: Context,
    binaries: BinaryManager,
}

impl PostgresEngine {
    pub fn new(ctx: Context, platform: Platform) -> Self {
        Self::with_source(ctx, Arc::new(PostgresSource::new()), platform)
    }

    pub fn with_source(ctx: Context, source: Arc<dyn BinarySource>, platform: Platform) -> Self {
        let binaries = BinaryManager::with_platform(ctx.clone(), source, platform);
        Self { ctx, binaries }
    }

    pub fn data_dir(&self, name: &str) -> PathBuf {
        self.ctx
            .container_dir(EngineKind::Postgresql.as_str(), name)
            .join("data")
    }

    pub fn log_path(&self, name: &str) -> PathBuf {
        self.ctx
            .container_dir(EngineKind::Postgresql.as_str(), name)
            .join("postgres.log")
    }

    /// PID recorded in `postmaster.pid`, if any.
    fn recorded_pid(&self, name: &str) -> Option<u32> {
        let raw = fs::read_to_string(self.data_dir(name).join("postmaster.pid")).ok()?;
        raw.lines().next()?.trim().parse().ok()
    }

    fn live_pid(&self, name: &str) -> Option<u32> {
        self.recorded_pid(name).filter(|pid| process::is_pid_alive(*pid))
    }

    fn command_timeout(&self) -> Duration {
        self.ctx.settings().command_timeout
    }

    /// Connection flags shared by every client tool.
    fn client(&self, config: &ContainerConfig, tool: &str) -> CommandSpec {
        CommandSpec::new(config.executable(tool))
            .args(["-h", HOST, "-p"])
            .arg(config.port.to_string())
            .args(["-U", SUPERUSER])
            .env("PGCONNECT_TIMEOUT", "5")
    }

    fn psql(&self, config: &ContainerConfig, database: &str) -> CommandSpec {
        self.client(config, "psql")
            .args(["-X", "-q", "-d", database])
    }

    async fn is_ready(&self, config: &ContainerConfig) -> bool {
        let probe = self
            .client(config, "pg_isready")
            .args(["-d", "postgres", "-t", "1"]);
        match probe.run(Duration::from_secs(5)).await {
            Ok(out) => out.success(),
            Err(e) => {
                tracing::debug!("pg_isready failed: {}", e);
                false
            }
        }
    }

    /// Poll the readiness probe until the server accepts connections.
    ///
    /// `spawned` is the PID of a server we just launched; if it dies while we
    /// wait, the log written since `log_offset` decides the error.
    async fn wait_ready(
        &self,
        config: &ContainerConfig,
        spawned: Option<u32>,
        log_offset: u64,
    ) -> Result<()> {
        let settings = self.ctx.settings();
        let deadline = tokio::time::Instant::now() + settings.start_timeout;
        loop {
            if self.is_ready(config).await {
                return Ok(());
            }
            if let Some(pid) = spawned {
                if !process::is_pid_alive(pid) {
                    return Err(self.classify_start_failure(config, log_offset));
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Timeout(format!(
                    "PostgreSQL '{}' to accept connections on port {}",
                    config.name, config.port
                )));
            }
            tokio::time::sleep(settings.poll_interval).await;
        }
    }

    /// Turn a server that exited during startup into a typed error.
    fn classify_start_failure(&self, config: &ContainerConfig, log_offset: u64) -> Error {
        let log = read_log_since(&self.log_path(&config.name), log_offset);
        let lowered = log.to_lowercase();
        if BIND_FAILURE_MARKERS.iter().any(|m| lowered.contains(m)) {
            return Error::PortInUse { port: config.port };
        }
        let tail: Vec<&str> = log.lines().rev().take(20).collect();
        Error::ProcessFailed {
            command: "postgres".to_string(),
            code: -1,
            stderr: tail.into_iter().rev().collect::<Vec<_>>().join("\n"),
        }
    }

    /// Installed client tools for remote dumps: the newest install, or the
    /// default version downloaded on demand.
    async fn client_binaries(&self) -> Result<InstalledBinary> {
        if let Some(newest) = self.binaries.list_installed()?.into_iter().next() {
            return Ok(newest);
        }
        self.binaries
            .ensure_installed(EngineKind::Postgresql.default_version(), &Progress::none())
            .await
    }

    /// Reject dumps produced by a newer server major than the container runs.
    async fn validate_dump_version(
        &self,
        config: &ContainerConfig,
        backup: &Path,
        format: FormatKind,
    ) -> Result<()> {
        let text = match format {
            FormatKind::CustomDump | FormatKind::DirectoryDump => {
                self.client(config, "pg_restore")
                    .arg("-l")
                    .arg(backup)
                    .run_checked(self.command_timeout())
                    .await?
                    .stdout
            }
            FormatKind::SqlText => read_head(backup)?,
            _ => return Ok(()),
        };
        let Some(dumped) = parse_dump_version(&text) else {
            tracing::debug!("No server version recorded in {:?}", backup);
            return Ok(());
        };
        let dump_major: u32 = major(&dumped).parse().unwrap_or(0);
        let server_major: u32 = major(&config.version).parse().unwrap_or(0);
        if dump_major > server_major {
            return Err(Error::VersionIncompatible(format!(
                "backup was dumped from PostgreSQL {} but '{}' runs {}",
                dumped, config.name, config.version
            )));
        }
        Ok(())
    }

    async fn restore_sql_file(
        &self,
        config: &ContainerConfig,
        database: &str,
        file: &Path,
    ) -> Result<CommandOutput> {
        self.psql(config, database)
            .arg("-f")
            .arg(file)
            .run(self.command_timeout())
            .await
    }
}

/// Contents of `path` written after `offset`.
fn read_log_since(path: &Path, offset: u64) -> String {
    let mut buf = String::new();
    if let Ok(mut file) = fs::File::open(path) {
        if file.seek(SeekFrom::Start(offset)).is_ok() {
            let _ = file.read_to_string(&mut buf);
        }
    }
    buf
}

fn read_head(path: &Path) -> Result<String> {
    let mut head = Vec::with_capacity(backup::HEADER_LEN);
    fs::File::open(path)?
        .take(backup::HEADER_LEN as u64)
        .read_to_end(&mut head)?;
    Ok(String::from_utf8_lossy(&head).into_owned())
}

/// Server version from a dump header or `pg_restore -l` listing.
pub fn parse_dump_version(text: &str) -> Option<String> {
    static DUMPED_RE: OnceLock<Regex> = OnceLock::new();
    let re = DUMPED_RE.get_or_init(|| {
        Regex::new(r"Dumped from database version:?\s+(\d+(?:\.\d+)*)")
            .expect("static regex pattern is valid")
    });
    re.captures(text).map(|c| c[1].to_string())
}

/// Double-quote an identifier for SQL.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[async_trait]
impl Engine for PostgresEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Postgresql
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
        let data = self.data_dir(name);
        if data.join("PG_VERSION").exists() {
            return Err(Error::DataDirExists {
                name: name.to_string(),
                path: data,
            });
        }
        if data.exists() {
            // Leftover from an interrupted initdb.
            crate::fsutil::remove_path(&data)?;
        }
        if let Some(parent) = data.parent() {
            fs::create_dir_all(parent)?;
        }

        CommandSpec::new(binary.executable("initdb"))
            .arg("-D")
            .arg(&data)
            .args(["-U", SUPERUSER, "--auth=trust", "--encoding=UTF8", "--no-locale"])
            .run_checked(self.command_timeout())
            .await?;

        let conf = data.join("postgresql.conf");
        let mut contents = fs::read_to_string(&conf).unwrap_or_default();
        contents.push_str(&format!(
            "\n# dbfleet\nport = {}\nlisten_addresses = '{}'\nunix_socket_directories = ''\n",
            options.port, HOST
        ));
        fs::write(&conf, contents)?;

        tracing::info!("Initialized PostgreSQL data directory {:?}", data);
        Ok(data)
    }

    #[tracing::instrument(skip(self, config, progress), fields(container = %config.name, port = config.port))]
    async fn start(&self, config: &ContainerConfig, progress: &Progress) -> Result<StartOutcome> {
        let data = self.data_dir(&config.name);
        if !data.join("PG_VERSION").exists() {
            return Err(Error::Config(format!(
                "'{}' has no initialized data directory at {}",
                config.name,
                data.display()
            )));
        }

        if let Some(pid) = self.live_pid(&config.name) {
            tracing::debug!("PostgreSQL '{}' already running as PID {}", config.name, pid);
            self.wait_ready(config, None, 0).await?;
            progress.report(Stage::Ready, format!("'{}' is already running", config.name));
            return Ok(StartOutcome {
                port: config.port,
                connection_string: self.connection_string(config, None),
                pid: Some(pid),
            });
        }

        if !PortAllocator::new().is_available(config.port) {
            return Err(Error::PortInUse { port: config.port });
        }

        progress.report(
            Stage::Starting,
            format!("Starting PostgreSQL '{}' on port {}", config.name, config.port),
        );
        let log_path = self.log_path(&config.name);
        let log_offset = fs::metadata(&log_path).map(|m| m.len()).unwrap_or(0);
        let spec = CommandSpec::new(config.executable("postgres"))
            .arg("-D")
            .arg(&data)
            .arg("-p")
            .arg(config.port.to_string())
            .args(["-h", HOST]);
        let pid = process::spawn_detached(&spec, &log_path)?;

        if let Err(e) = self.wait_ready(config, Some(pid), log_offset).await {
            if process::is_pid_alive(pid) {
                let settings = self.ctx.settings();
                let _ = process::terminate(
                    pid,
                    &config.name,
                    settings.stop_grace_period,
                    settings.poll_interval,
                )
                .await;
            }
            return Err(e);
        }

        if config.database != SUPERUSER {
            self.create_database(config, &config.database).await?;
        }

        progress.report(Stage::Ready, format!("'{}' accepting connections", config.name));
        tracing::info!("PostgreSQL '{}' ready on port {} (PID {})", config.name, config.port, pid);
        Ok(StartOutcome {
            port: config.port,
            connection_string: self.connection_string(config, None),
            pid: Some(pid),
        })
    }

    #[tracing::instrument(skip(self, config), fields(container = %config.name))]
    async fn stop(&self, config: &ContainerConfig) -> Result<()> {
        let Some(pid) = self.live_pid(&config.name) else {
            tracing::debug!("PostgreSQL '{}' is not running", config.name);
            return Ok(());
        };
        let settings = self.ctx.settings();
        let grace = settings.stop_grace_period;

        let fast_stop = CommandSpec::new(config.executable("pg_ctl"))
            .arg("-D")
            .arg(self.data_dir(&config.name))
            .args(["-m", "fast", "-w", "-t"])
            .arg(grace.as_secs().max(1).to_string())
            .arg("stop")
            .run(grace + Duration::from_secs(5))
            .await;
        match fast_stop {
            Ok(out) if out.success() => {}
            Ok(out) => tracing::warn!("pg_ctl stop for '{}' failed: {}", config.name, out.stderr.trim()),
            Err(e) => tracing::warn!("pg_ctl stop for '{}' failed: {}", config.name, e),
        }

        if process::is_pid_alive(pid) {
            process::terminate(pid, &config.name, grace, settings.poll_interval).await?;
        }
        tracing::info!("PostgreSQL '{}' stopped", config.name);
        Ok(())
    }

    async fn status(&self, config: &ContainerConfig) -> StatusReport {
        let Some(pid) = self.live_pid(&config.name) else {
            return StatusReport::stopped("not running");
        };
        if self.is_ready(config).await {
            StatusReport::running(format!("accepting connections on {}:{}", HOST, config.port))
        } else {
            StatusReport::running(format!("PID {} alive but not accepting connections", pid))
        }
    }

    async fn create_database(&self, config: &ContainerConfig, database: &str) -> Result<()> {
        let out = self
            .psql(config, "postgres")
            .arg("-c")
            .arg(format!("CREATE DATABASE {}", quote_ident(database)))
            .run(self.command_timeout())
            .await?;
        if out.success() {
            tracing::info!("Created database '{}' in '{}'", database, config.name);
            return Ok(());
        }
        if out.stderr.contains("already exists") {
            tracing::debug!("Database '{}' already exists in '{}'", database, config.name);
            return Ok(());
        }
        Err(Error::ProcessFailed {
            command: "psql".to_string(),
            code: out.code_or_signal(),
            stderr: out.stderr.trim().to_string(),
        })
    }

    async fn drop_database(&self, config: &ContainerConfig, database: &str) -> Result<()> {
        self.psql(config, "postgres")
            .arg("-c")
            .arg(format!("DROP DATABASE IF EXISTS {}", quote_ident(database)))
            .run_checked(self.command_timeout())
            .await?;
        Ok(())
    }

    async fn list_databases(&self, config: &ContainerConfig) -> Result<Vec<String>> {
        let out = self
            .psql(config, "postgres")
            .args([
                "-A",
                "-t",
                "-c",
                "SELECT datname FROM pg_database WHERE NOT datistemplate ORDER BY datname",
            ])
            .run_checked(self.command_timeout())
            .await?;
        Ok(out
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    async fn backup(
        &self,
        config: &ContainerConfig,
        output: &Path,
        options: &BackupOptions,
    ) -> Result<BackupResult> {
        let database = options.database.as_deref().unwrap_or(&config.database);
        let (flag, format) = match options.format {
            OutputFormat::Sql => ("-Fp", FormatKind::SqlText),
            OutputFormat::Native => ("-Fc", FormatKind::CustomDump),
        };
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }
        self.client(config, "pg_dump")
            .args([flag, "-d", database, "-f"])
            .arg(output)
            .run_checked(self.command_timeout())
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
        let database = options.database.clone().unwrap_or_else(|| config.database.clone());
        if options.create_database {
            self.create_database(config, &database).await?;
        }
        if options.validate_version {
            self.validate_dump_version(config, backup, format.format).await?;
        }

        match format.format {
            FormatKind::SqlText => {
                let out = self.restore_sql_file(config, &database, backup).await?;
                evaluate_restore("psql", format.format, out)
            }
            FormatKind::CustomDump | FormatKind::DirectoryDump => {
                let mut spec = self
                    .client(config, "pg_restore")
                    .args(["--no-owner", "-d", database.as_str()]);
                if options.drop {
                    spec = spec.args(["--clean", "--if-exists"]);
                }
                let out = spec.arg(backup).run(self.command_timeout()).await?;
                evaluate_restore("pg_restore", format.format, out)
            }
            FormatKind::SchemaDataPair => {
                let staging = tempfile::tempdir()?;
                let mut stdout = String::new();
                let mut stderr = String::new();
                let mut last = None;
                for part in ["schema", "data"] {
                    let file = pair_member(backup, part, staging.path())?;
                    let out = self.restore_sql_file(config, &database, &file).await?;
                    stdout.push_str(&out.stdout);
                    stderr.push_str(&out.stderr);
                    let result = evaluate_restore("psql", format.format, out)?;
                    last = Some(result);
                }
                let mut result = last.ok_or_else(|| {
                    Error::Extraction(format!("{} holds no schema/data files", backup.display()))
                })?;
                result.stdout = stdout;
                result.stderr = stderr;
                Ok(result)
            }
            FormatKind::CompressedSnapshot => {
                let staging = tempfile::tempdir()?;
                let inner = staging.path().join("restore.inner");
                decompress_gzip(backup, &inner)?;
                let inner_format = detect_format(&inner)?;
                if matches!(inner_format.format, FormatKind::CompressedSnapshot) {
                    return Err(Error::Extraction(format!(
                        "{} is compressed more than once",
                        backup.display()
                    )));
                }
                let inner_options = RestoreOptions {
                    database: Some(database),
                    create_database: false,
                    ..options.clone()
                };
                self.restore(config, &inner, &inner_format, &inner_options).await
            }
            other => Err(Error::UnsupportedOperation {
                engine: EngineKind::Postgresql.to_string(),
                operation: format!("restoring {} backups", other),
            }),
        }
    }

    fn connection_string(&self, config: &ContainerConfig, database: Option<&str>) -> String {
        format!(
            "postgresql://{}@{}:{}/{}",
            SUPERUSER,
            HOST,
            config.port,
            database.unwrap_or(&config.database)
        )
    }

    async fn dump_from_connection_string(
        &self,
        uri: &str,
        output: &Path,
        options: &DumpOptions,
    ) -> Result<DumpResult> {
        if !(uri.starts_with("postgres://") || uri.starts_with("postgresql://")) {
            return Err(Error::Config(format!(
                "'{}' is not a PostgreSQL connection string",
                uri
            )));
        }
        let tools = self.client_binaries().await?;
        let (flag, format) = match options.format {
            OutputFormat::Sql => ("-Fp", FormatKind::SqlText),
            OutputFormat::Native => ("-Fc", FormatKind::CustomDump),
        };
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }
        CommandSpec::new(tools.executable("pg_dump"))
            .arg(format!("--dbname={}", uri))
            .args([flag, "--no-owner", "-f"])
            .arg(output)
            .run_checked(self.command_timeout())
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
        let spec = self
            .psql(config, database.unwrap_or(&config.database))
            .args(["-v", "ON_ERROR_STOP=1"]);
        let spec = match script {
            ScriptSource::File(path) => spec.arg("-f").arg(path),
            ScriptSource::Inline(sql) => spec.arg("-c").arg(sql),
        };
        spec.run_checked(self.command_timeout()).await
    }
}

/// `schema.sql` / `data.sql` from a pair directory, gunzipping `.sql.gz`
/// members into `scratch`.
fn pair_member(dir: &Path, stem: &str, scratch: &Path) -> Result<PathBuf> {
    let plain = dir.join(format!("{}.sql", stem));
    if plain.is_file() {
        return Ok(plain);
    }
    let gz = dir.join(format!("{}.sql.gz", stem));
    if gz.is_file() {
        let out = scratch.join(format!("{}.sql", stem));
        decompress_gzip(&gz, &out)?;
        return Ok(out);
    }
    Err(Error::BackupNotFound(plain))
}
