//! Shared fixtures for integration tests: a scriptable in-memory engine, a
//! fake `sqlite3` executable, fake PostgreSQL tools and a tiny HTTP
//! responder for download tests.

#![allow(dead_code)]

use async_trait::async_trait;
use dbfleet::backup::{
    BackupFormat, BackupOptions, BackupResult, DumpOptions, DumpResult, FormatKind,
    RestoreOptions, RestoreResult,
};
use dbfleet::binary::{BinaryManager, BinarySource, InstalledBinary, VerifyPolicy, VersionMap};
use dbfleet::config::{Context, Settings};
use dbfleet::container::ContainerConfig;
use dbfleet::engine::{
    Engine, EngineKind, InitOptions, ScriptSource, StartOutcome, StatusReport,
};
use dbfleet::platform::{Arch, Os, Platform};
use dbfleet::process::CommandOutput;
use dbfleet::progress::{Progress, Stage};
use dbfleet::{Error, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use url::Url;

pub fn test_platform() -> Platform {
    Platform::new(Os::Linux, Arch::X64)
}

/// Settings with short timeouts.
pub fn test_settings() -> Settings {
    Settings {
        poll_interval: std::time::Duration::from_millis(20),
        start_timeout: std::time::Duration::from_secs(5),
        stop_grace_period: std::time::Duration::from_secs(1),
        command_timeout: std::time::Duration::from_secs(10),
        ..Settings::default()
    }
}

/// Context rooted in a fresh temp dir with short timeouts.
pub fn test_context(root: &Path) -> Context {
    test_context_with(root, test_settings())
}

pub fn test_context_with(root: &Path, settings: Settings) -> Context {
    let ctx = Context::with_settings(root, settings);
    ctx.ensure_dirs().expect("Failed to create state dirs");
    ctx
}

// =============================================================================
// Mock server engine
// =============================================================================

#[derive(Debug)]
pub struct MockSource {
    map: VersionMap,
    verify: VerifyPolicy,
    checksums: bool,
}

impl MockSource {
    pub fn new() -> Self {
        Self {
            map: VersionMap::new([("16", "16.6.0"), ("17", "17.2.0")]),
            verify: VerifyPolicy::ExistsOnly,
            checksums: false,
        }
    }

    pub fn with_verify(mut self, verify: VerifyPolicy) -> Self {
        self.verify = verify;
        self
    }

    /// Publish a `<archive>.sha256` next to every archive.
    pub fn with_checksums(mut self) -> Self {
        self.checksums = true;
        self
    }
}

impl BinarySource for MockSource {
    fn engine(&self) -> &'static str {
        "mockdb"
    }
    fn version_map(&self) -> &VersionMap {
        &self.map
    }
    fn executables(&self) -> &[&'static str] {
        &["mockdb"]
    }
    fn verify_policy(&self) -> VerifyPolicy {
        self.verify
    }
    fn checksum_url(&self, archive: &Url) -> Option<Url> {
        if !self.checksums {
            return None;
        }
        Url::parse(&format!("{}.sha256", archive)).ok()
    }
}

/// What the next `start` call does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartBehavior {
    Succeed,
    PortInUse,
    Crash,
}

/// A server-style engine that keeps its "processes" in memory.
///
/// Behaviors queued with [`MockEngine::script`] are consumed one per fresh
/// start; once the queue is empty every start succeeds.
#[derive(Debug)]
pub struct MockEngine {
    ctx: Context,
    binaries: BinaryManager,
    script: Mutex<VecDeque<StartBehavior>>,
    running: Mutex<HashMap<String, u16>>,
    databases: Mutex<HashMap<String, Vec<String>>>,
    attempted_ports: Mutex<Vec<u16>>,
    start_calls: AtomicU32,
    spawned: AtomicU32,
}

impl MockEngine {
    pub fn new(ctx: &Context) -> Self {
        Self {
            ctx: ctx.clone(),
            binaries: BinaryManager::with_platform(
                ctx.clone(),
                Arc::new(MockSource::new()),
                test_platform(),
            ),
            script: Mutex::new(VecDeque::new()),
            running: Mutex::new(HashMap::new()),
            databases: Mutex::new(HashMap::new()),
            attempted_ports: Mutex::new(Vec::new()),
            start_calls: AtomicU32::new(0),
            spawned: AtomicU32::new(0),
        }
    }

    pub fn script(&self, behaviors: impl IntoIterator<Item = StartBehavior>) {
        self.script.lock().extend(behaviors);
    }

    pub fn start_calls(&self) -> u32 {
        self.start_calls.load(Ordering::SeqCst)
    }

    /// Number of "processes" actually launched.
    pub fn spawned(&self) -> u32 {
        self.spawned.load(Ordering::SeqCst)
    }

    pub fn attempted_ports(&self) -> Vec<u16> {
        self.attempted_ports.lock().clone()
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.running.lock().contains_key(name)
    }

    fn data_dir(&self, name: &str) -> PathBuf {
        self.ctx.container_dir("postgresql", name).join("data")
    }
}

#[async_trait]
impl Engine for MockEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Postgresql
    }

    fn binaries(&self) -> &BinaryManager {
        &self.binaries
    }

    async fn ensure_binaries(&self, version: &str, progress: &Progress) -> Result<InstalledBinary> {
        let full = self.binaries.normalize_version(version);
        let path = self.binaries.install_dir(&full);
        if !self.binaries.is_installed(&full) {
            fs::create_dir_all(path.join("bin"))?;
            fs::write(path.join("bin/mockdb"), b"#!/bin/sh\n")?;
        }
        progress.report(Stage::Cached, format!("mockdb {} ready", full));
        Ok(InstalledBinary {
            engine: "mockdb".to_string(),
            version: full,
            platform: test_platform(),
            path,
        })
    }

    async fn init_data_dir(
        &self,
        name: &str,
        _binary: &InstalledBinary,
        options: &InitOptions,
    ) -> Result<PathBuf> {
        let data = self.data_dir(name);
        if data.join("VERSION").exists() {
            return Err(Error::DataDirExists {
                name: name.to_string(),
                path: data,
            });
        }
        fs::create_dir_all(&data)?;
        fs::write(data.join("VERSION"), format!("port={}\n", options.port))?;
        Ok(data)
    }

    async fn start(&self, config: &ContainerConfig, progress: &Progress) -> Result<StartOutcome> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        self.attempted_ports.lock().push(config.port);

        let outcome = StartOutcome {
            port: config.port,
            connection_string: self.connection_string(config, None),
            pid: None,
        };
        if self.running.lock().contains_key(&config.name) {
            return Ok(outcome);
        }

        let behavior = self
            .script
            .lock()
            .pop_front()
            .unwrap_or(StartBehavior::Succeed);
        match behavior {
            StartBehavior::PortInUse => Err(Error::PortInUse { port: config.port }),
            StartBehavior::Crash => Err(Error::ProcessFailed {
                command: "mockdb".to_string(),
                code: 1,
                stderr: "FATAL: could not open data directory".to_string(),
            }),
            StartBehavior::Succeed => {
                self.running.lock().insert(config.name.clone(), config.port);
                self.spawned.fetch_add(1, Ordering::SeqCst);
                progress.report(Stage::Ready, format!("{} ready", config.name));
                Ok(outcome)
            }
        }
    }

    async fn stop(&self, config: &ContainerConfig) -> Result<()> {
        self.running.lock().remove(&config.name);
        Ok(())
    }

    async fn status(&self, config: &ContainerConfig) -> StatusReport {
        if self.is_running(&config.name) {
            StatusReport::running("accepting connections")
        } else {
            StatusReport::stopped("not running")
        }
    }

    async fn create_database(&self, config: &ContainerConfig, database: &str) -> Result<()> {
        let mut all = self.databases.lock();
        let dbs = all.entry(config.name.clone()).or_default();
        if !dbs.iter().any(|d| d == database) {
            dbs.push(database.to_string());
        }
        Ok(())
    }

    async fn drop_database(&self, config: &ContainerConfig, database: &str) -> Result<()> {
        if let Some(dbs) = self.databases.lock().get_mut(&config.name) {
            dbs.retain(|d| d != database);
        }
        Ok(())
    }

    async fn list_databases(&self, config: &ContainerConfig) -> Result<Vec<String>> {
        let mut listed = vec!["postgres".to_string(), config.database.clone()];
        if let Some(dbs) = self.databases.lock().get(&config.name) {
            listed.extend(dbs.iter().cloned());
        }
        Ok(listed)
    }

    async fn backup(
        &self,
        _config: &ContainerConfig,
        output: &Path,
        _options: &BackupOptions,
    ) -> Result<BackupResult> {
        let body = b"-- mock dump\nCREATE TABLE t (id int);\n";
        fs::write(output, body)?;
        Ok(BackupResult {
            path: output.to_path_buf(),
            format: FormatKind::SqlText,
            size: body.len() as u64,
        })
    }

    async fn restore(
        &self,
        _config: &ContainerConfig,
        _backup: &Path,
        format: &BackupFormat,
        _options: &RestoreOptions,
    ) -> Result<RestoreResult> {
        Ok(RestoreResult {
            format: format.format,
            stdout: String::new(),
            stderr: String::new(),
            code: 0,
            warnings: false,
        })
    }

    fn connection_string(&self, config: &ContainerConfig, database: Option<&str>) -> String {
        format!(
            "mock://127.0.0.1:{}/{}",
            config.port,
            database.unwrap_or(&config.database)
        )
    }

    async fn dump_from_connection_string(
        &self,
        _uri: &str,
        _output: &Path,
        _options: &DumpOptions,
    ) -> Result<DumpResult> {
        Err(Error::UnsupportedOperation {
            engine: "mockdb".to_string(),
            operation: "remote dumps".to_string(),
        })
    }

    async fn run_script(
        &self,
        _config: &ContainerConfig,
        _script: &ScriptSource,
        _database: Option<&str>,
    ) -> Result<CommandOutput> {
        Ok(CommandOutput {
            code: Some(0),
            stdout: "ok".to_string(),
            stderr: String::new(),
        })
    }
}

// =============================================================================
// Fake sqlite3
// =============================================================================

/// Shell stand-in for `sqlite3 -bail <db> [sql]`.
///
/// Any invocation creates the database file with a valid SQLite header;
/// `.dump` prints a fixed script, `VACUUM INTO '<path>'` copies the file,
/// and `--version` reports 3.51.2.
pub const FAKE_SQLITE3: &str = r#"#!/bin/sh
if [ "$1" = "--version" ]; then
  echo "3.51.2 2025-01-08 fake"
  exit 0
fi
[ "$1" = "-bail" ] && shift
db="$1"
shift
input="$*"
if [ -z "$input" ]; then
  input=$(cat)
fi
if [ ! -s "$db" ]; then
  printf 'SQLite format 3\000' > "$db"
  head -c 84 /dev/zero >> "$db"
fi
case "$input" in
  *".dump"*)
    echo "PRAGMA foreign_keys=OFF;"
    echo "BEGIN TRANSACTION;"
    echo "CREATE TABLE t (id integer);"
    echo "COMMIT;"
    ;;
  *"VACUUM INTO"*)
    target=$(printf '%s' "$input" | sed -n "s/.*VACUUM INTO '\([^']*\)'.*/\1/p")
    cp "$db" "$target"
    ;;
esac
exit 0
"#;

/// Install the fake sqlite3 tree where the binary manager expects it and
/// return the install root.
pub fn install_fake_sqlite(ctx: &Context) -> PathBuf {
    let root = ctx.bin_dir().join(format!("sqlite-3.51.2-{}", test_platform()));
    let bin = root.join("bin");
    fs::create_dir_all(&bin).expect("Failed to create bin dir");
    let exe = bin.join("sqlite3");
    fs::write(&exe, FAKE_SQLITE3).expect("Failed to write fake sqlite3");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&exe, fs::Permissions::from_mode(0o755))
            .expect("Failed to chmod fake sqlite3");
    }
    root
}

// =============================================================================
// Fake PostgreSQL tools
// =============================================================================

/// `postgres -D <data> -p <port> -h <host>`: records `postmaster.pid`, marks
/// `state/ready-<port>` and idles until SIGTERM. A `fail_bind` file in the
/// data dir makes it log a bind failure and exit instead.
pub const FAKE_POSTGRES: &str = r#"#!/bin/sh
data=""
port=""
while [ $# -gt 0 ]; do
  case "$1" in
    -D) data="$2"; shift 2 ;;
    -p) port="$2"; shift 2 ;;
    *) shift ;;
  esac
done
state="$(dirname "$0")/../state"
mkdir -p "$state"
echo "$$" >> "$state/starts"
echo "LOG:  starting fake server on port $port"
if [ -f "$data/fail_bind" ]; then
  echo "LOG:  could not bind IPv4 address \"127.0.0.1\": Address already in use" >&2
  echo "FATAL:  could not create any TCP/IP sockets" >&2
  exit 1
fi
echo "$$" > "$data/postmaster.pid"
trap 'rm -f "$data/postmaster.pid" "$state/ready-$port"; exit 0' TERM INT
touch "$state/ready-$port"
while :; do
  sleep 0.1
done
"#;

/// `pg_isready -p <port>`: ready while `state/ready-<port>` exists.
pub const FAKE_PG_ISREADY: &str = r#"#!/bin/sh
port=""
while [ $# -gt 0 ]; do
  case "$1" in
    -p) port="$2"; shift 2 ;;
    *) shift ;;
  esac
done
state="$(dirname "$0")/../state"
if [ -f "$state/ready-$port" ]; then
  echo "127.0.0.1:$port - accepting connections"
  exit 0
fi
echo "127.0.0.1:$port - no response"
exit 2
"#;

/// `pg_ctl -D <data> ... stop`: SIGTERM the recorded PID and wait for the
/// PID file to go away.
pub const FAKE_PG_CTL: &str = r#"#!/bin/sh
data=""
while [ $# -gt 0 ]; do
  case "$1" in
    -D) data="$2"; shift 2 ;;
    *) shift ;;
  esac
done
pidfile="$data/postmaster.pid"
if [ ! -f "$pidfile" ]; then
  echo "pg_ctl: PID file \"$pidfile\" does not exist" >&2
  exit 1
fi
kill -TERM "$(head -n 1 "$pidfile")"
i=0
while [ -f "$pidfile" ] && [ "$i" -lt 50 ]; do
  sleep 0.1
  i=$((i + 1))
done
[ ! -f "$pidfile" ]
"#;

/// `psql ...`: appends its arguments to `state/psql.log`; answers the
/// database listing query.
pub const FAKE_PSQL: &str = r#"#!/bin/sh
state="$(dirname "$0")/../state"
mkdir -p "$state"
printf '%s\n' "$*" >> "$state/psql.log"
case "$*" in
  *"SELECT datname"*) printf 'devpg\npostgres\n' ;;
esac
exit 0
"#;

/// `initdb -D <data> ...`: lays down `PG_VERSION` and an empty config.
pub const FAKE_INITDB: &str = r#"#!/bin/sh
data=""
while [ $# -gt 0 ]; do
  case "$1" in
    -D) data="$2"; shift 2 ;;
    *) shift ;;
  esac
done
mkdir -p "$data"
echo "16" > "$data/PG_VERSION"
: > "$data/postgresql.conf"
"#;

/// Write the fake PostgreSQL tools under `root/bin` and return `root`.
/// Tool state (start log, readiness markers, psql log) lands in `root/state`.
pub fn install_fake_postgres(root: &Path) -> PathBuf {
    let bin = root.join("bin");
    fs::create_dir_all(&bin).expect("Failed to create bin dir");
    fs::create_dir_all(root.join("state")).expect("Failed to create state dir");
    for (name, script) in [
        ("postgres", FAKE_POSTGRES),
        ("pg_isready", FAKE_PG_ISREADY),
        ("pg_ctl", FAKE_PG_CTL),
        ("psql", FAKE_PSQL),
        ("initdb", FAKE_INITDB),
    ] {
        let exe = bin.join(name);
        fs::write(&exe, script).expect("Failed to write fake tool");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&exe, fs::Permissions::from_mode(0o755))
                .expect("Failed to chmod fake tool");
        }
    }
    root.to_path_buf()
}

// =============================================================================
// HTTP responder
// =============================================================================

/// Canned reply for [`serve`].
#[derive(Debug, Clone)]
pub enum Reply {
    Ok(Vec<u8>),
    Status(u16),
    /// Accept the request and never answer.
    Stall,
}

/// Serve `reply` to every connection on an ephemeral loopback port.
/// Returns the base URL (no trailing slash).
pub async fn serve(reply: Reply) -> String {
    serve_routes(vec![("", reply)]).await
}

/// Serve the first reply whose suffix ends the request path; anything
/// unmatched gets a 404.
pub async fn serve_routes(routes: Vec<(&'static str, Reply)>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test server");
    let addr = listener.local_addr().expect("Failed to read local addr");
    let routes = Arc::new(routes);
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let routes = Arc::clone(&routes);
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]);
                let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                let reply = routes
                    .iter()
                    .find(|(suffix, _)| path.ends_with(suffix))
                    .map(|(_, reply)| reply.clone())
                    .unwrap_or(Reply::Status(404));
                match reply {
                    Reply::Ok(body) => {
                        let head = format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                            body.len()
                        );
                        let _ = socket.write_all(head.as_bytes()).await;
                        let _ = socket.write_all(&body).await;
                    }
                    Reply::Status(code) => {
                        let head = format!(
                            "HTTP/1.1 {} Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                            code
                        );
                        let _ = socket.write_all(head.as_bytes()).await;
                    }
                    Reply::Stall => {
                        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                    }
                }
                let _ = socket.shutdown().await;
            });
        }
    });
    format!("http://{}", addr)
}

/// A `.tar.gz` holding `entries` as `(path, contents, mode)`.
pub fn tar_gz(entries: &[(&str, &[u8], u32)]) -> Vec<u8> {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (path, contents, mode) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(*mode);
        header.set_cksum();
        builder
            .append_data(&mut header, path, *contents)
            .expect("Failed to append tar entry");
    }
    builder
        .into_inner()
        .and_then(|gz| gz.finish())
        .expect("Failed to finish archive")
}
