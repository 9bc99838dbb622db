//! Binary acquisition: resolve, download, extract, verify, cache.
//!
//! One shared pipeline drives every engine. Engine-specific knowledge (version
//! aliases, URL shape, executable names, how to verify) is supplied through the
//! [`BinarySource`] hooks, so adding an engine never touches this module.
//!
//! Installs land at `<root>/bin/<engine>-<version>-<os>-<arch>/` and are only
//! ever created by a rename from a fully verified staging directory. A failed
//! download, extraction or verification leaves nothing behind.

mod download;
mod layout;
mod version;

pub use download::{download_to_file, fetch_checksum, Downloaded};
pub use layout::{find_content_root, normalize_layout};
pub use version::{compare_versions, major, major_minor, VersionMap};

use crate::config::Context;
use crate::error::{Error, Result};
use crate::fsutil::{self, ArchiveKind, FileLock};
use crate::platform::Platform;
use crate::process::CommandSpec;
use crate::progress::{Progress, Stage};
use regex::Regex;
use reqwest::Client;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use url::Url;

/// How much of the reported version must match the requested one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionPrecision {
    Major,
    MajorMinor,
}

/// Post-install verification strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyPolicy {
    /// Run the primary executable with `flag` and compare the reported version.
    VersionFlag {
        flag: &'static str,
        precision: VersionPrecision,
    },
    /// The engine has no reliable version flag; the executable must exist.
    ExistsOnly,
}

/// Per-engine hooks for the shared acquisition pipeline.
pub trait BinarySource: Send + Sync + fmt::Debug {
    /// Engine name used in URLs and directory names.
    fn engine(&self) -> &'static str;

    fn version_map(&self) -> &VersionMap;

    /// Executable base names, primary first. Used as the allowlist when a flat
    /// archive is sorted into `bin/`.
    fn executables(&self) -> &[&'static str];

    /// Sub-component directories kept beneath `bin/`.
    fn preserved_dirs(&self) -> &[&'static str] {
        &[]
    }

    fn verify_policy(&self) -> VerifyPolicy;

    fn supports(&self, _platform: &Platform) -> bool {
        true
    }

    /// Archive URL for a full version. Must be deterministic.
    fn download_url(&self, base_url: &str, version: &str, platform: &Platform) -> Result<Url> {
        let engine = self.engine();
        let ext = archive_kind_for(platform).extension();
        let raw = format!(
            "{}/{engine}-{version}/{engine}-{version}-{platform}.{ext}",
            base_url.trim_end_matches('/'),
        );
        Url::parse(&raw).map_err(|e| Error::Config(format!("Invalid download URL {}: {}", raw, e)))
    }

    /// Where a published SHA-256 for `archive` lives, if the engine has one.
    fn checksum_url(&self, _archive: &Url) -> Option<Url> {
        None
    }

    /// Extract a version number from `--version` style output.
    fn parse_version(&self, output: &str) -> Option<String> {
        static VERSION_RE: OnceLock<Regex> = OnceLock::new();
        let re = VERSION_RE
            .get_or_init(|| Regex::new(r"\d+(?:\.\d+)+").expect("static regex pattern is valid"));
        re.find(output).map(|m| m.as_str().to_string())
    }
}

/// Archive format published for `platform`.
pub fn archive_kind_for(platform: &Platform) -> ArchiveKind {
    if platform.is_windows() {
        ArchiveKind::Zip
    } else {
        ArchiveKind::TarGz
    }
}

/// A verified binary tree on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstalledBinary {
    pub engine: String,
    pub version: String,
    pub platform: Platform,
    /// Install root; executables live in `path/bin`.
    pub path: PathBuf,
}

impl InstalledBinary {
    pub fn bin_dir(&self) -> PathBuf {
        self.path.join("bin")
    }

    /// Full path of an executable by base name.
    pub fn executable(&self, base: &str) -> PathBuf {
        self.bin_dir().join(self.platform.exe_name(base))
    }
}

type KeyLocks = parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

static INSTALL_LOCKS: OnceLock<KeyLocks> = OnceLock::new();

/// In-process mutex for one install key. The fs2 lock covers other processes.
fn key_lock(key: &str) -> Arc<tokio::sync::Mutex<()>> {
    let locks = INSTALL_LOCKS.get_or_init(Default::default);
    locks.lock().entry(key.to_string()).or_default().clone()
}

/// Downloads and caches binaries for one engine.
#[derive(Debug, Clone)]
pub struct BinaryManager {
    ctx: Context,
    source: Arc<dyn BinarySource>,
    platform: Platform,
    client: Client,
}

impl BinaryManager {
    pub fn new(ctx: Context, source: Arc<dyn BinarySource>) -> Result<Self> {
        Ok(Self::with_platform(ctx, source, Platform::current()?))
    }

    pub fn with_platform(ctx: Context, source: Arc<dyn BinarySource>, platform: Platform) -> Self {
        let client = Client::builder()
            .user_agent(concat!("dbfleet/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            ctx,
            source,
            platform,
            client,
        }
    }

    pub fn engine(&self) -> &'static str {
        self.source.engine()
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn source(&self) -> &Arc<dyn BinarySource> {
        &self.source
    }

    /// Full version for a user-supplied alias; unmapped input passes through.
    pub fn normalize_version(&self, version: &str) -> String {
        self.source.version_map().resolve(self.engine(), version)
    }

    /// Archive URL for `version` on this manager's platform.
    pub fn resolve_url(&self, version: &str) -> Result<Url> {
        self.resolve_url_for(version, &self.platform)
    }

    pub fn resolve_url_for(&self, version: &str, platform: &Platform) -> Result<Url> {
        if !self.source.supports(platform) {
            return Err(Error::UnsupportedPlatform {
                engine: self.engine().to_string(),
                platform: platform.to_string(),
            });
        }
        let full = self.normalize_version(version);
        self.source
            .download_url(&self.ctx.settings().release_base_url, &full, platform)
    }

    /// Deterministic install root for a full version.
    pub fn install_dir(&self, full_version: &str) -> PathBuf {
        self.ctx.bin_dir().join(format!(
            "{}-{}-{}",
            self.engine(),
            full_version,
            self.platform
        ))
    }

    fn installed(&self, full_version: &str) -> InstalledBinary {
        InstalledBinary {
            engine: self.engine().to_string(),
            version: full_version.to_string(),
            platform: self.platform,
            path: self.install_dir(full_version),
        }
    }

    fn primary_executable(&self) -> Result<&'static str> {
        self.source.executables().first().copied().ok_or_else(|| {
            Error::Config(format!("{} declares no executables", self.engine()))
        })
    }

    pub fn is_installed(&self, version: &str) -> bool {
        let full = self.normalize_version(version);
        match self.primary_executable() {
            Ok(primary) => self.installed(&full).executable(primary).is_file(),
            Err(_) => false,
        }
    }

    /// The installed tree for `version`, or [`Error::BinaryNotFound`].
    pub fn get_installed(&self, version: &str) -> Result<InstalledBinary> {
        let full = self.normalize_version(version);
        if self.is_installed(&full) {
            Ok(self.installed(&full))
        } else {
            Err(Error::BinaryNotFound {
                engine: self.engine().to_string(),
                version: full,
            })
        }
    }

    /// Return the installed tree for `version`, downloading it first if needed.
    pub async fn ensure_installed(
        &self,
        version: &str,
        progress: &Progress,
    ) -> Result<InstalledBinary> {
        progress.report(Stage::Resolving, format!("Resolving {} {}", self.engine(), version));
        let full = self.normalize_version(version);

        if self.is_installed(&full) {
            progress.report(Stage::Cached, format!("{} {} already installed", self.engine(), full));
            return Ok(self.installed(&full));
        }

        let key = format!("{}-{}-{}", self.engine(), full, self.platform);
        let guard = key_lock(&key);
        let _in_process = guard.lock().await;

        let lock_path = self.ctx.locks_dir().join(format!("install-{}.lock", key));
        let _cross_process = tokio::task::spawn_blocking(move || FileLock::acquire(&lock_path))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))??;

        // Another installer may have finished while we waited.
        if self.is_installed(&full) {
            progress.report(Stage::Cached, format!("{} {} already installed", self.engine(), full));
            return Ok(self.installed(&full));
        }

        let target = self.install_dir(&full);
        match self.install(&full, &target, progress).await {
            Ok(()) => {
                progress.report(
                    Stage::Installed,
                    format!("Installed {} {} to {}", self.engine(), full, target.display()),
                );
                tracing::info!("Installed {} {} at {:?}", self.engine(), full, target);
                Ok(self.installed(&full))
            }
            Err(e) => {
                if target.exists() {
                    if let Err(cleanup) = fsutil::remove_path(&target) {
                        tracing::warn!("Failed to clean up {:?}: {}", target, cleanup);
                    }
                }
                Err(e)
            }
        }
    }

    async fn install(&self, full: &str, target: &Path, progress: &Progress) -> Result<()> {
        let url = self.resolve_url(full)?;
        let bin_root = self.ctx.bin_dir();
        std::fs::create_dir_all(&bin_root)?;

        // Dropped on every exit path, taking partial downloads with it.
        let staging = tempfile::Builder::new()
            .prefix(&format!(".staging-{}-", self.engine()))
            .tempdir_in(&bin_root)?;

        let kind = archive_kind_for(&self.platform);
        let archive = staging.path().join(format!("archive.{}", kind.extension()));
        let timeout = self.ctx.settings().download_timeout;

        progress.report(Stage::Downloading, format!("Downloading {}", url));
        let downloaded = download_to_file(&self.client, url.as_str(), &archive, timeout).await?;
        tracing::debug!("Downloaded {} bytes from {}", downloaded.bytes, url);

        if let Some(sum_url) = self.source.checksum_url(&url) {
            let expected = fetch_checksum(&self.client, sum_url.as_str(), timeout).await?;
            if expected != downloaded.sha256 {
                return Err(Error::Checksum {
                    expected,
                    actual: downloaded.sha256,
                });
            }
        }

        progress.report(Stage::Extracting, "Extracting archive");
        let extract_dir = staging.path().join("extract");
        let executables: Vec<&'static str> = self.source.executables().to_vec();
        let preserved: Vec<&'static str> = self.source.preserved_dirs().to_vec();
        let archive_path = archive.clone();
        let extract_path = extract_dir.clone();
        let root = tokio::task::spawn_blocking(move || -> Result<PathBuf> {
            fsutil::extract_archive(&archive_path, kind, &extract_path)?;
            let root = normalize_layout(&extract_path, &executables, &preserved)?;
            if !cfg!(windows) {
                fsutil::make_dir_executable(&root.join("bin"))?;
            }
            Ok(root)
        })
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))??;

        progress.report(Stage::Verifying, format!("Verifying {} {}", self.engine(), full));
        self.verify(&root, full).await?;

        fsutil::move_path(&root, target)?;
        Ok(())
    }

    /// Check the staged tree at `root` reports the requested version.
    async fn verify(&self, root: &Path, full: &str) -> Result<()> {
        let primary = self.primary_executable()?;
        let exe = root.join("bin").join(self.platform.exe_name(primary));
        if !exe.is_file() {
            return Err(Error::Verification {
                expected: format!("{} executable", primary),
                actual: "missing".to_string(),
            });
        }

        let (flag, precision) = match self.source.verify_policy() {
            VerifyPolicy::ExistsOnly => return Ok(()),
            VerifyPolicy::VersionFlag { flag, precision } => (flag, precision),
        };

        let output = CommandSpec::new(&exe)
            .arg(flag)
            .run(Duration::from_secs(30))
            .await
            .map_err(|e| Error::Verification {
                expected: full.to_string(),
                actual: format!("could not run {}: {}", primary, e),
            })?;
        let text = format!("{}\n{}", output.stdout, output.stderr);
        let reported = self
            .source
            .parse_version(&text)
            .ok_or_else(|| Error::Verification {
                expected: full.to_string(),
                actual: format!("unparseable output: {}", text.trim()),
            })?;

        let matches = match precision {
            VersionPrecision::Major => major(&reported) == major(full),
            VersionPrecision::MajorMinor => major_minor(&reported) == major_minor(full),
        };
        if !matches {
            return Err(Error::Verification {
                expected: full.to_string(),
                actual: reported,
            });
        }
        tracing::debug!("{} reports version {}", primary, reported);
        Ok(())
    }

    /// Installed versions for this engine and platform, newest first.
    pub fn list_installed(&self) -> Result<Vec<InstalledBinary>> {
        let bin_root = self.ctx.bin_dir();
        if !bin_root.exists() {
            return Ok(Vec::new());
        }
        let primary = self.primary_executable()?;
        let prefix = format!("{}-", self.engine());
        let suffix = format!("-{}", self.platform);
        let mut found = Vec::new();
        for entry in std::fs::read_dir(&bin_root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(version) = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(&suffix))
            else {
                continue;
            };
            let candidate = self.installed(version);
            if candidate.executable(primary).is_file() {
                found.push(candidate);
            }
        }
        found.sort_by(|a, b| compare_versions(&b.version, &a.version));
        Ok(found)
    }

    /// Remove an installed version. Returns false if it was not installed.
    pub fn uninstall(&self, version: &str) -> Result<bool> {
        let full = self.normalize_version(version);
        let dir = self.install_dir(&full);
        if !dir.exists() {
            return Ok(false);
        }
        fsutil::remove_path(&dir)?;
        tracing::info!("Uninstalled {} {}", self.engine(), full);
        Ok(true)
    }
}
