//! Configuration and filesystem context.
//!
//! Everything that used to be process-wide (home directory, timeouts, port
//! ranges) lives in an explicit [`Context`] handed to the binary manager,
//! container manager and port allocator at construction. Tests build a
//! `Context` over a temporary root and never touch the user's home.
//!
//! Layout under the root:
//!
//! ```text
//! <root>/
//!   config.yaml                    optional Settings overrides
//!   bin/<engine>-<ver>-<os>-<arch>/bin/...
//!   containers/<engine>/<name>/container.json
//!   registry/sqlite.json
//!   locks/
//!   logs/
//! ```

mod duration;

pub use duration::*;

use crate::error::{Error, Result};
use crate::port::PortRange;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the root directory.
pub const HOME_ENV: &str = "DBFLEET_HOME";

const DEFAULT_DIR_NAME: &str = ".dbfleet";
const SETTINGS_FILE: &str = "config.yaml";
const DEFAULT_RELEASE_BASE_URL: &str = "https://github.com/dbfleet/engine-binaries/releases/download";

/// Tunables loaded from `config.yaml`. Every field has a default, so an
/// empty or missing file yields [`Settings::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Hard ceiling for a single archive download.
    #[serde(with = "serde_duration")]
    pub download_timeout: Duration,
    /// How long `start` waits for the readiness probe.
    #[serde(with = "serde_duration")]
    pub start_timeout: Duration,
    /// Time between the graceful stop request and the forceful kill.
    #[serde(with = "serde_duration")]
    pub stop_grace_period: Duration,
    /// Interval for every readiness / shutdown polling loop.
    #[serde(with = "serde_duration")]
    pub poll_interval: Duration,
    /// Timeout for client tool invocations (dump, restore, scripts).
    #[serde(with = "serde_duration")]
    pub command_timeout: Duration,
    /// Attempts made by the start-with-retry orchestrator.
    pub max_start_retries: u32,
    /// Base URL release archives are fetched from.
    pub release_base_url: String,
    /// Port scan range per engine name.
    pub port_ranges: BTreeMap<String, PortRange>,
}

impl Default for Settings {
    fn default() -> Self {
        let mut port_ranges = BTreeMap::new();
        port_ranges.insert("postgresql".to_string(), PortRange::new(5432, 5500));
        Self {
            download_timeout: Duration::from_secs(5 * 60),
            start_timeout: Duration::from_secs(30),
            stop_grace_period: Duration::from_secs(10),
            poll_interval: Duration::from_millis(250),
            command_timeout: Duration::from_secs(5 * 60),
            max_start_retries: 3,
            release_base_url: DEFAULT_RELEASE_BASE_URL.to_string(),
            port_ranges,
        }
    }
}

impl Settings {
    /// Load settings from a YAML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(Error::Config(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let settings: Settings = serde_yaml::from_str(&contents)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.max_start_retries == 0 {
            return Err(Error::Config(
                "max_start_retries must be at least 1".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::Config("poll_interval must be positive".to_string()));
        }
        for (engine, range) in &self.port_ranges {
            if range.start > range.end {
                return Err(Error::Config(format!(
                    "port range for {} is empty ({}-{})",
                    engine, range.start, range.end
                )));
            }
        }
        Ok(())
    }

    /// Scan range for `engine`, falling back to a window above `preferred`.
    pub fn port_range(&self, engine: &str, preferred: u16) -> PortRange {
        self.port_ranges
            .get(engine)
            .copied()
            .unwrap_or_else(|| PortRange::new(preferred, preferred.saturating_add(100)))
    }
}

/// Root directory plus settings. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Context {
    root: PathBuf,
    settings: Settings,
}

impl Context {
    /// Build a context over `root`, reading `config.yaml` if present.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let settings = Settings::load(&root.join(SETTINGS_FILE))?;
        Ok(Self { root, settings })
    }

    pub fn with_settings(root: impl Into<PathBuf>, settings: Settings) -> Self {
        Self {
            root: root.into(),
            settings,
        }
    }

    /// Resolve the root from `DBFLEET_HOME`, else `~/.dbfleet`.
    pub fn from_env() -> Result<Self> {
        let root = match std::env::var_os(HOME_ENV) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => dirs::home_dir()
                .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?
                .join(DEFAULT_DIR_NAME),
        };
        Self::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.root.join("bin")
    }

    pub fn containers_dir(&self) -> PathBuf {
        self.root.join("containers")
    }

    pub fn engine_containers_dir(&self, engine: &str) -> PathBuf {
        self.containers_dir().join(engine)
    }

    pub fn container_dir(&self, engine: &str, name: &str) -> PathBuf {
        self.engine_containers_dir(engine).join(name)
    }

    pub fn registry_dir(&self) -> PathBuf {
        self.root.join("registry")
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Create the top-level directories.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.bin_dir(),
            self.containers_dir(),
            self.registry_dir(),
            self.locks_dir(),
            self.logs_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| {
                Error::Config(format!("Failed to create {}: {}", dir.display(), e))
            })?;
        }
        Ok(())
    }
}
