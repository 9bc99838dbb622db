//! # dbfleet
//!
//! Local database container manager for development environments.
//!
//! ## Features
//!
//! - **Binary acquisition**: download, extract, verify and cache engine binaries
//!   per `(engine, version, platform)`, with per-key install locking
//! - **Pluggable engines**: every database technology implements one [`Engine`]
//!   trait; PostgreSQL (server) and SQLite (file-based) ship built in
//! - **Port allocation**: preferred port first, then the lowest free port in a
//!   range, never one held by a running managed container
//! - **Start with retry**: a start that loses its port to another process moves
//!   to a fresh port and tries again
//! - **Backup and restore**: backup artifacts are classified from their shape
//!   and header and routed to the right restore tool
//!
//! ## Quick Start
//!
//! ```no_run
//! use dbfleet::{Context, CreateRequest, EngineKind, Orchestrator, Progress};
//!
//! # async fn example() -> dbfleet::Result<()> {
//! let orchestrator = Orchestrator::builder()
//!     .context(Context::from_env()?)
//!     .build()?;
//! let progress = Progress::none();
//!
//! orchestrator
//!     .create("devpg", CreateRequest::new(EngineKind::Postgresql).version("16"), &progress)
//!     .await?;
//! let started = orchestrator.start("devpg", None, &progress).await?;
//! println!("{}", started.outcome.connection_string);
//!
//! orchestrator.stop("devpg", None).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## State
//!
//! Everything lives under one root (`DBFLEET_HOME`, default `~/.dbfleet`):
//! `bin/` for installed binaries, `containers/<engine>/<name>/` for records and
//! data, `registry/` for file-based bindings, `locks/` for advisory locks.
//! Record writes are temp-then-rename under an exclusive file lock.

pub mod backup;
pub mod binary;
pub mod config;
pub mod container;
pub mod engine;
pub mod error;
pub mod fsutil;
pub mod orchestrator;
pub mod platform;
pub mod port;
pub mod process;
pub mod progress;
pub mod registry;

// Re-export commonly used types
pub use backup::{detect_format, BackupFormat, FormatKind, RestoreOptions, RestoreResult};
pub use binary::{BinaryManager, BinarySource, InstalledBinary};
pub use config::{Context, Settings};
pub use container::{ContainerConfig, ContainerManager, ContainerStatus};
pub use engine::{Engine, EngineKind, EngineSet};
pub use error::{Error, ErrorKind, Result};
pub use orchestrator::{CreateRequest, Orchestrator, StartRetry, StartRetryOutcome};
pub use platform::Platform;
pub use port::{PortAllocation, PortAllocator, PortRange};
pub use progress::{Progress, ProgressEvent, Stage};
pub use registry::{FileRegistry, RegistryEntry};
