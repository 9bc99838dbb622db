//! Start with port-collision recovery.
//!
//! The allocator can only say a port *was* free. Between that check and the
//! server's own bind another process may take it, so a start that fails with
//! [`crate::Error::PortInUse`] moves to the next free port, persists it and tries
//! again. Every other failure is terminal.

use crate::container::{ContainerConfig, ContainerManager, ContainerUpdate};
use crate::engine::{Engine, StartOutcome};
use crate::error::Result;
use crate::port::{PortAllocator, PortRange};
use crate::progress::{Progress, Stage};
use std::collections::HashSet;

/// Attempts made when the caller does not configure a limit.
pub const DEFAULT_START_ATTEMPTS: u32 = 3;

/// Callback fired with `(old, new)` after a port change has been persisted.
pub type PortChangeHook<'a> = Box<dyn Fn(u16, u16) + Send + Sync + 'a>;

/// Terminal success of [`StartRetry::run`].
#[derive(Debug, Clone)]
pub struct StartRetryOutcome {
    pub outcome: StartOutcome,
    /// Record as persisted after the last port change.
    pub config: ContainerConfig,
    /// Attempts beyond the first.
    pub retries_used: u32,
}

/// Retry state for one start request.
pub struct StartRetry<'a> {
    engine: &'a dyn Engine,
    containers: &'a ContainerManager,
    allocator: &'a PortAllocator,
    range: PortRange,
    max_attempts: u32,
    on_port_change: Option<PortChangeHook<'a>>,
}

impl<'a> StartRetry<'a> {
    /// Retry over the port range configured for the engine.
    pub fn new(
        engine: &'a dyn Engine,
        containers: &'a ContainerManager,
        allocator: &'a PortAllocator,
    ) -> Self {
        let ctx = containers.context();
        let kind = engine.kind();
        Self {
            engine,
            containers,
            allocator,
            range: ctx.settings().port_range(kind.as_str(), kind.default_port()),
            max_attempts: ctx.settings().max_start_retries,
            on_port_change: None,
        }
    }

    pub fn range(mut self, range: PortRange) -> Self {
        self.range = range;
        self
    }

    /// Total `start` calls allowed, first attempt included. Clamped to 1.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn on_port_change(mut self, hook: impl Fn(u16, u16) + Send + Sync + 'a) -> Self {
        self.on_port_change = Some(Box::new(hook));
        self
    }

    pub async fn run(self, config: ContainerConfig, progress: &Progress) -> Result<StartRetryOutcome> {
        let attempts = self.max_attempts.max(1);
        let mut config = config;
        let mut failed_ports = HashSet::new();
        let mut attempt = 1;

        loop {
            let err = match self.engine.start(&config, progress).await {
                Ok(outcome) => {
                    return Ok(StartRetryOutcome {
                        outcome,
                        config,
                        retries_used: attempt - 1,
                    });
                }
                Err(e) => e,
            };

            if !err.is_port_in_use() || config.port == 0 {
                return Err(err);
            }
            if attempt >= attempts {
                tracing::warn!(
                    "Giving up on '{}' after {} attempt(s): {}",
                    config.name,
                    attempt,
                    err
                );
                return Err(err);
            }

            let old = config.port;
            failed_ports.insert(old);
            let mut excluded = self.containers.running_ports()?;
            excluded.extend(failed_ports.iter().copied());
            let next = self
                .allocator
                .find_available_excluding(old, self.range, &excluded)?
                .port;

            config = self
                .containers
                .update_config(&config.name, config.engine, ContainerUpdate::port(next))?;
            tracing::info!(
                "Port {} taken while starting '{}', retrying on {}",
                old,
                config.name,
                next
            );
            progress.report(
                Stage::Retrying,
                format!("port {} in use, retrying on {}", old, next),
            );
            if let Some(hook) = &self.on_port_change {
                hook(old, next);
            }
            attempt += 1;
        }
    }
}

/// [`StartRetry`] with the engine's configured range and no hook.
pub async fn start_with_retry(
    engine: &dyn Engine,
    config: ContainerConfig,
    containers: &ContainerManager,
    allocator: &PortAllocator,
    max_attempts: u32,
    progress: &Progress,
) -> Result<StartRetryOutcome> {
    StartRetry::new(engine, containers, allocator)
        .max_attempts(max_attempts)
        .run(config, progress)
        .await
}
