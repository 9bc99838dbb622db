use super::Orchestrator;
use crate::config::Context;
use crate::engine::EngineSet;
use crate::error::Result;
use crate::port::PortAllocator;

/// Builder for constructing an [`Orchestrator`] with a fluent API.
///
/// Everything is optional:
/// - the context defaults to [`Context::from_env`] (`DBFLEET_HOME` or `~/.dbfleet`)
/// - the engine set defaults to the built-in engines for the host platform
/// - the allocator probes 127.0.0.1
///
/// # Example
///
/// ```no_run
/// use dbfleet::{Context, Orchestrator};
///
/// # fn example() -> dbfleet::Result<()> {
/// let orchestrator = Orchestrator::builder()
///     .context(Context::new("/tmp/dbfleet")?)
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct OrchestratorBuilder {
    context: Option<Context>,
    engines: Option<EngineSet>,
    allocator: Option<PortAllocator>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Root directory and settings.
    pub fn context(mut self, ctx: Context) -> Self {
        self.context = Some(ctx);
        self
    }

    /// Replace the engine set, e.g. with engines bound to a test source.
    pub fn engines(mut self, engines: EngineSet) -> Self {
        self.engines = Some(engines);
        self
    }

    pub fn allocator(mut self, allocator: PortAllocator) -> Self {
        self.allocator = Some(allocator);
        self
    }

    /// Build the orchestrator, creating the root directory layout.
    pub fn build(self) -> Result<Orchestrator> {
        let ctx = match self.context {
            Some(ctx) => ctx,
            None => Context::from_env()?,
        };
        let engines = match self.engines {
            Some(engines) => engines,
            None => EngineSet::new(&ctx)?,
        };
        Orchestrator::from_parts(ctx, engines, self.allocator.unwrap_or_default())
    }
}
