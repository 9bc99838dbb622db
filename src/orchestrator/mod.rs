//! Container operations composed from the registry, engines and allocator.

mod builder;
mod core;
mod retry;

pub use builder::OrchestratorBuilder;
pub use core::*;
pub use retry::{
    start_with_retry, PortChangeHook, StartRetry, StartRetryOutcome, DEFAULT_START_ATTEMPTS,
};
