//! Progress events for long-running operations.
//!
//! Binary acquisition and engine start publish [`ProgressEvent`]s into a
//! bounded channel the caller drains. Reporting never blocks the operation:
//! when the channel is full or closed the event is dropped.

use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc;

/// Default channel capacity for [`Progress::channel`].
pub const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Resolving,
    Downloading,
    Extracting,
    Verifying,
    Cached,
    Installed,
    Initializing,
    Starting,
    Ready,
    Retrying,
    Stopping,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Resolving => "resolving",
            Stage::Downloading => "downloading",
            Stage::Extracting => "extracting",
            Stage::Verifying => "verifying",
            Stage::Cached => "cached",
            Stage::Installed => "installed",
            Stage::Initializing => "initializing",
            Stage::Starting => "starting",
            Stage::Ready => "ready",
            Stage::Retrying => "retrying",
            Stage::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub stage: Stage,
    pub message: String,
}

/// Sending half handed to operations. `Progress::none()` discards events.
#[derive(Debug, Clone, Default)]
pub struct Progress {
    tx: Option<mpsc::Sender<ProgressEvent>>,
}

impl Progress {
    /// A sink that drops every event.
    pub fn none() -> Self {
        Self { tx: None }
    }

    /// Create a bounded channel; the receiver belongs to the caller.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    pub fn report(&self, stage: Stage, message: impl Into<String>) {
        let event = ProgressEvent {
            stage,
            message: message.into(),
        };
        tracing::debug!("[{}] {}", event.stage, event.message);
        if let Some(tx) = &self.tx {
            if let Err(e) = tx.try_send(event) {
                tracing::trace!("Progress event dropped: {}", e);
            }
        }
    }
}
