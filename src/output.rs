use dbfleet::progress::{ProgressEvent, Stage, DEFAULT_CAPACITY};
use dbfleet::Progress;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Abstraction over user-facing output.
///
/// Command modules use this trait instead of `println!`/`eprintln!` so that
/// commands stay testable and output can be redirected.
pub trait UserOutput: Send + Sync {
    /// Informational status message (e.g., "Stopping devpg...")
    fn status(&self, message: &str);

    /// Success message (e.g., "Container 'devpg' started")
    fn success(&self, message: &str);

    /// Warning message (e.g., "Port 5432 taken, using 5433")
    fn warning(&self, message: &str);

    /// Error message
    fn error(&self, message: &str);

    /// Inline progress (no trailing newline). Call `finish_progress` after.
    fn progress(&self, message: &str);

    /// Finish an inline progress line with a result.
    fn finish_progress(&self, result: &str);

    /// A blank line separator.
    fn blank(&self);
}

/// Standard CLI output: stdout/stderr with ANSI colors.
pub struct CliOutput;

impl UserOutput for CliOutput {
    fn status(&self, message: &str) {
        println!("{}", message);
    }

    fn success(&self, message: &str) {
        println!("\x1b[32m{}\x1b[0m", message);
    }

    fn warning(&self, message: &str) {
        eprintln!("\x1b[33m{}\x1b[0m", message);
    }

    fn error(&self, message: &str) {
        eprintln!("\x1b[31m{}\x1b[0m", message);
    }

    fn progress(&self, message: &str) {
        print!("{}", message);
        std::io::stdout().flush().ok();
    }

    fn finish_progress(&self, result: &str) {
        println!("{}", result);
    }

    fn blank(&self) {
        println!();
    }
}

/// Render one progress event.
pub fn render_event(event: &ProgressEvent, out: &dyn UserOutput) {
    match event.stage {
        Stage::Retrying => out.warning(&format!("  ! {}", event.message)),
        Stage::Cached | Stage::Installed | Stage::Ready => {
            out.status(&format!("  + {}", event.message))
        }
        _ => out.status(&format!("  . {}", event.message)),
    }
}

/// A progress sink whose events are printed by a background task.
///
/// Drop the returned [`Progress`] (and every clone) before awaiting the
/// handle, otherwise the task never sees the channel close.
pub fn progress_printer(out: Arc<dyn UserOutput>) -> (Progress, JoinHandle<()>) {
    let (progress, rx) = Progress::channel(DEFAULT_CAPACITY);
    let handle = tokio::spawn(drain(rx, out));
    (progress, handle)
}

async fn drain(mut rx: mpsc::Receiver<ProgressEvent>, out: Arc<dyn UserOutput>) {
    while let Some(event) = rx.recv().await {
        render_event(&event, out.as_ref());
    }
}

/// Run `f` with a progress sink printed through `out`, waiting for every
/// event to be rendered before returning.
pub async fn with_progress<T, F, Fut>(out: Arc<dyn UserOutput>, f: F) -> T
where
    F: FnOnce(Progress) -> Fut,
    Fut: std::future::Future<Output = T>,
{
    let (progress, printer) = progress_printer(out);
    let result = f(progress).await;
    // The sink was moved into `f` and dropped with it, closing the channel.
    printer.await.ok();
    result
}
