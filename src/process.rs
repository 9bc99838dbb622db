//! Subprocess execution and PID-based process control.
//!
//! Engine adapters shell out to official server and client binaries. Every
//! invocation goes through [`run_command`], which captures stdout/stderr and
//! kills the child when the timeout elapses.

use crate::error::{validate_pid, validate_pid_for_check, Error, Result};
use nix::sys::signal::{self, killpg, Signal};
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Captured result of a finished subprocess.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Exit code; `None` when terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Exit code with signal termination mapped to -1.
    pub fn code_or_signal(&self) -> i32 {
        self.code.unwrap_or(-1)
    }
}

/// A command line plus its environment. Built fluently:
///
/// ```ignore
/// let out = CommandSpec::new(bin.join("psql"))
///     .args(["-h", "127.0.0.1", "-c", "SELECT 1"])
///     .env("PGCONNECT_TIMEOUT", "5")
///     .run(Duration::from_secs(30))
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct CommandSpec {
    program: PathBuf,
    args: Vec<OsString>,
    env: HashMap<String, String>,
    cwd: Option<PathBuf>,
    stdin: Option<Vec<u8>>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Short display name used in errors (`pg_dump`, not the full path).
    pub fn display_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Run to completion, capturing output. Any exit code is returned as data.
    pub async fn run(self, timeout: Duration) -> Result<CommandOutput> {
        run_command(self, timeout).await
    }

    /// Run and turn a non-zero exit into [`Error::ProcessFailed`].
    pub async fn run_checked(self, timeout: Duration) -> Result<CommandOutput> {
        let name = self.display_name();
        let output = run_command(self, timeout).await?;
        if !output.success() {
            return Err(Error::ProcessFailed {
                command: name,
                code: output.code_or_signal(),
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }
}

/// Spawn `spec`, wait up to `timeout`, and capture its output.
///
/// On timeout the child is killed (`kill_on_drop`) and [`Error::Timeout`] is
/// returned.
pub async fn run_command(spec: CommandSpec, timeout: Duration) -> Result<CommandOutput> {
    let name = spec.display_name();
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(&spec.env)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .kill_on_drop(true);
    if let Some(ref cwd) = spec.cwd {
        cmd.current_dir(cwd);
    }

    tracing::debug!("Running {} {:?}", spec.program.display(), spec.args);

    let mut child = cmd.spawn().map_err(|e| Error::Spawn {
        command: spec.program.display().to_string(),
        reason: e.to_string(),
    })?;

    if let Some(input) = spec.stdin {
        if let Some(mut stdin) = child.stdin.take() {
            // Write from a task so a child that fills its stdout pipe before
            // reading stdin cannot deadlock us.
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&input).await {
                    tracing::debug!("stdin write failed: {}", e);
                }
            });
        }
    }

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }),
        Ok(Err(e)) => Err(Error::Spawn {
            command: name,
            reason: e.to_string(),
        }),
        Err(_) => {
            tracing::warn!("{} exceeded {:?}, killed", name, timeout);
            Err(Error::Timeout(format!("{} after {:?}", name, timeout)))
        }
    }
}

/// Spawn `spec` as a long-lived daemon in its own process group.
///
/// stdout and stderr are appended to `log_path`. The child is not killed when
/// this process exits; tokio reaps it in the background if it dies first.
/// Returns the child's PID.
pub fn spawn_detached(spec: &CommandSpec, log_path: &Path) -> Result<u32> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;
    let log_err = log.try_clone()?;

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .process_group(0);
    if let Some(ref cwd) = spec.cwd {
        cmd.current_dir(cwd);
    }

    tracing::debug!("Spawning daemon {} {:?}", spec.program.display(), spec.args);
    let child = cmd.spawn().map_err(|e| Error::Spawn {
        command: spec.program.display().to_string(),
        reason: e.to_string(),
    })?;
    child.id().ok_or_else(|| Error::Spawn {
        command: spec.display_name(),
        reason: "process exited before its PID could be read".to_string(),
    })
}

/// Whether `pid` refers to a live (non-zombie) process.
pub fn is_pid_alive(pid: u32) -> bool {
    let Some(nix_pid) = validate_pid_for_check(pid) else {
        return false;
    };
    if signal::kill(nix_pid, None).is_err() {
        return false;
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            if let Some(line) = status.lines().find(|l| l.starts_with("State:")) {
                if let Some(state) = line.chars().skip(6).find(|c| c.is_alphabetic()) {
                    return !matches!(state, 'Z' | 'X' | 'x');
                }
            }
        }
    }

    true
}

/// Graceful-then-forceful termination of `pid` and its process group.
///
/// Sends SIGTERM, polls every `poll` until `grace` elapses, then SIGKILL.
/// Returns `true` if the process had to be killed. A PID that is already
/// gone is not an error.
pub async fn terminate(pid: u32, owner: &str, grace: Duration, poll: Duration) -> Result<bool> {
    if !is_pid_alive(pid) {
        return Ok(false);
    }
    let nix_pid = validate_pid(pid, owner)?;
    let pgid = nix::unistd::getpgid(Some(nix_pid)).ok().filter(|g| g.as_raw() > 1);

    let sent = match pgid {
        Some(pgid) if pgid == nix_pid => killpg(pgid, Signal::SIGTERM)
            .or_else(|_| signal::kill(nix_pid, Signal::SIGTERM)),
        _ => signal::kill(nix_pid, Signal::SIGTERM),
    };
    if let Err(e) = sent {
        tracing::debug!("SIGTERM to {} ({}) failed: {}", pid, owner, e);
        return Ok(false);
    }

    if wait_for_exit(pid, grace, poll).await {
        return Ok(false);
    }

    tracing::warn!(
        "{} (PID {}) did not exit within {:?}, sending SIGKILL",
        owner,
        pid,
        grace
    );
    let _ = signal::kill(nix_pid, Signal::SIGKILL);
    wait_for_exit(pid, Duration::from_secs(2), poll).await;
    Ok(true)
}

/// Poll until `pid` is gone or `timeout` elapses. Returns true if it exited.
pub async fn wait_for_exit(pid: u32, timeout: Duration, poll: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if !is_pid_alive(pid) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(poll).await;
    }
}
