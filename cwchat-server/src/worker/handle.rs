//! Worker process handle
//!
//! Owns one spawned worker. The child itself lives in a supervisor task that
//! waits for it to exit or for a stop request, so liveness is observed even
//! when nobody is reading from the pipes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bridge::BridgeError;

/// How to launch a worker
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
    /// Time between SIGTERM and SIGKILL on stop
    pub stop_grace: Duration,
}

impl WorkerSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            stop_grace: Duration::from_secs(2),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        cmd
    }
}

/// How a worker ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerExit {
    pub code: Option<i32>,
    pub description: String,
}

impl WorkerExit {
    fn from_wait(result: std::io::Result<ExitStatus>) -> Self {
        match result {
            Ok(status) => Self {
                code: status.code(),
                description: status.to_string(),
            },
            Err(e) => Self {
                code: None,
                description: format!("wait failed: {}", e),
            },
        }
    }
}

impl std::fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.description)
    }
}

/// A running (or finished) worker process
pub struct WorkerHandle {
    program: String,
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    alive: Arc<AtomicBool>,
    exit_rx: watch::Receiver<Option<WorkerExit>>,
    stop_tx: Option<oneshot::Sender<()>>,
    supervisor: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Spawn the worker described by `spec`
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(spec: &WorkerSpec) -> Result<Self, BridgeError> {
        let mut child = spec.command().spawn().map_err(|e| BridgeError::Spawn {
            program: spec.program.clone(),
            reason: e.to_string(),
        })?;

        let missing = |stream: &str| BridgeError::Spawn {
            program: spec.program.clone(),
            reason: format!("{} was not captured", stream),
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        let pid = child.id();
        let alive = Arc::new(AtomicBool::new(true));
        let (exit_tx, exit_rx) = watch::channel(None);
        let (stop_tx, stop_rx) = oneshot::channel();

        let supervisor = tokio::spawn(supervise(
            child,
            stop_rx,
            spec.stop_grace,
            Arc::clone(&alive),
            exit_tx,
        ));

        info!(pid = ?pid, program = %spec.program, args = ?spec.args, "Worker started");

        Ok(Self {
            program: spec.program.clone(),
            pid,
            stdin: Some(stdin),
            stdout: Some(stdout),
            stderr: Some(stderr),
            alive,
            exit_rx,
            stop_tx: Some(stop_tx),
            supervisor: Some(supervisor),
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.stderr.take()
    }

    /// False once the process has exited for any reason
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Receiver that holds `Some(exit)` once the process is gone
    pub fn exited(&self) -> watch::Receiver<Option<WorkerExit>> {
        self.exit_rx.clone()
    }

    /// Terminate the worker and wait for it to be reaped
    ///
    /// No-op on a handle that was already stopped.
    pub async fn stop(&mut self) -> Result<(), BridgeError> {
        // Closing stdin first lets a well-behaved worker exit on EOF
        self.stdin = None;

        if let Some(stop_tx) = self.stop_tx.take() {
            // The supervisor may already be gone if the process exited
            let _ = stop_tx.send(());
        }

        if let Some(supervisor) = self.supervisor.take() {
            supervisor
                .await
                .map_err(|e| BridgeError::worker_failure(format!("supervisor panicked: {}", e)))?;
            debug!(pid = ?self.pid, "Worker stopped");
        }

        self.stdout = None;
        self.stderr = None;
        Ok(())
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("program", &self.program)
            .field("pid", &self.pid)
            .field("alive", &self.is_alive())
            .finish()
    }
}

async fn supervise(
    mut child: Child,
    stop_rx: oneshot::Receiver<()>,
    grace: Duration,
    alive: Arc<AtomicBool>,
    exit_tx: watch::Sender<Option<WorkerExit>>,
) {
    let pid = child.id();

    // A dropped handle resolves stop_rx with an error, which also terminates
    let result = tokio::select! {
        status = child.wait() => status,
        _ = stop_rx => terminate(&mut child, grace).await,
    };

    alive.store(false, Ordering::SeqCst);
    let exit = WorkerExit::from_wait(result);
    match exit.code {
        Some(0) => info!(pid = ?pid, status = %exit, "Worker exited"),
        _ => warn!(pid = ?pid, status = %exit, "Worker exited"),
    }
    let _ = exit_tx.send(Some(exit));
}

async fn terminate(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: pid names our own child, which has not been reaped yet
        // because only this task waits on it.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }

        if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
            return status;
        }
        warn!(pid, grace_ms = grace.as_millis() as u64, "Worker ignored SIGTERM, killing");
    }

    #[cfg(not(unix))]
    let _ = grace;

    child.kill().await?;
    child.wait().await
}
