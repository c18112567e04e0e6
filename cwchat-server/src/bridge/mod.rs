//! Process bridge
//!
//! Brokers JSON-RPC requests to a worker subprocess over its stdin/stdout.
//! The worker is started lazily, responses are matched to callers by id,
//! and a worker that fails (or stops answering) is discarded so the next
//! request gets a fresh one.
//!
//! Each worker incarnation is a *session* with its own generation number and
//! four tasks: a writer owning stdin, a reader owning stdout, a diagnostic
//! drain for stderr, and an exit watcher. Any of the first, second or fourth
//! noticing a failure marks the session dead and rejects its pending calls.

mod error;
mod pending;


pub use error::BridgeError;
pub use pending::{CallOutcome, PendingCalls};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cwchat_protocol::{BridgeCodec, Framing, JsonRpcRequest, JsonRpcResponse};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, warn};

use crate::worker::{drain_diagnostics, DiagnosticTail, WorkerExit, WorkerHandle, WorkerSpec};

/// Requests buffered between callers and the writer task
const OUTGOING_QUEUE: usize = 64;

/// Bridge settings
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub worker: WorkerSpec,
    pub framing: Framing,
    pub request_timeout: Duration,
    pub restart_on_timeout: bool,
    pub max_in_flight: usize,
}

impl BridgeConfig {
    pub fn new(worker: WorkerSpec) -> Self {
        Self {
            worker,
            framing: Framing::Lines,
            request_timeout: Duration::from_secs(10),
            restart_on_timeout: true,
            max_in_flight: 32,
        }
    }

    /// Concurrency actually allowed for the configured framing
    pub fn effective_in_flight(&self) -> usize {
        if self.framing.supports_pipelining() {
            self.max_in_flight.max(1)
        } else {
            1
        }
    }
}

/// One worker incarnation and the tasks serving it
struct WorkerSession {
    generation: u64,
    handle: WorkerHandle,
    outgoing: mpsc::Sender<JsonRpcRequest>,
    failed: Arc<AtomicBool>,
    diagnostics: Arc<DiagnosticTail>,
    tasks: Vec<JoinHandle<()>>,
}

/// What a caller needs to submit one request to a session
type SessionTicket = (u64, mpsc::Sender<JsonRpcRequest>, Arc<AtomicBool>);

impl WorkerSession {
    fn is_usable(&self) -> bool {
        self.handle.is_alive() && !self.failed.load(Ordering::SeqCst)
    }

    fn ticket(&self) -> SessionTicket {
        (self.generation, self.outgoing.clone(), Arc::clone(&self.failed))
    }
}

/// Shared state the session tasks report into
#[derive(Clone)]
struct SessionContext {
    generation: u64,
    pending: Arc<PendingCalls>,
    failed: Arc<AtomicBool>,
    diagnostics: Arc<DiagnosticTail>,
}

impl SessionContext {
    /// Mark the session dead and reject everything it owes
    fn fail(&self, reason: &str) {
        let first = !self.failed.swap(true, Ordering::SeqCst);
        let reason = match self.diagnostics.last() {
            Some(line) => format!("{} (last worker output: {})", reason, line),
            None => reason.to_string(),
        };
        let count = self.pending.fail_generation(self.generation, &reason);
        if first {
            warn!(generation = self.generation, failed_calls = count, %reason, "Worker session failed");
        }
    }
}

/// Bridge between callers and a worker subprocess
pub struct ProcessBridge {
    config: BridgeConfig,
    session: Mutex<Option<WorkerSession>>,
    pending: Arc<PendingCalls>,
    permits: Semaphore,
    next_id: AtomicU64,
    generation: AtomicU64,
}

impl ProcessBridge {
    /// Create a bridge; no worker is started until needed
    pub fn new(config: BridgeConfig) -> Self {
        let permits = Semaphore::new(config.effective_in_flight());
        Self {
            config,
            session: Mutex::new(None),
            pending: Arc::new(PendingCalls::new()),
            permits,
            next_id: AtomicU64::new(1),
            generation: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Number of workers started so far
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Number of calls awaiting a response
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Send one request and wait for its response
    pub async fn send(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<JsonRpcResponse, BridgeError> {
        let started = Instant::now();
        let deadline = started + self.config.request_timeout;

        // Queueing for a permit and spawning the worker count against the deadline
        let admitted = tokio::time::timeout_at(deadline, async {
            let permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| BridgeError::worker_failure("bridge is shut down"))?;
            let session = self.ensure_worker().await?;
            Ok::<_, BridgeError>((permit, session))
        })
        .await;

        let (_permit, (generation, outgoing, failed)) = match admitted {
            Ok(admitted) => admitted?,
            Err(_) => {
                warn!(
                    method,
                    timeout_ms = self.config.request_timeout.as_millis() as u64,
                    "Request timed out before reaching the worker"
                );
                return Err(self.timeout_error(method));
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let rx = self.pending.register(id, method, generation, deadline);

        // A session that failed after being handed out has already swept its calls
        if failed.load(Ordering::SeqCst) {
            self.pending.remove(id);
            return Err(BridgeError::worker_failure("worker is no longer running"));
        }

        debug!(req_id = id, method, generation, "Sending request to worker");

        if outgoing
            .send(JsonRpcRequest::new(id, method, params))
            .await
            .is_err()
        {
            self.pending.remove(id);
            return Err(BridgeError::worker_failure("worker input is closed"));
        }

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(outcome)) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                match &outcome {
                    Ok(response) if response.is_error() => {
                        debug!(req_id = id, method, elapsed_ms, "Worker returned an error response")
                    }
                    Ok(_) => debug!(req_id = id, method, elapsed_ms, "Worker responded"),
                    Err(e) => warn!(req_id = id, method, elapsed_ms, error = %e, "Request failed"),
                }
                outcome
            }
            Ok(Err(_)) => Err(BridgeError::worker_failure("pending call was dropped")),
            Err(_) => {
                // A response racing the deadline finds no entry and is dropped
                self.pending.remove(id);
                warn!(
                    req_id = id,
                    method,
                    generation,
                    timeout_ms = self.config.request_timeout.as_millis() as u64,
                    "Request timed out"
                );
                if self.config.restart_on_timeout {
                    self.recycle(generation, "request timed out").await;
                }
                Err(self.timeout_error(method))
            }
        }
    }

    fn timeout_error(&self, method: &str) -> BridgeError {
        BridgeError::Timeout {
            method: method.to_string(),
            timeout: self.config.request_timeout,
        }
    }

    /// Forward a caller-built request, restoring the caller's id on the response
    pub async fn execute(&self, raw: serde_json::Value) -> Result<serde_json::Value, BridgeError> {
        let call: RawCall = serde_json::from_value(raw)
            .map_err(|e| BridgeError::protocol(format!("invalid request: {}", e)))?;

        let mut response = self.send(&call.method, call.params).await?;
        response.id = call.id;

        serde_json::to_value(&response).map_err(|e| BridgeError::protocol(e.to_string()))
    }

    /// Start a worker now unless one is already running
    pub async fn start(&self) -> Result<(), BridgeError> {
        self.ensure_worker().await.map(|_| ())
    }

    /// Replace the current worker with a fresh one
    pub async fn restart(&self) -> Result<(), BridgeError> {
        let mut session = self.session.lock().await;
        if let Some(old) = session.take() {
            self.retire(old, "worker restarted").await;
        }
        *session = Some(self.spawn_session()?);
        Ok(())
    }

    /// Stop the worker; safe to call repeatedly
    pub async fn stop(&self) -> Result<(), BridgeError> {
        let mut session = self.session.lock().await;
        match session.take() {
            Some(old) => {
                info!(generation = old.generation, "Stopping worker");
                self.retire(old, "bridge stopped").await;
            }
            None => debug!("Stop requested with no running worker"),
        }

        // Calls left on earlier generations have nothing to answer them either
        let orphaned = self.pending.fail_all("bridge stopped");
        if orphaned > 0 {
            debug!(orphaned, "Failed calls left from earlier workers");
        }
        Ok(())
    }

    /// Whether a usable worker is running
    pub async fn is_alive(&self) -> bool {
        self.session
            .lock()
            .await
            .as_ref()
            .map(WorkerSession::is_usable)
            .unwrap_or(false)
    }

    /// Recent stderr lines of the current worker
    pub async fn diagnostics(&self) -> Vec<String> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| s.diagnostics.snapshot())
            .unwrap_or_default()
    }

    /// Current usable session, spawning one if needed
    async fn ensure_worker(&self) -> Result<SessionTicket, BridgeError> {
        let mut session = self.session.lock().await;

        if let Some(current) = session.as_ref() {
            if current.is_usable() {
                return Ok(current.ticket());
            }
        }

        if let Some(dead) = session.take() {
            debug!(generation = dead.generation, "Discarding dead worker");
            self.retire(dead, "worker is no longer running").await;
        }

        let fresh = self.spawn_session()?;
        let ready = fresh.ticket();
        *session = Some(fresh);
        Ok(ready)
    }

    /// Stop the session's worker only if it is still the current one
    async fn recycle(&self, generation: u64, reason: &str) {
        let mut session = self.session.lock().await;
        if session.as_ref().map(|s| s.generation) == Some(generation) {
            if let Some(old) = session.take() {
                info!(generation, %reason, "Recycling worker");
                self.retire(old, reason).await;
            }
        }
    }

    async fn retire(&self, mut session: WorkerSession, reason: &str) {
        session.failed.store(true, Ordering::SeqCst);
        if let Err(e) = session.handle.stop().await {
            error!(generation = session.generation, error = %e, "Failed to stop worker");
        }
        for task in session.tasks.drain(..) {
            task.abort();
        }
        self.pending.fail_generation(session.generation, reason);
    }

    fn spawn_session(&self) -> Result<WorkerSession, BridgeError> {
        let mut handle = WorkerHandle::start(&self.config.worker)?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let missing = |stream: &str| {
            BridgeError::worker_failure(format!("worker {} was already taken", stream))
        };
        let stdin = handle.take_stdin().ok_or_else(|| missing("stdin"))?;
        let stdout = handle.take_stdout().ok_or_else(|| missing("stdout"))?;
        let stderr = handle.take_stderr().ok_or_else(|| missing("stderr"))?;

        let ctx = SessionContext {
            generation,
            pending: Arc::clone(&self.pending),
            failed: Arc::new(AtomicBool::new(false)),
            diagnostics: Arc::new(DiagnosticTail::default()),
        };

        let (outgoing, outgoing_rx) = mpsc::channel(OUTGOING_QUEUE);
        let framing = self.config.framing;

        let tasks = vec![
            tokio::spawn(write_requests(stdin, framing, outgoing_rx, ctx.clone())),
            tokio::spawn(read_responses(stdout, framing, ctx.clone())),
            tokio::spawn(drain_diagnostics(
                stderr,
                generation,
                Arc::clone(&ctx.diagnostics),
            )),
            tokio::spawn(watch_exit(handle.exited(), ctx.clone())),
        ];

        info!(generation, pid = ?handle.pid(), ?framing, "Worker session started");

        Ok(WorkerSession {
            generation,
            handle,
            outgoing,
            failed: ctx.failed,
            diagnostics: ctx.diagnostics,
            tasks,
        })
    }
}

/// Caller-supplied request for [`ProcessBridge::execute`]
#[derive(Debug, Deserialize)]
struct RawCall {
    #[serde(default)]
    id: serde_json::Value,
    method: String,
    #[serde(default)]
    params: serde_json::Value,
}

async fn write_requests(
    stdin: ChildStdin,
    framing: Framing,
    mut rx: mpsc::Receiver<JsonRpcRequest>,
    ctx: SessionContext,
) {
    let mut sink = FramedWrite::new(stdin, BridgeCodec::new(framing));
    while let Some(request) = rx.recv().await {
        let id = request.id.clone();
        if let Err(e) = sink.send(request).await {
            error!(generation = ctx.generation, jsonrpc_id = %id, error = %e, "Failed to write to worker");
            ctx.fail(&format!("failed to write to worker: {}", e));
            return;
        }
    }
    debug!(generation = ctx.generation, "Worker writer finished");
}

async fn read_responses(stdout: ChildStdout, framing: Framing, ctx: SessionContext) {
    let mut stream = FramedRead::new(stdout, BridgeCodec::new(framing));
    loop {
        match stream.next().await {
            Some(Ok(response)) => {
                ctx.pending.resolve(response);
            }
            Some(Err(e)) => {
                error!(generation = ctx.generation, error = %e, "Failed to read from worker");
                ctx.fail(&format!("failed to read from worker: {}", e));
                return;
            }
            None => {
                ctx.fail("worker closed its output");
                return;
            }
        }
    }
}

async fn watch_exit(mut exited: watch::Receiver<Option<WorkerExit>>, ctx: SessionContext) {
    let exit = match exited.wait_for(Option::is_some).await {
        Ok(exit) => exit.clone(),
        Err(_) => None,
    };
    let reason = match exit {
        Some(exit) => format!("worker exited ({})", exit),
        None => "worker exited".to_string(),
    };
    ctx.fail(&reason);
}

/// Lets the command router run tools through the bridge
impl crate::router::ToolExecutor for ProcessBridge {
    async fn call(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<JsonRpcResponse, BridgeError> {
        self.send(method, params).await
    }

    async fn execute(&self, request: serde_json::Value) -> Result<serde_json::Value, BridgeError> {
        ProcessBridge::execute(self, request).await
    }
}
