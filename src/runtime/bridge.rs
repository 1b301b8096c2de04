//! Runtime bridge owning one JS services subprocess.
//!
//! The bridge owns the full lifecycle of exactly one child process and one
//! JSON-RPC session over its stdio: spawn, readiness handshake, request
//! correlation, notification dispatch and teardown.
//!
//! # Architecture
//!
//! Three tasks cooperate around a bridge instance: callers issuing `call`,
//! the background stdout reader, and the manager's health check. Callers and
//! the reader communicate only through oneshot completion handles keyed by
//! correlation id; lifecycle transitions (`start`/`stop`) are serialized by
//! a dedicated mutex and never run concurrently.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;

use crate::error::{BridgeError, BridgeResult, LockResultExt};
use crate::runtime::discovery;
use crate::runtime::protocol::{Protocol, READY_ID, Request, Response, RpcError, methods};

const TARGET: &str = "haven::runtime::bridge";

/// Grace period for the child to exit after SIGTERM before escalating.
const TERMINATE_GRACE: Duration = Duration::from_secs(5);
/// Bound on the best-effort shutdown notification during stop().
const SHUTDOWN_NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);
/// Deadline for the ping and getStatus convenience calls.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// State of the JS runtime subprocess.
///
/// Owned exclusively by the bridge; the manager only reads it. Legal
/// transitions: `NotStarted → Starting → Ready → (Error | ShuttingDown) →
/// Stopped`, plus `Stopped → Starting` on restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeState {
    NotStarted,
    Starting,
    Ready,
    Error,
    ShuttingDown,
    Stopped,
}

impl std::fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RuntimeState::NotStarted => "not started",
            RuntimeState::Starting => "starting",
            RuntimeState::Ready => "ready",
            RuntimeState::Error => "error",
            RuntimeState::ShuttingDown => "shutting down",
            RuntimeState::Stopped => "stopped",
        };
        write!(f, "{name}")
    }
}

/// Configuration for one bridge instance.
///
/// Supplied once at construction; the manager rejects reconfiguration while
/// the underlying process is running.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Path to the JS services directory (entry point is `main.ts` within)
    pub services_path: Option<PathBuf>,
    /// Explicit runtime executable; discovery runs when absent
    pub runtime_executable: Option<PathBuf>,
    /// Timeout for the readiness handshake
    pub startup_timeout: Duration,
    /// Default per-request timeout
    pub request_timeout: Duration,
    /// Environment forwarded to the subprocess; empty means inherit
    pub env_vars: HashMap<String, String>,
    /// Enable debug mode in the JS runtime
    pub debug: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            services_path: None,
            runtime_executable: None,
            startup_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
            env_vars: HashMap::new(),
            debug: false,
        }
    }
}

/// Status information reported by [`RuntimeBridge::get_status`]
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStatus {
    pub state: RuntimeState,
    pub version: Option<String>,
    pub uptime_seconds: f64,
    pub pending_requests: usize,
    pub lit_connected: bool,
    pub synapse_connected: bool,
    pub error_message: Option<String>,
}

impl RuntimeStatus {
    fn offline(state: RuntimeState, error_message: Option<String>) -> Self {
        Self {
            state,
            version: None,
            uptime_seconds: 0.0,
            pending_requests: 0,
            lit_connected: false,
            synapse_connected: false,
            error_message,
        }
    }
}

/// Token returned by [`RuntimeBridge::on_notification`] for unregistration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerId(u64);

/// Completion handle for a request awaiting its response
type PendingSender = oneshot::Sender<BridgeResult<Response>>;
/// Registered callback for notifications pushed by the runtime
type NotificationHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Child process handles; owned by the lifecycle mutex
#[derive(Default)]
struct ProcessHandles {
    child: Option<Child>,
    reader: Option<JoinHandle<()>>,
}

/// Bridge to the JavaScript runtime subprocess.
///
/// Manages lifecycle and communication with a child process that provides
/// browser SDK functionality (Lit Protocol, Synapse, Arkiv).
pub struct RuntimeBridge {
    config: RuntimeConfig,
    /// Message-level pending bookkeeping
    protocol: Protocol,
    /// Lifecycle state; std RwLock for fast synchronous reads
    state: RwLock<RuntimeState>,
    error_message: RwLock<Option<String>>,
    /// Process-level completion handles: correlation id -> response sender
    pending: DashMap<String, PendingSender>,
    /// Stdin for outbound writes (mutex serializes writers)
    stdin: Mutex<Option<ChildStdin>>,
    /// Serializes start/stop; no two lifecycle transitions run concurrently
    lifecycle: Mutex<ProcessHandles>,
    /// Notification handlers: method -> registered callbacks
    handlers: DashMap<String, Vec<(u64, NotificationHandler)>>,
    next_handler_id: AtomicU64,
}

impl std::fmt::Debug for RuntimeBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeBridge")
            .field("state", &self.state())
            .field("pending_requests", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl RuntimeBridge {
    /// Create a bridge in the `NotStarted` state. No process is spawned.
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            protocol: Protocol::new(),
            state: RwLock::new(RuntimeState::NotStarted),
            error_message: RwLock::new(None),
            pending: DashMap::new(),
            stdin: Mutex::new(None),
            lifecycle: Mutex::new(ProcessHandles::default()),
            handlers: DashMap::new(),
            next_handler_id: AtomicU64::new(1),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> RuntimeState {
        *self.state.read().recover_poison("RuntimeBridge::state")
    }

    /// Whether the runtime accepts calls
    pub fn is_ready(&self) -> bool {
        self.state() == RuntimeState::Ready
    }

    /// Last startup or transport error, if any
    pub fn error_message(&self) -> Option<String> {
        self.error_message
            .read()
            .recover_poison("RuntimeBridge::error_message")
            .clone()
    }

    /// Number of requests currently awaiting a response
    pub fn pending_request_count(&self) -> usize {
        self.pending.len()
    }

    /// The configuration this bridge was built with
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    fn set_state(&self, state: RuntimeState) {
        let mut guard = self.state.write().recover_poison("RuntimeBridge::set_state");
        log::debug!(target: TARGET, "state {} -> {}", *guard, state);
        *guard = state;
    }

    fn set_error_message(&self, message: Option<String>) {
        *self
            .error_message
            .write()
            .recover_poison("RuntimeBridge::set_error_message") = message;
    }

    /// Start the JS runtime subprocess.
    ///
    /// Only legal from `NotStarted` or `Stopped`. Spawns the child (running
    /// discovery unless an executable override is configured), launches the
    /// stdout reader task, then waits for the readiness signal bounded by
    /// the configured startup timeout.
    pub async fn start(self: &Arc<Self>) -> BridgeResult<()> {
        let mut process = self.lifecycle.lock().await;

        let state = self.state();
        if !matches!(state, RuntimeState::NotStarted | RuntimeState::Stopped) {
            return Err(BridgeError::InvalidState { state });
        }
        self.set_state(RuntimeState::Starting);
        self.set_error_message(None);

        let (ready_tx, ready_rx) = oneshot::channel();
        if let Err(e) = self.spawn_process(&mut process, ready_tx).await {
            self.set_state(RuntimeState::Error);
            self.set_error_message(Some(e.to_string()));
            self.teardown(&mut process).await;
            return Err(e);
        }

        match tokio::time::timeout(self.config.startup_timeout, ready_rx).await {
            Ok(Ok(())) => {
                self.set_state(RuntimeState::Ready);
                log::info!(target: TARGET, "JS runtime started");
                Ok(())
            }
            Ok(Err(_)) => {
                // The reader dropped the ready sender: the child exited
                // before signalling readiness.
                let message = "runtime exited before signalling readiness";
                self.set_state(RuntimeState::Error);
                self.set_error_message(Some(message.to_string()));
                self.teardown(&mut process).await;
                Err(BridgeError::startup(message))
            }
            Err(_) => {
                self.set_state(RuntimeState::Error);
                self.set_error_message(Some("startup timeout".to_string()));
                self.teardown(&mut process).await;
                Err(BridgeError::StartupTimeout {
                    timeout_secs: self.config.startup_timeout.as_secs(),
                })
            }
        }
    }

    /// Call a method on the JS runtime and await the matching response.
    ///
    /// The side effect of every call is exactly one line written to the
    /// child's input stream. On timeout the pending entry is cancelled and a
    /// timeout error is raised; the child-side computation is not otherwise
    /// interrupted, and a single timeout does not mark the bridge unhealthy.
    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> BridgeResult<Value> {
        let state = self.state();
        if state != RuntimeState::Ready {
            return Err(BridgeError::NotReady { state });
        }

        let request = self.protocol.create_request(method, params, false);
        let id = request
            .id
            .clone()
            .ok_or_else(|| RpcError::internal_error("request created without id"))?;
        let timeout = timeout.unwrap_or(self.config.request_timeout);

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.clone(), tx);

        if let Err(e) = self.write_line(&request).await {
            self.pending.remove(&id);
            self.protocol.cancel_request(&id);
            return Err(e);
        }
        log::debug!(target: TARGET, "sent request id={} method={}", id, method);

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(delivered)) => delivered?.into_result().map_err(BridgeError::from),
            // Sender dropped without a response: the bridge tore down.
            Ok(Err(_)) => Err(BridgeError::Stopped),
            Err(_) => {
                self.pending.remove(&id);
                self.protocol.cancel_request(&id);
                Err(BridgeError::from(RpcError::timeout(timeout.as_secs_f64())))
            }
        }
    }

    /// Send a notification to the JS runtime (no response expected)
    pub async fn notify(&self, method: &str, params: Option<Value>) -> BridgeResult<()> {
        let state = self.state();
        if state != RuntimeState::Ready {
            return Err(BridgeError::NotReady { state });
        }
        let request = self.protocol.create_request(method, params, true);
        self.write_line(&request).await
    }

    /// Register a handler for notifications pushed by the runtime.
    ///
    /// Multiple handlers may be registered for one method; each receives the
    /// notification params.
    pub fn on_notification(
        &self,
        method: impl Into<String>,
        handler: impl Fn(Value) + Send + Sync + 'static,
    ) -> HandlerId {
        let id = self.next_handler_id.fetch_add(1, Ordering::Relaxed);
        let handler: NotificationHandler = Arc::new(handler);
        self.handlers
            .entry(method.into())
            .or_default()
            .push((id, handler));
        HandlerId(id)
    }

    /// Unregister a notification handler. Returns false if it was not found.
    pub fn remove_notification_handler(&self, method: &str, id: HandlerId) -> bool {
        let Some(mut handlers) = self.handlers.get_mut(method) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id.0);
        before != handlers.len()
    }

    /// Ping the runtime, collapsing any failure to `false`
    pub async fn ping(&self) -> bool {
        match self.call(methods::PING, None, Some(PROBE_TIMEOUT)).await {
            Ok(value) => value.as_str() == Some("pong"),
            Err(_) => false,
        }
    }

    /// Query the runtime's status, degrading to local state on failure
    pub async fn get_status(&self) -> RuntimeStatus {
        let state = self.state();
        if state != RuntimeState::Ready {
            return RuntimeStatus::offline(state, self.error_message());
        }

        match self.call(methods::GET_STATUS, None, Some(PROBE_TIMEOUT)).await {
            Ok(result) => RuntimeStatus {
                state: self.state(),
                version: result
                    .get("version")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                uptime_seconds: result
                    .get("uptimeSeconds")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0),
                pending_requests: self.pending_request_count(),
                lit_connected: result
                    .get("litConnected")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                synapse_connected: result
                    .get("synapseConnected")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                error_message: None,
            },
            Err(e) => RuntimeStatus {
                pending_requests: self.pending_request_count(),
                ..RuntimeStatus::offline(self.state(), Some(e.to_string()))
            },
        }
    }

    /// Stop the JS runtime subprocess gracefully.
    ///
    /// Idempotent no-op from `NotStarted`/`Stopped`. Teardown is best-effort
    /// throughout: every still-pending call resolves with a terminal error,
    /// and the state always ends `Stopped`.
    pub async fn stop(&self) {
        let mut process = self.lifecycle.lock().await;
        if matches!(
            self.state(),
            RuntimeState::NotStarted | RuntimeState::Stopped
        ) {
            return;
        }
        self.set_state(RuntimeState::ShuttingDown);

        // Ask the runtime to exit on its own before signalling it.
        if process.child.is_some() {
            let shutdown = self.protocol.create_request(methods::SHUTDOWN, None, true);
            match tokio::time::timeout(SHUTDOWN_NOTIFY_TIMEOUT, self.write_line(&shutdown)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::debug!(target: TARGET, "shutdown notification failed: {}", e),
                Err(_) => log::debug!(target: TARGET, "shutdown notification timed out"),
            }
        }

        self.teardown(&mut process).await;
        self.set_state(RuntimeState::Stopped);
        log::info!(target: TARGET, "JS runtime stopped");
    }

    /// Spawn the subprocess and its reader task.
    async fn spawn_process(
        self: &Arc<Self>,
        process: &mut ProcessHandles,
        ready_tx: oneshot::Sender<()>,
    ) -> BridgeResult<()> {
        let executable = match &self.config.runtime_executable {
            Some(executable) => executable.clone(),
            None => discovery::discover_runtime(None).await?.executable,
        };

        let services_path = self
            .config
            .services_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("js-services"));
        let entry_point = services_path.join("main.ts");

        let argv = discovery::runtime_args(&executable, &entry_point, self.config.debug);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| BridgeError::startup("empty runtime argv"))?;

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            // Stderr is not part of the protocol; the surrounding daemon
            // redirects it when log capture is wanted.
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if !self.config.env_vars.is_empty() {
            command.env_clear().envs(&self.config.env_vars);
        }
        if self.config.debug {
            command.env("DEBUG", "1");
        }

        log::debug!(target: TARGET, "starting JS runtime: {}", argv.join(" "));

        let mut child = command
            .spawn()
            .map_err(|e| BridgeError::startup(format!("failed to spawn {program}: {e}")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::startup("child stdout not captured"))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::startup("child stdin not captured"))?;

        *self.stdin.lock().await = Some(stdin);
        process.child = Some(child);
        process.reader = Some(tokio::spawn(Self::read_loop(
            Arc::clone(self),
            stdout,
            ready_tx,
        )));
        Ok(())
    }

    /// Background task reading newline-delimited messages from the child.
    async fn read_loop(bridge: Arc<RuntimeBridge>, stdout: ChildStdout, ready_tx: oneshot::Sender<()>) {
        let mut ready_tx = Some(ready_tx);
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => bridge.handle_line(line.trim(), &mut ready_tx),
                Ok(None) => {
                    log::debug!(target: TARGET, "[reader] output stream closed");
                    break;
                }
                Err(e) => {
                    log::warn!(target: TARGET, "[reader] read error: {}", e);
                    break;
                }
            }
        }
        bridge.on_stream_closed();
    }

    /// Classify and dispatch one line from the child's output stream.
    fn handle_line(&self, line: &str, ready_tx: &mut Option<oneshot::Sender<()>>) {
        if line.is_empty() {
            return;
        }

        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(_) => {
                // Not a protocol message; the runtime logs to stdout too.
                log::debug!(target: TARGET, "runtime: {}", line);
                return;
            }
        };

        let is_response = value.get("id").is_some()
            && (value.get("result").is_some() || value.get("error").is_some());

        if is_response {
            match value.get("id").and_then(Value::as_str) {
                Some(READY_ID) => Self::signal_ready(ready_tx),
                Some(id) => match Response::from_value(&value) {
                    Some(response) => {
                        self.protocol.match_response(&response);
                        if let Some((_, tx)) = self.pending.remove(id) {
                            let _ = tx.send(Ok(response));
                        } else {
                            log::debug!(
                                target: TARGET,
                                "[reader] discarding response for unknown id {}",
                                id
                            );
                        }
                    }
                    None => log::debug!(target: TARGET, "[reader] discarding malformed response"),
                },
                None => {
                    log::debug!(target: TARGET, "[reader] discarding response with non-string id")
                }
            }
        } else if let Some(method) = value.get("method").and_then(Value::as_str) {
            if method == methods::READY {
                Self::signal_ready(ready_tx);
                return;
            }
            let params = value.get("params").cloned().unwrap_or(Value::Null);
            self.dispatch_notification(method, params);
        } else {
            log::debug!(target: TARGET, "[reader] ignoring message without id or method");
        }
    }

    fn signal_ready(ready_tx: &mut Option<oneshot::Sender<()>>) {
        if let Some(tx) = ready_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Invoke every handler registered for a notification method.
    ///
    /// Handler panics are caught and logged; they must never kill the
    /// reader task.
    fn dispatch_notification(&self, method: &str, params: Value) {
        let handlers: Vec<NotificationHandler> = self
            .handlers
            .get(method)
            .map(|entry| entry.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        for handler in handlers {
            let params = params.clone();
            if std::panic::catch_unwind(AssertUnwindSafe(|| handler(params))).is_err() {
                log::error!(
                    target: TARGET,
                    "notification handler for '{}' panicked",
                    method
                );
            }
        }
    }

    /// Reader observed EOF or a read error on the child's output stream.
    fn on_stream_closed(&self) {
        let state = self.state();
        if matches!(state, RuntimeState::Starting | RuntimeState::Ready) {
            self.set_state(RuntimeState::Error);
            self.set_error_message(Some("runtime process closed its output stream".to_string()));
        }
        // Resolve in-flight calls now rather than letting them ride out
        // their full deadlines against a dead process.
        self.drain_pending(|| BridgeError::transport("runtime stream closed"));
        self.protocol.clear_pending();
    }

    /// Serialize a message and write it as one line to the child's stdin.
    async fn write_line(&self, request: &Request) -> BridgeResult<()> {
        let line = request.to_line()?;
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(BridgeError::Stopped)?;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| BridgeError::transport(format!("stdin write failed: {e}")))?;
        stdin
            .write_all(b"\n")
            .await
            .map_err(|e| BridgeError::transport(format!("stdin write failed: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| BridgeError::transport(format!("stdin flush failed: {e}")))?;
        Ok(())
    }

    /// Resolve every pending completion handle with a terminal error.
    fn drain_pending(&self, error: impl Fn() -> BridgeError) {
        let ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(Err(error()));
            }
        }
    }

    /// Best-effort resource cleanup; never fails.
    async fn teardown(&self, process: &mut ProcessHandles) {
        if let Some(reader) = process.reader.take() {
            reader.abort();
        }
        // Dropping our handle closes the child's input stream.
        *self.stdin.lock().await = None;
        if let Some(mut child) = process.child.take() {
            terminate_child(&mut child).await;
        }
        self.drain_pending(|| BridgeError::Stopped);
        self.protocol.clear_pending();
    }
}

/// Request graceful termination, escalating to a forced kill after the
/// grace period.
async fn terminate_child(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            log::debug!(target: TARGET, "SIGTERM failed: {}", e);
        }
        match tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
            Ok(_) => return,
            Err(_) => log::warn!(
                target: TARGET,
                "runtime did not exit within {:?}; killing",
                TERMINATE_GRACE
            ),
        }
    }

    if let Err(e) = child.kill().await {
        log::warn!(target: TARGET, "failed to kill runtime: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bridge() -> RuntimeBridge {
        RuntimeBridge::new(RuntimeConfig::default())
    }

    #[test]
    fn config_defaults_match_documented_timeouts() {
        let config = RuntimeConfig::default();
        assert_eq!(config.startup_timeout, Duration::from_secs(30));
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert!(!config.debug);
        assert!(config.env_vars.is_empty());
    }

    #[test]
    fn new_bridge_is_not_started() {
        let bridge = bridge();
        assert_eq!(bridge.state(), RuntimeState::NotStarted);
        assert!(!bridge.is_ready());
        assert_eq!(bridge.pending_request_count(), 0);
    }

    #[test]
    fn runtime_state_display_is_human_readable() {
        assert_eq!(RuntimeState::NotStarted.to_string(), "not started");
        assert_eq!(RuntimeState::ShuttingDown.to_string(), "shutting down");
        assert_eq!(RuntimeState::Ready.to_string(), "ready");
    }

    #[test]
    fn non_json_line_is_discarded_as_log_output() {
        let bridge = bridge();
        // Must not panic and must not touch any bookkeeping.
        bridge.handle_line("Download in progress... 42%", &mut None);
        assert_eq!(bridge.pending_request_count(), 0);
    }

    #[test]
    fn response_resolves_matching_pending_handle() {
        let bridge = bridge();
        let request = bridge.protocol.create_request("ping", None, false);
        let id = request.id.unwrap();

        let (tx, mut rx) = oneshot::channel();
        bridge.pending.insert(id.clone(), tx);

        let line = format!(r#"{{"jsonrpc":"2.0","id":"{id}","result":"pong"}}"#);
        bridge.handle_line(&line, &mut None);

        let delivered = rx.try_recv().expect("handle should be resolved");
        let response = delivered.expect("delivery is not an error");
        assert_eq!(response.into_result().unwrap(), json!("pong"));
        assert_eq!(bridge.pending_request_count(), 0);
        assert_eq!(bridge.protocol.pending_count(), 0);
    }

    #[test]
    fn unknown_response_id_is_discarded_without_disturbing_others() {
        let bridge = bridge();
        let (tx, mut rx) = oneshot::channel();
        bridge.pending.insert("real-id".to_string(), tx);

        bridge.handle_line(r#"{"jsonrpc":"2.0","id":"unknown-id","result":1}"#, &mut None);

        assert_eq!(bridge.pending_request_count(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn ready_response_id_signals_readiness_once() {
        let bridge = bridge();
        let (tx, mut rx) = oneshot::channel();
        let mut ready_tx = Some(tx);

        bridge.handle_line(r#"{"jsonrpc":"2.0","id":"ready","result":{}}"#, &mut ready_tx);
        assert!(ready_tx.is_none());
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn ready_notification_method_signals_readiness() {
        let bridge = bridge();
        let (tx, mut rx) = oneshot::channel();
        let mut ready_tx = Some(tx);

        bridge.handle_line(r#"{"jsonrpc":"2.0","method":"ready","params":{}}"#, &mut ready_tx);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn notification_dispatch_reaches_every_handler_and_survives_panics() {
        let bridge = bridge();
        let (tx, rx) = std::sync::mpsc::channel();

        bridge.on_notification("synapse.uploadProgress", move |_| {
            panic!("handler blew up");
        });
        bridge.on_notification("synapse.uploadProgress", move |params| {
            tx.send(params).unwrap();
        });

        bridge.handle_line(
            r#"{"jsonrpc":"2.0","method":"synapse.uploadProgress","params":{"percent":50}}"#,
            &mut None,
        );

        let params = rx.try_recv().expect("second handler still runs");
        assert_eq!(params["percent"], 50);
    }

    #[test]
    fn removed_handler_no_longer_fires() {
        let bridge = bridge();
        let (tx, rx) = std::sync::mpsc::channel::<Value>();

        let handler_id = bridge.on_notification("x.event", move |params| {
            let _ = tx.send(params);
        });
        assert!(bridge.remove_notification_handler("x.event", handler_id));
        assert!(!bridge.remove_notification_handler("x.event", handler_id));

        bridge.handle_line(r#"{"jsonrpc":"2.0","method":"x.event","params":1}"#, &mut None);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn call_outside_ready_state_fails_fast() {
        let bridge = Arc::new(bridge());
        let err = bridge.call("ping", None, None).await.unwrap_err();
        match err {
            BridgeError::NotReady { state } => assert_eq!(state, RuntimeState::NotStarted),
            other => panic!("expected NotReady, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn stop_before_start_is_a_no_op() {
        let bridge = Arc::new(bridge());
        bridge.stop().await;
        assert_eq!(bridge.state(), RuntimeState::NotStarted);
    }

    #[test]
    fn drain_pending_resolves_every_waiter_with_terminal_error() {
        let bridge = bridge();
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        bridge.pending.insert("a".to_string(), tx1);
        bridge.pending.insert("b".to_string(), tx2);

        bridge.drain_pending(|| BridgeError::Stopped);

        assert!(matches!(rx1.try_recv(), Ok(Err(BridgeError::Stopped))));
        assert!(matches!(rx2.try_recv(), Ok(Err(BridgeError::Stopped))));
        assert_eq!(bridge.pending_request_count(), 0);
    }
}
