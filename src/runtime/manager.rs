//! Resilient singleton manager around the runtime bridge.
//!
//! Many independent callers share one JS runtime subprocess without knowing
//! about process lifecycle. The manager lazily creates the bridge, monitors
//! it with a background health check, restarts it with capped exponential
//! backoff, and offers a call-with-retry entry point that hides discovery,
//! spawning and restart entirely.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{BridgeError, BridgeResult, LockResultExt};
use crate::runtime::bridge::{RuntimeBridge, RuntimeConfig, RuntimeState};
use crate::runtime::protocol::codes;

const TARGET: &str = "haven::runtime::manager";

/// Interval between health checks. Longer than a typical Filecoin upload so
/// the probe never races a long-running call.
const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(120);
/// Ceiling on the restart backoff delay.
const MAX_RESTART_BACKOFF: Duration = Duration::from_secs(30);
/// Environment prefixes forwarded to the subprocess.
const FORWARDED_ENV_PREFIXES: [&str; 3] = ["HAVEN_", "FILECOIN_", "SYNAPSE_"];
/// Fixed allowlist forwarded besides the prefixed variables.
const FORWARDED_ENV_NAMES: [&str; 5] = ["PATH", "HOME", "USER", "DEBUG", "LOG_LEVEL"];

/// Configuration applied to the manager before the bridge first starts
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Path to the JS services directory
    pub services_path: Option<PathBuf>,
    /// Specific runtime executable to use (auto-detect if None)
    pub runtime_executable: Option<PathBuf>,
    /// Timeout for bridge startup
    pub startup_timeout: Duration,
    /// Default timeout for requests
    pub request_timeout: Duration,
    /// Interval between health checks
    pub health_check_interval: Duration,
    /// Enable debug mode in the JS runtime
    pub debug: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            services_path: None,
            runtime_executable: None,
            startup_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            debug: false,
        }
    }
}

/// Options for [`BridgeManager::call_with_retry`]
#[derive(Debug, Clone)]
pub struct RetryOptions {
    /// Maximum number of attempts
    pub max_retries: u32,
    /// Base delay for exponential backoff between attempts
    pub base_delay: Duration,
    /// Per-call timeout override
    pub timeout: Option<Duration>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            timeout: None,
        }
    }
}

/// Snapshot of the manager's runtime metrics
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatus {
    pub bridge_state: RuntimeState,
    pub is_ready: bool,
    pub reconnect_count: u32,
    pub call_count: u64,
    pub last_error: Option<String>,
    pub health_check_running: bool,
    pub active_callers: usize,
}

/// Token identifying a registered caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallerId(u64);

/// How [`BridgeManager::call_with_retry`] reacts to a failed attempt.
///
/// Transport and process failures are assumed transient; application-level
/// protocol errors are assumed deterministic. This asymmetry is intentional.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RetryClass {
    /// Restart the bridge immediately, retry without delay
    Restart,
    /// Retry after exponential backoff
    Backoff,
    /// Propagate to the caller untouched
    Fatal,
}

/// Classify an error for the retry loop.
pub(crate) fn retry_class(error: &BridgeError) -> RetryClass {
    match error {
        BridgeError::NotReady { .. } | BridgeError::Stopped => RetryClass::Restart,
        BridgeError::Rpc(rpc) => match rpc.code {
            codes::SERVER_ERROR | codes::TIMEOUT_ERROR => RetryClass::Backoff,
            _ => RetryClass::Fatal,
        },
        _ => RetryClass::Backoff,
    }
}

/// Delay applied before restart attempt `attempt` (1-based).
///
/// No delay for the first attempt, then `min(2^(attempt-1), 30)` seconds.
pub(crate) fn restart_backoff(attempt: u32) -> Duration {
    if attempt <= 1 {
        return Duration::ZERO;
    }
    let secs = 2u64.saturating_pow((attempt - 1).min(16));
    Duration::from_secs(secs.min(MAX_RESTART_BACKOFF.as_secs()))
}

/// Filter environment variables down to the forwarded subset.
///
/// Only application-prefixed variables and a small fixed allowlist reach the
/// subprocess, so unrelated secrets never leak into it.
pub(crate) fn forwarded_env<I>(vars: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    vars.into_iter()
        .filter(|(name, _)| {
            FORWARDED_ENV_PREFIXES
                .iter()
                .any(|prefix| name.starts_with(prefix))
                || FORWARDED_ENV_NAMES.contains(&name.as_str())
        })
        .collect()
}

/// Process-wide singleton slot; explicit shared state, no global magic.
static INSTANCE: std::sync::Mutex<Option<Arc<BridgeManager>>> = std::sync::Mutex::new(None);

/// Manages JS runtime bridge lifecycle for concurrent callers.
///
/// Provides singleton bridge reuse, background health checks with automatic
/// restart, exponential-backoff reconnection and graceful shutdown.
pub struct BridgeManager {
    /// The managed bridge; this mutex serializes creation and restart, so
    /// there is at most one live child process at all times
    bridge: Mutex<Option<Arc<RuntimeBridge>>>,
    config: std::sync::RwLock<Option<ManagerConfig>>,
    health_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    shutdown: std::sync::Mutex<CancellationToken>,
    /// Consecutive failed restarts; resets to 0 on success
    reconnect_count: AtomicU32,
    call_count: AtomicU64,
    last_error: std::sync::RwLock<Option<String>>,
    /// Non-owning registry of interested callers, purely observational
    callers: std::sync::Mutex<HashSet<u64>>,
    next_caller_id: AtomicU64,
}

impl Default for BridgeManager {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeManager {
    /// Create a standalone manager.
    ///
    /// Most code should use [`BridgeManager::instance`]; standalone managers
    /// exist for tests that need isolation from the process-wide singleton.
    pub fn new() -> Self {
        Self {
            bridge: Mutex::new(None),
            config: std::sync::RwLock::new(None),
            health_task: std::sync::Mutex::new(None),
            shutdown: std::sync::Mutex::new(CancellationToken::new()),
            reconnect_count: AtomicU32::new(0),
            call_count: AtomicU64::new(0),
            last_error: std::sync::RwLock::new(None),
            callers: std::sync::Mutex::new(HashSet::new()),
            next_caller_id: AtomicU64::new(1),
        }
    }

    /// Get the process-wide singleton, creating it on first use.
    pub fn instance() -> Arc<BridgeManager> {
        let mut slot = INSTANCE.lock().recover_poison("BridgeManager::instance");
        slot.get_or_insert_with(|| Arc::new(BridgeManager::new()))
            .clone()
    }

    /// Reset the singleton (test-only escape hatch).
    ///
    /// Existing handles keep working against the old instance; subsequent
    /// [`BridgeManager::instance`] calls return a fresh one.
    pub fn reset_instance() {
        let mut slot = INSTANCE
            .lock()
            .recover_poison("BridgeManager::reset_instance");
        *slot = None;
    }

    /// Configure the manager.
    ///
    /// Only legal while no bridge is ready; configuration is not
    /// hot-swappable under load.
    pub async fn configure(&self, config: ManagerConfig) -> BridgeResult<()> {
        let bridge = self.bridge.lock().await;
        if bridge.as_ref().is_some_and(|b| b.is_ready()) {
            return Err(BridgeError::config(
                "cannot configure while the bridge is running; call shutdown() first",
            ));
        }
        log::debug!(
            target: TARGET,
            "manager configured with health_check_interval={:?}",
            config.health_check_interval
        );
        *self
            .config
            .write()
            .recover_poison("BridgeManager::configure") = Some(config);
        Ok(())
    }

    /// Get or create a ready bridge.
    ///
    /// Concurrent callers converge on one bridge instance; a stale non-ready
    /// bridge is stopped before its replacement starts.
    pub async fn get_bridge(self: &Arc<Self>) -> BridgeResult<Arc<RuntimeBridge>> {
        let mut slot = self.bridge.lock().await;
        if let Some(bridge) = slot.as_ref() {
            if bridge.is_ready() {
                return Ok(Arc::clone(bridge));
            }
        }

        if let Some(stale) = slot.take() {
            stale.stop().await;
        }
        let bridge = self.create_bridge().await?;
        *slot = Some(Arc::clone(&bridge));
        drop(slot);

        self.ensure_health_task();
        Ok(bridge)
    }

    /// Call a method on the bridge, starting it if necessary.
    ///
    /// For automatic retry on failure use [`BridgeManager::call_with_retry`].
    pub async fn call(
        self: &Arc<Self>,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> BridgeResult<Value> {
        let bridge = self.get_bridge().await?;
        self.call_count.fetch_add(1, Ordering::Relaxed);
        bridge.call(method, params, timeout).await
    }

    /// Call a method with automatic retry and restart.
    ///
    /// A not-ready/stopped runtime error triggers an immediate restart and a
    /// retry without delay. Retryable codes back off exponentially
    /// (`base_delay * 2^attempt`); every other RPC error propagates
    /// untouched. On exhaustion the last error is wrapped with the method
    /// name and attempt count.
    pub async fn call_with_retry(
        self: &Arc<Self>,
        method: &str,
        params: Option<Value>,
        options: RetryOptions,
    ) -> BridgeResult<Value> {
        let max_attempts = options.max_retries.max(1);
        let mut last_error: Option<BridgeError> = None;

        for attempt in 0..max_attempts {
            let result = match self.get_bridge().await {
                Ok(bridge) => {
                    self.call_count.fetch_add(1, Ordering::Relaxed);
                    bridge.call(method, params.clone(), options.timeout).await
                }
                Err(e) => Err(e),
            };

            let error = match result {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            match retry_class(&error) {
                RetryClass::Restart => {
                    log::warn!(
                        target: TARGET,
                        "bridge not ready on attempt {}; restarting",
                        attempt + 1
                    );
                    self.restart_bridge().await?;
                    last_error = Some(error);
                }
                RetryClass::Backoff => {
                    if attempt + 1 < max_attempts {
                        let delay = options.base_delay * 2u32.saturating_pow(attempt);
                        log::warn!(
                            target: TARGET,
                            "attempt {} failed ({}); retrying in {:?}",
                            attempt + 1,
                            error,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last_error = Some(error);
                }
                RetryClass::Fatal => return Err(error),
            }
        }

        Err(BridgeError::RetriesExhausted {
            method: method.to_string(),
            attempts: max_attempts,
            source: Box::new(
                last_error.unwrap_or_else(|| BridgeError::startup("no attempts were made")),
            ),
        })
    }

    /// Restart the bridge after a failure.
    ///
    /// Guarded by the creation mutex. Applies exponential backoff for
    /// consecutive failures; the reconnect counter resets to zero once a
    /// replacement starts successfully.
    pub async fn restart_bridge(self: &Arc<Self>) -> BridgeResult<Arc<RuntimeBridge>> {
        let mut slot = self.bridge.lock().await;
        log::info!(target: TARGET, "restarting JS runtime bridge");
        let attempt = self.reconnect_count.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(old) = slot.take() {
            // stop() is best-effort and never raises.
            old.stop().await;
        }

        let delay = restart_backoff(attempt);
        if !delay.is_zero() {
            log::info!(
                target: TARGET,
                "waiting {:?} before restart (attempt {})",
                delay,
                attempt
            );
            tokio::time::sleep(delay).await;
        }

        match self.create_bridge().await {
            Ok(bridge) => {
                *slot = Some(Arc::clone(&bridge));
                self.reconnect_count.store(0, Ordering::SeqCst);
                log::info!(target: TARGET, "bridge restarted (attempt {})", attempt);
                Ok(bridge)
            }
            Err(e) => {
                log::error!(target: TARGET, "bridge restart failed: {}", e);
                Err(e)
            }
        }
    }

    /// Ping the bridge without starting one.
    pub async fn ping(&self) -> bool {
        let bridge = self.bridge.lock().await.clone();
        match bridge {
            Some(bridge) if bridge.is_ready() => bridge.ping().await,
            _ => false,
        }
    }

    /// Snapshot the manager's metrics and bridge state.
    pub async fn get_status(&self) -> ManagerStatus {
        let bridge = self.bridge.lock().await.clone();
        let (bridge_state, is_ready) = match &bridge {
            Some(bridge) => (bridge.state(), bridge.is_ready()),
            None => (RuntimeState::NotStarted, false),
        };
        ManagerStatus {
            bridge_state,
            is_ready,
            reconnect_count: self.reconnect_count.load(Ordering::SeqCst),
            call_count: self.call_count.load(Ordering::Relaxed),
            last_error: self
                .last_error
                .read()
                .recover_poison("BridgeManager::get_status")
                .clone(),
            health_check_running: self
                .health_task
                .lock()
                .recover_poison("BridgeManager::get_status")
                .as_ref()
                .is_some_and(|task| !task.is_finished()),
            active_callers: self.active_caller_count(),
        }
    }

    /// Shutdown the manager: stop the health loop, then the bridge.
    /// Idempotent.
    pub async fn shutdown(&self) {
        log::info!(target: TARGET, "shutting down bridge manager");
        self.shutdown
            .lock()
            .recover_poison("BridgeManager::shutdown")
            .cancel();
        let task = self
            .health_task
            .lock()
            .recover_poison("BridgeManager::shutdown")
            .take();
        if let Some(task) = task {
            // The loop exits at its next await point.
            task.abort();
        }

        if let Some(bridge) = self.bridge.lock().await.take() {
            bridge.stop().await;
        }
        log::info!(target: TARGET, "bridge manager shutdown complete");
    }

    /// Register an interested caller for diagnostics.
    ///
    /// Purely observational: registration never extends the bridge's
    /// lifetime and never gates its availability.
    pub fn register_caller(&self) -> CallerId {
        let id = self.next_caller_id.fetch_add(1, Ordering::Relaxed);
        self.callers
            .lock()
            .recover_poison("BridgeManager::register_caller")
            .insert(id);
        CallerId(id)
    }

    /// Unregister a caller.
    pub fn unregister_caller(&self, id: CallerId) {
        self.callers
            .lock()
            .recover_poison("BridgeManager::unregister_caller")
            .remove(&id.0);
    }

    /// Number of currently registered callers.
    pub fn active_caller_count(&self) -> usize {
        self.callers
            .lock()
            .recover_poison("BridgeManager::active_caller_count")
            .len()
    }

    /// Build the bridge configuration from manager config plus forwarded env.
    fn runtime_config(&self) -> RuntimeConfig {
        let config = self
            .config
            .read()
            .recover_poison("BridgeManager::runtime_config")
            .clone()
            .unwrap_or_default();
        RuntimeConfig {
            services_path: config.services_path,
            runtime_executable: config.runtime_executable,
            startup_timeout: config.startup_timeout,
            request_timeout: config.request_timeout,
            env_vars: forwarded_env(std::env::vars()),
            debug: config.debug,
        }
    }

    fn health_interval(&self) -> Duration {
        self.config
            .read()
            .recover_poison("BridgeManager::health_interval")
            .as_ref()
            .map(|config| config.health_check_interval)
            .unwrap_or(DEFAULT_HEALTH_CHECK_INTERVAL)
    }

    /// Create and start a new bridge.
    async fn create_bridge(&self) -> BridgeResult<Arc<RuntimeBridge>> {
        let bridge = Arc::new(RuntimeBridge::new(self.runtime_config()));
        match bridge.start().await {
            Ok(()) => {
                log::info!(target: TARGET, "JS runtime bridge started");
                *self
                    .last_error
                    .write()
                    .recover_poison("BridgeManager::create_bridge") = None;
                Ok(bridge)
            }
            Err(e) => {
                log::error!(target: TARGET, "failed to start JS runtime bridge: {}", e);
                *self
                    .last_error
                    .write()
                    .recover_poison("BridgeManager::create_bridge") = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Start the health-check task if it is not already running.
    fn ensure_health_task(self: &Arc<Self>) {
        let mut task = self
            .health_task
            .lock()
            .recover_poison("BridgeManager::ensure_health_task");
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        let token = CancellationToken::new();
        *self
            .shutdown
            .lock()
            .recover_poison("BridgeManager::ensure_health_task") = token.clone();

        let manager = Arc::clone(self);
        *task = Some(tokio::spawn(async move {
            manager.health_check_loop(token).await;
        }));
        log::debug!(target: TARGET, "health check loop started");
    }

    /// Periodically check bridge health, restarting on failure.
    ///
    /// The check is skipped entirely while requests are in flight so a probe
    /// can never kill a bridge that is merely busy with one long call.
    async fn health_check_loop(self: Arc<Self>, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.health_interval()) => {}
            }

            let bridge = self.bridge.lock().await.clone();
            let Some(bridge) = bridge else { continue };
            if !bridge.is_ready() {
                continue;
            }

            let pending = bridge.pending_request_count();
            if pending > 0 {
                log::debug!(
                    target: TARGET,
                    "health check skipped: {} request(s) in flight",
                    pending
                );
                continue;
            }

            if bridge.ping().await {
                log::debug!(target: TARGET, "health check passed");
            } else {
                log::warn!(target: TARGET, "health check failed: bridge not responsive");
                if let Err(e) = self.restart_bridge().await {
                    // Logged and retried on the next tick; never fatal here.
                    log::warn!(target: TARGET, "restart after failed health check failed: {}", e);
                }
            }
        }
        log::debug!(target: TARGET, "health check loop stopped");
    }
}

/// Get the singleton bridge instance, starting it if necessary.
pub async fn get_bridge() -> BridgeResult<Arc<RuntimeBridge>> {
    BridgeManager::instance().get_bridge().await
}

/// Make a JS runtime call through the singleton manager with retry.
///
/// This is the primary entry point for the scheduler/pipeline layer: it
/// hides discovery, spawning, health checking and restart entirely.
pub async fn js_call(
    method: &str,
    params: Option<Value>,
    options: RetryOptions,
) -> BridgeResult<Value> {
    BridgeManager::instance()
        .call_with_retry(method, params, options)
        .await
}

/// Configure the singleton manager. Call once during application startup.
pub async fn configure_bridge(config: ManagerConfig) -> BridgeResult<()> {
    BridgeManager::instance().configure(config).await
}
