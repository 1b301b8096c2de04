//! Error handling types for the haven bridge.
//!
//! This module provides the error types used throughout the crate.

use std::sync::PoisonError;
use thiserror::Error;

use crate::runtime::bridge::RuntimeState;
use crate::runtime::protocol::RpcError;

/// Comprehensive error type for bridge operations
#[derive(Debug, Error)]
pub enum BridgeError {
    /// No JavaScript runtime could be located on PATH
    #[error(
        "no JavaScript runtime found (supported: deno, bun, node); recommended: install Deno from https://deno.land"
    )]
    NoRuntimeFound,

    /// The subprocess could not be spawned or died during startup
    #[error("failed to start JS runtime: {message}")]
    Startup { message: String },

    /// The subprocess did not signal readiness within the startup timeout
    #[error("JS runtime failed to start within {timeout_secs}s")]
    StartupTimeout { timeout_secs: u64 },

    /// An operation that requires a ready runtime was attempted too early
    #[error("runtime not ready (state: {state})")]
    NotReady { state: RuntimeState },

    /// A lifecycle transition that is illegal from the current state
    #[error("cannot start runtime in state: {state}")]
    InvalidState { state: RuntimeState },

    /// The runtime was stopped while the operation was in flight
    #[error("runtime stopped")]
    Stopped,

    /// The stdio session to the subprocess broke down
    #[error("transport error: {message}")]
    Transport { message: String },

    /// Invalid configuration or misuse of the configuration surface
    #[error("configuration error: {message}")]
    Config { message: String },

    /// An error response from the JS runtime
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// A retried call ran out of attempts
    #[error("call to '{method}' failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        method: String,
        attempts: u32,
        #[source]
        source: Box<BridgeError>,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Helper functions for common error patterns
impl BridgeError {
    /// Create a startup error
    pub fn startup(message: impl Into<String>) -> Self {
        BridgeError::Startup {
            message: message.into(),
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        BridgeError::Transport {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        BridgeError::Config {
            message: message.into(),
        }
    }
}

/// Helper trait to recover a lock guard from a PoisonError
pub trait LockResultExt<G> {
    /// Recover from a poisoned lock with logging.
    ///
    /// The context parameter identifies which operation triggered lock
    /// recovery, helping developers debug thread safety issues.
    fn recover_poison(self, context: &str) -> G;
}

impl<G> LockResultExt<G> for Result<G, PoisonError<G>> {
    fn recover_poison(self, context: &str) -> G {
        match self {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!(
                    target: "haven::lock_recovery",
                    "Recovered from poisoned lock in {}",
                    context
                );
                poisoned.into_inner()
            }
        }
    }
}
