//! JSON-RPC 2.0 wire protocol for the JS runtime subprocess.
//!
//! This module provides message construction, single-line serialization and
//! request/response matching. Process-level concerns (spawning, streams,
//! lifecycle state) live in [`bridge`](super::bridge).
//!
//! The transport frames messages by newline; serialization here is therefore
//! guaranteed to be newline-free single-line JSON.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use ulid::Ulid;

/// Protocol version tag carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Reserved response id used by the services entry point to signal readiness.
///
/// Generated request ids are ULIDs, so a real correlation id can never
/// collide with this literal.
pub const READY_ID: &str = "ready";

/// JSON-RPC error codes used across the system.
///
/// Callers branch on these numeric codes, never on message text.
pub mod codes {
    /// Invalid JSON was received
    pub const PARSE_ERROR: i32 = -32700;
    /// The JSON sent is not a valid request object
    pub const INVALID_REQUEST: i32 = -32600;
    /// The method does not exist
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid method parameters
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal JSON-RPC error
    pub const INTERNAL_ERROR: i32 = -32603;

    // Server errors (reserved range: -32000 to -32099)
    /// Generic server-side failure; the one retryable application code
    pub const SERVER_ERROR: i32 = -32000;
    /// No response within the per-call deadline
    pub const TIMEOUT_ERROR: i32 = -32001;
    /// The runtime is not ready to accept calls
    pub const RUNTIME_NOT_READY: i32 = -32002;
    /// A browser SDK raised inside the runtime
    pub const SDK_ERROR: i32 = -32003;
    /// Encryption or decryption failed
    pub const ENCRYPTION_ERROR: i32 = -32004;
    /// Storage upload failed
    pub const UPLOAD_ERROR: i32 = -32005;
}

/// Well-known method names understood by the JS services entry point.
///
/// The bridge itself is method-agnostic; new methods need no protocol change.
pub mod methods {
    // Lifecycle
    pub const PING: &str = "ping";
    pub const SHUTDOWN: &str = "shutdown";
    pub const GET_STATUS: &str = "getStatus";
    /// Notification method form of the readiness signal
    pub const READY: &str = "ready";

    // Lit Protocol
    pub const LIT_CONNECT: &str = "lit.connect";
    pub const LIT_ENCRYPT: &str = "lit.encrypt";
    pub const LIT_DECRYPT: &str = "lit.decrypt";
    pub const LIT_GET_SESSION: &str = "lit.getSession";

    // Synapse SDK
    pub const SYNAPSE_CONNECT: &str = "synapse.connect";
    pub const SYNAPSE_UPLOAD: &str = "synapse.upload";
    pub const SYNAPSE_DOWNLOAD: &str = "synapse.download";
    pub const SYNAPSE_GET_STATUS: &str = "synapse.getStatus";
    pub const SYNAPSE_GET_CID: &str = "synapse.getCid";

    // Arkiv
    pub const ARKIV_SYNC: &str = "arkiv.sync";
    pub const ARKIV_VERIFY: &str = "arkiv.verify";
    pub const ARKIV_GET_RECORD: &str = "arkiv.getRecord";
}

/// JSON-RPC 2.0 error object with code and optional structured data
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{message} (code {code})")]
pub struct RpcError {
    /// Error code from the closed namespace in [`codes`]
    pub code: i32,
    /// Human-readable error message
    pub message: String,
    /// Optional additional error data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Create an error with the given code and message
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attach structured data to the error
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Create a parse error
    pub fn parse_error(detail: impl Into<String>) -> Self {
        Self::new(codes::PARSE_ERROR, "Parse error").with_data(Value::String(detail.into()))
    }

    /// Create an invalid request error
    pub fn invalid_request() -> Self {
        Self::new(codes::INVALID_REQUEST, "Invalid request")
    }

    /// Create a method not found error
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            codes::METHOD_NOT_FOUND,
            format!("Method not found: {method}"),
        )
    }

    /// Create an invalid params error
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(codes::INVALID_PARAMS, message)
    }

    /// Create an internal error
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL_ERROR, message)
    }

    /// Create a timeout error
    pub fn timeout(timeout_secs: f64) -> Self {
        Self::new(
            codes::TIMEOUT_ERROR,
            format!("Request timed out after {timeout_secs}s"),
        )
    }

    /// Create a runtime-not-ready error
    pub fn not_ready(message: impl Into<String>) -> Self {
        Self::new(codes::RUNTIME_NOT_READY, message)
    }

    /// Create an SDK error
    pub fn sdk_error(message: impl Into<String>) -> Self {
        Self::new(codes::SDK_ERROR, message)
    }

    /// Create an encryption error
    pub fn encryption_error(message: impl Into<String>) -> Self {
        Self::new(codes::ENCRYPTION_ERROR, message)
    }

    /// Create an upload error
    pub fn upload_error(message: impl Into<String>) -> Self {
        Self::new(codes::UPLOAD_ERROR, message)
    }

    /// Create a generic server error
    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(codes::SERVER_ERROR, message)
    }
}

/// JSON-RPC 2.0 request object.
///
/// A request without an id is a notification: no response is ever expected
/// and none is tracked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    /// Create a request with a fresh unique correlation id
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(Ulid::new().to_string()),
            method: method.into(),
            params,
        }
    }

    /// Create a notification (no id, no response expected)
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.into(),
            params,
        }
    }

    /// Check if this is a notification (no id)
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Serialize to a single line of JSON (no trailing newline)
    pub fn to_line(&self) -> Result<String, RpcError> {
        serde_json::to_string(self).map_err(|e| RpcError::internal_error(e.to_string()))
    }
}

/// JSON-RPC 2.0 response object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    /// Create a success response
    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id.into()),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn failure(id: impl Into<String>, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id.into()),
            result: None,
            error: Some(error),
        }
    }

    /// Build a response from a parsed message, if it has a string id.
    ///
    /// A malformed `error` member degrades to an internal error rather than
    /// dropping the response on the floor.
    pub(crate) fn from_value(value: &Value) -> Option<Response> {
        let id = value.get("id")?.as_str()?.to_string();
        let error = value.get("error").map(|e| {
            serde_json::from_value::<RpcError>(e.clone())
                .unwrap_or_else(|_| RpcError::internal_error("malformed error object in response"))
        });
        Some(Response {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            result: value.get("result").cloned(),
            error,
        })
    }

    /// Check if this is a success response
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Unwrap into the result value, or the error carried by the response
    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// JSON-RPC 2.0 protocol handler.
///
/// Tracks outstanding request ids so responses can be matched back to the
/// requests that produced them. This is the message-level view of the pending
/// set; the bridge keeps the process-level completion handles.
#[derive(Debug, Default)]
pub struct Protocol {
    pending: DashMap<String, Request>,
}

impl Protocol {
    /// Create a new protocol handler with no pending requests
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new request, registering it for response matching.
    ///
    /// Notifications get no id and are not registered.
    pub fn create_request(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
        notification: bool,
    ) -> Request {
        let request = if notification {
            Request::notification(method, params)
        } else {
            Request::new(method, params)
        };
        if let Some(id) = &request.id {
            self.pending.insert(id.clone(), request.clone());
        }
        request
    }

    /// Match a response to its original request.
    ///
    /// Returns `None` for unknown, late or duplicate ids; callers must treat
    /// that as "ignore", not as an error.
    pub fn match_response(&self, response: &Response) -> Option<Request> {
        let id = response.id.as_deref()?;
        self.pending.remove(id).map(|(_, request)| request)
    }

    /// Cancel a pending request, returning it if it was still tracked
    pub fn cancel_request(&self, id: &str) -> Option<Request> {
        self.pending.remove(id).map(|(_, request)| request)
    }

    /// Clear all pending requests, returning the cancelled set
    pub fn clear_pending(&self) -> Vec<Request> {
        let ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        ids.into_iter()
            .filter_map(|id| self.pending.remove(&id).map(|(_, request)| request))
            .collect()
    }

    /// Number of requests awaiting a response
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Ids of all requests awaiting a response
    pub fn pending_ids(&self) -> Vec<String> {
        self.pending.iter().map(|e| e.key().clone()).collect()
    }
}
