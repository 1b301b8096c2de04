//! Typed wrappers over the JS runtime method namespace.
//!
//! Pure boundary code: parameter structs, result extraction, nothing else.
//! Each wrapper goes through [`js_call`](crate::runtime::manager::js_call),
//! so callers get singleton reuse, health checking and retry for free.

pub mod arkiv;
pub mod lit;
pub mod synapse;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{BridgeError, BridgeResult};
use crate::runtime::protocol::RpcError;

/// Decode a call result into its typed shape.
///
/// A result that does not match the expected shape is an SDK-side contract
/// violation, reported with the method name for context.
fn decode_result<T: DeserializeOwned>(method: &str, value: Value) -> BridgeResult<T> {
    serde_json::from_value(value).map_err(|e| {
        BridgeError::Rpc(RpcError::sdk_error(format!(
            "malformed {method} result: {e}"
        )))
    })
}
