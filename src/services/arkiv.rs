//! Arkiv call wrappers (blockchain record sync).

use serde_json::{Value, json};

use crate::error::BridgeResult;
use crate::runtime::manager::{RetryOptions, js_call};
use crate::runtime::protocol::methods;

/// Sync a metadata record to the Arkiv chain, returning the entity receipt.
pub async fn sync(record: Value) -> BridgeResult<Value> {
    js_call(
        methods::ARKIV_SYNC,
        Some(json!({ "record": record })),
        RetryOptions::default(),
    )
    .await
}

/// Verify a previously synced record by its entity key.
pub async fn verify(key: &str) -> BridgeResult<Value> {
    js_call(
        methods::ARKIV_VERIFY,
        Some(json!({ "key": key })),
        RetryOptions::default(),
    )
    .await
}

/// Fetch a record by its entity key.
pub async fn get_record(key: &str) -> BridgeResult<Value> {
    js_call(
        methods::ARKIV_GET_RECORD,
        Some(json!({ "key": key })),
        RetryOptions::default(),
    )
    .await
}
