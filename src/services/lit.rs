//! Lit Protocol call wrappers (encryption and access control).

use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::BridgeResult;
use crate::runtime::manager::{RetryOptions, js_call};
use crate::runtime::protocol::methods;

use super::decode_result;

/// Ciphertext and hash returned by `lit.encrypt`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedPayload {
    /// Base64-encoded ciphertext
    pub ciphertext: String,
    pub data_to_encrypt_hash: String,
}

/// Plaintext returned by `lit.decrypt`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptedPayload {
    /// Base64-encoded plaintext
    pub data: String,
}

/// Connect to a Lit Protocol network (e.g. "datil-dev", "datil").
pub async fn connect(network: &str) -> BridgeResult<Value> {
    js_call(
        methods::LIT_CONNECT,
        Some(json!({ "network": network })),
        RetryOptions::default(),
    )
    .await
}

/// Encrypt base64-encoded data under the given access control conditions.
pub async fn encrypt(
    data_base64: &str,
    access_control_conditions: Value,
    chain: &str,
) -> BridgeResult<EncryptedPayload> {
    let result = js_call(
        methods::LIT_ENCRYPT,
        Some(json!({
            "data": data_base64,
            "accessControlConditions": access_control_conditions,
            "chain": chain,
        })),
        RetryOptions::default(),
    )
    .await?;
    decode_result(methods::LIT_ENCRYPT, result)
}

/// Decrypt a payload previously produced by [`encrypt`].
pub async fn decrypt(
    ciphertext: &str,
    data_to_encrypt_hash: &str,
    access_control_conditions: Value,
    chain: &str,
) -> BridgeResult<DecryptedPayload> {
    let result = js_call(
        methods::LIT_DECRYPT,
        Some(json!({
            "ciphertext": ciphertext,
            "dataToEncryptHash": data_to_encrypt_hash,
            "accessControlConditions": access_control_conditions,
            "chain": chain,
        })),
        RetryOptions::default(),
    )
    .await?;
    decode_result(methods::LIT_DECRYPT, result)
}
