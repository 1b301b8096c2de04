//! Synapse SDK call wrappers (Filecoin storage).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::BridgeResult;
use crate::runtime::manager::{RetryOptions, js_call};
use crate::runtime::protocol::methods;

use super::decode_result;

/// Filecoin uploads routinely take one to two minutes; give them headroom.
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(180);

/// Metadata attached to an upload
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadMetadata {
    pub encrypted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_set_id: Option<String>,
}

/// Result of `synapse.upload`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    pub cid: String,
    #[serde(default)]
    pub size: Option<u64>,
}

/// Result of `synapse.getStatus`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealStatus {
    pub status: String,
    #[serde(default)]
    pub provider: Option<String>,
}

impl DealStatus {
    pub fn is_confirmed(&self) -> bool {
        self.status == "confirmed"
    }
}

/// Connect to Synapse. Credentials come from the forwarded environment
/// (FILECOIN_RPC_URL, HAVEN_PRIVATE_KEY).
pub async fn connect() -> BridgeResult<Value> {
    js_call(
        methods::SYNAPSE_CONNECT,
        Some(json!({})),
        RetryOptions::default(),
    )
    .await
}

/// Upload a file to Filecoin, enabling progress notifications.
pub async fn upload(file_path: &str, metadata: UploadMetadata) -> BridgeResult<UploadResult> {
    let result = js_call(
        methods::SYNAPSE_UPLOAD,
        Some(json!({
            "filePath": file_path,
            "metadata": metadata,
            "onProgress": true,
        })),
        RetryOptions {
            timeout: Some(UPLOAD_TIMEOUT),
            ..RetryOptions::default()
        },
    )
    .await?;
    decode_result(methods::SYNAPSE_UPLOAD, result)
}

/// Download a CID to a local path.
pub async fn download(cid: &str, output_path: &str) -> BridgeResult<Value> {
    js_call(
        methods::SYNAPSE_DOWNLOAD,
        Some(json!({
            "cid": cid,
            "outputPath": output_path,
        })),
        RetryOptions::default(),
    )
    .await
}

/// Query the deal status for a CID.
pub async fn get_status(cid: &str) -> BridgeResult<DealStatus> {
    let result = js_call(
        methods::SYNAPSE_GET_STATUS,
        Some(json!({ "cid": cid })),
        RetryOptions::default(),
    )
    .await?;
    decode_result(methods::SYNAPSE_GET_STATUS, result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_metadata_serializes_to_camel_case() {
        let metadata = UploadMetadata {
            encrypted: true,
            data_set_id: Some("ds-1".to_string()),
        };
        let value = serde_json::to_value(&metadata).unwrap();
        assert_eq!(value["encrypted"], true);
        assert_eq!(value["dataSetId"], "ds-1");

        // Absent data set id is omitted entirely.
        let value = serde_json::to_value(UploadMetadata::default()).unwrap();
        assert!(value.get("dataSetId").is_none());
    }

    #[test]
    fn deal_status_confirmed_check() {
        let status: DealStatus =
            decode_result(methods::SYNAPSE_GET_STATUS, json!({"status": "confirmed"})).unwrap();
        assert!(status.is_confirmed());

        let status: DealStatus =
            decode_result(methods::SYNAPSE_GET_STATUS, json!({"status": "pending"})).unwrap();
        assert!(!status.is_confirmed());
    }
}
