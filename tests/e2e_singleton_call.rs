//! End-to-end test for the caller-facing singleton surface.
//!
//! Kept in its own binary so no other test races the process-wide singleton.

#![cfg(unix)]

mod common;

use std::time::Duration;

use common::FakeRuntime;
use haven::runtime::manager::{BridgeManager, RetryOptions, configure_bridge, js_call};
use serde_json::json;

#[tokio::test]
async fn js_call_drives_the_singleton_end_to_end() {
    BridgeManager::reset_instance();

    let fake = FakeRuntime::responsive();
    configure_bridge(fake.manager_config(Duration::from_secs(300)))
        .await
        .expect("configure succeeds before the bridge starts");

    let result = js_call("ping", None, RetryOptions::default())
        .await
        .expect("singleton call succeeds");
    assert_eq!(result, json!("pong"));

    let manager = BridgeManager::instance();
    let status = manager.get_status().await;
    assert!(status.is_ready);
    assert!(status.call_count >= 1);
    assert!(status.health_check_running);

    // Reconfiguring a running bridge is a usage error.
    let err = configure_bridge(fake.manager_config(Duration::from_secs(300)))
        .await
        .expect_err("configuration is not hot-swappable");
    assert!(err.to_string().contains("cannot configure"));

    manager.shutdown().await;
    BridgeManager::reset_instance();
}
