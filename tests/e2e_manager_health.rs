//! End-to-end tests for the health-check loop.

#![cfg(unix)]

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::FakeRuntime;
use haven::runtime::manager::BridgeManager;
use serde_json::json;

#[tokio::test]
async fn health_check_is_suppressed_while_requests_are_pending() {
    let fake = FakeRuntime::responsive();
    let manager = Arc::new(BridgeManager::new());
    manager
        .configure(fake.manager_config(Duration::from_millis(300)))
        .await
        .unwrap();

    let bridge = manager.get_bridge().await.expect("bridge starts");
    let status = manager.get_status().await;
    assert!(status.health_check_running);

    // Hold one request in flight across several health-check ticks.
    let worker = Arc::clone(&bridge);
    let in_flight = tokio::spawn(async move { worker.call("slow.op", None, None).await });
    tokio::time::sleep(Duration::from_millis(1200)).await;

    // The busy bridge was never restarted.
    let status = manager.get_status().await;
    assert_eq!(status.reconnect_count, 0);
    let same = manager.get_bridge().await.expect("bridge still ready");
    assert!(Arc::ptr_eq(&bridge, &same));

    let result = in_flight.await.unwrap().expect("slow call completes");
    assert_eq!(result, json!("late"));

    manager.shutdown().await;
}

#[tokio::test]
async fn unresponsive_bridge_is_restarted_by_the_health_loop() {
    let fake = FakeRuntime::deaf();
    let manager = Arc::new(BridgeManager::new());
    manager
        .configure(fake.manager_config(Duration::from_millis(300)))
        .await
        .unwrap();

    // The deaf runtime signals readiness but never answers a ping.
    let first = manager.get_bridge().await.expect("deaf bridge starts");

    // Wait for the health loop to notice (one ping deadline) and restart.
    let deadline = Instant::now() + Duration::from_secs(15);
    let replaced = loop {
        tokio::time::sleep(Duration::from_millis(250)).await;
        let current = manager.get_bridge().await.expect("a bridge is available");
        if !Arc::ptr_eq(&first, &current) {
            break current;
        }
        if Instant::now() > deadline {
            panic!("health loop did not replace the unresponsive bridge");
        }
    };
    assert!(replaced.is_ready());

    // A successful restart resets the reconnect counter.
    let status = manager.get_status().await;
    assert_eq!(status.reconnect_count, 0);

    manager.shutdown().await;
}
