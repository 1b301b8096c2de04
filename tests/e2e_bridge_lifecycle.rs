//! End-to-end tests for the bridge state machine against a real subprocess.
//!
//! A fake runtime scripted in POSIX sh (see `common`) stands in for the JS
//! services process, so these tests run on any unix machine with /bin/sh.

#![cfg(unix)]

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::FakeRuntime;
use haven::error::BridgeError;
use haven::runtime::bridge::{RuntimeBridge, RuntimeState};

#[tokio::test]
async fn start_completes_ready_handshake_and_stop_is_graceful() {
    let fake = FakeRuntime::responsive();
    let bridge = Arc::new(RuntimeBridge::new(fake.config()));

    bridge.start().await.expect("bridge should start");
    assert_eq!(bridge.state(), RuntimeState::Ready);
    assert!(bridge.is_ready());

    bridge.stop().await;
    assert_eq!(bridge.state(), RuntimeState::Stopped);
    assert!(!bridge.is_ready());
}

#[tokio::test]
async fn start_from_ready_fails_without_altering_state() {
    let fake = FakeRuntime::responsive();
    let bridge = Arc::new(RuntimeBridge::new(fake.config()));
    bridge.start().await.expect("first start succeeds");

    let err = bridge.start().await.expect_err("second start must fail");
    match err {
        BridgeError::InvalidState { state } => assert_eq!(state, RuntimeState::Ready),
        other => panic!("expected InvalidState, got {other:?}"),
    }
    // The failed start must not disturb the running bridge.
    assert_eq!(bridge.state(), RuntimeState::Ready);
    assert!(bridge.ping().await);

    bridge.stop().await;
}

#[tokio::test]
async fn stop_is_idempotent() {
    let fake = FakeRuntime::responsive();
    let bridge = Arc::new(RuntimeBridge::new(fake.config()));
    bridge.start().await.expect("bridge should start");

    bridge.stop().await;
    assert_eq!(bridge.state(), RuntimeState::Stopped);
    bridge.stop().await;
    assert_eq!(bridge.state(), RuntimeState::Stopped);
}

#[tokio::test]
async fn bridge_can_be_restarted_after_stop() {
    let fake = FakeRuntime::responsive();
    let bridge = Arc::new(RuntimeBridge::new(fake.config()));

    bridge.start().await.expect("first start");
    bridge.stop().await;

    bridge.start().await.expect("start from Stopped is legal");
    assert!(bridge.ping().await);
    bridge.stop().await;
}

#[tokio::test]
async fn startup_timeout_moves_bridge_to_error() {
    let fake = FakeRuntime::silent();
    let mut config = fake.config();
    config.startup_timeout = Duration::from_millis(500);
    let bridge = Arc::new(RuntimeBridge::new(config));

    let err = bridge.start().await.expect_err("silent runtime cannot start");
    assert!(matches!(err, BridgeError::StartupTimeout { .. }));
    assert_eq!(bridge.state(), RuntimeState::Error);
    assert!(bridge.error_message().is_some());

    // Teardown from Error still lands in Stopped.
    bridge.stop().await;
    assert_eq!(bridge.state(), RuntimeState::Stopped);
}

#[tokio::test]
async fn child_exit_before_ready_fails_startup_quickly() {
    let fake = FakeRuntime::fails_first_start();
    let bridge = Arc::new(RuntimeBridge::new(fake.config()));

    let start = Instant::now();
    let err = bridge.start().await.expect_err("first run exits early");
    assert!(matches!(err, BridgeError::Startup { .. }), "got {err:?}");
    // Failure is observed via process exit, well before the 5s timeout.
    assert!(start.elapsed() < Duration::from_secs(3));

    // The same script serves normally on its second run.
    let bridge = Arc::new(RuntimeBridge::new(fake.config()));
    bridge.start().await.expect("second run serves");
    assert!(bridge.ping().await);
    bridge.stop().await;
}

#[tokio::test]
async fn pending_calls_resolve_when_bridge_stops() {
    let fake = FakeRuntime::responsive();
    let bridge = Arc::new(RuntimeBridge::new(fake.config()));
    bridge.start().await.expect("bridge should start");

    let worker = Arc::clone(&bridge);
    let in_flight = tokio::spawn(async move { worker.call("slow.op", None, None).await });

    // Let the request reach the child before tearing down.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(bridge.pending_request_count(), 1);

    let stop_started = Instant::now();
    bridge.stop().await;

    let result = in_flight.await.expect("task must not be cancelled");
    assert!(
        matches!(result, Err(BridgeError::Stopped)),
        "pending call must resolve with a terminal error, got {result:?}"
    );
    // Nothing waited out the 10s request deadline.
    assert!(stop_started.elapsed() < Duration::from_secs(6));
    assert_eq!(bridge.pending_request_count(), 0);
}
