//! Integration tests for `ProgressTracker`: server frames flowing through
//! the connection manager into the progress store and out as views.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use stagewatch_client::{
    ConnectionManager, LinkStatus, ManagerConfig, ProgressTracker, ProgressView, ReconnectConfig,
};
use stagewatch_core::log::LogLevel;
use stagewatch_core::progress::{StageKey, StageStatus};
use stagewatch_events::StoreRegistry;
use tokio::sync::watch;

use common::{TestServer, WAIT};

async fn wait_view(
    rx: &mut watch::Receiver<ProgressView>,
    pred: impl FnMut(&ProgressView) -> bool,
) -> ProgressView {
    tokio::time::timeout(WAIT, rx.wait_for(pred))
        .await
        .expect("timed out waiting for view")
        .expect("view publisher dropped")
        .clone()
}

fn manager_for(server: &TestServer, retry: Duration) -> Arc<ConnectionManager> {
    Arc::new(ConnectionManager::new(
        server.api_url(),
        ManagerConfig {
            reconnect: ReconnectConfig::fixed(retry),
            connect_timeout: None,
        },
    ))
}

// ---------------------------------------------------------------------------
// Test: progress and log frames reach the view, regressions do not
// ---------------------------------------------------------------------------

#[tokio::test]
async fn frames_flow_into_the_view() {
    let mut server = TestServer::start().await;
    let manager = manager_for(&server, Duration::from_millis(100));
    let stores = StoreRegistry::new();

    let tracker = ProgressTracker::start(manager, &stores, "job-1").await.unwrap();
    let mut view = tracker.view();
    let conn = server.next_conn().await;
    wait_view(&mut view, |v| v.is_connected).await;

    conn.send_text(r#"{"event":"ping"}"#);
    conn.send_json(json!({
        "type": "progress",
        "data": {
            "overall": 30,
            "stage": "assets",
            "message": "Generating assets",
            "stages": {"script": {"status": "completed", "progress": 100}}
        }
    }));
    let current = wait_view(&mut view, |v| v.snapshot.overall == 30.0).await;
    assert_eq!(current.snapshot.current_stage, StageKey::Assets);
    assert_eq!(
        current.snapshot.stage(StageKey::Script).map(|s| s.status),
        Some(StageStatus::Completed)
    );

    // Lower overall without a status change is dropped; the log line that
    // follows proves the regression was processed first.
    conn.send_json(json!({"type": "progress", "data": {"overall": 25}}));
    conn.send_json(json!({"type": "log", "data": {"level": "warning", "message": "GPU busy"}}));
    let current = wait_view(&mut view, |v| v.logs.len() == 1).await;
    assert_eq!(current.snapshot.overall, 30.0);
    assert_eq!(current.logs[0].level, LogLevel::Warning);
    assert_eq!(current.logs[0].message, "GPU busy");

    // The same regression with a terminal stage status is applied.
    conn.send_json(json!({
        "type": "progress",
        "data": {"overall": 25, "stages": {"assets": {"status": "failed"}}}
    }));
    let current = wait_view(&mut view, |v| v.snapshot.has_failure()).await;
    assert_eq!(current.snapshot.overall, 25.0);
    assert_eq!(
        current.snapshot.stage(StageKey::Script).map(|s| s.status),
        Some(StageStatus::Completed)
    );
}

// ---------------------------------------------------------------------------
// Test: a dropped link shows as reconnecting and keeps the snapshot
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reconnect_keeps_displayed_progress() {
    let mut server = TestServer::start().await;
    let manager = manager_for(&server, Duration::from_millis(300));
    let stores = StoreRegistry::new();

    let tracker = ProgressTracker::start(manager, &stores, "job-1").await.unwrap();
    let mut view = tracker.view();
    let conn = server.next_conn().await;
    wait_view(&mut view, |v| v.link == LinkStatus::Connected).await;

    conn.send_json(json!({"overall": 40, "message": "Rendering"}));
    wait_view(&mut view, |v| v.snapshot.overall == 40.0).await;

    conn.close_with(1011);
    let current = wait_view(&mut view, |v| v.link == LinkStatus::Reconnecting).await;
    assert!(!current.is_connected);
    assert_eq!(current.snapshot.overall, 40.0);

    let conn = server.next_conn().await;
    let current = wait_view(&mut view, |v| v.link == LinkStatus::Connected).await;
    assert_eq!(current.snapshot.overall, 40.0);
    assert_eq!(current.snapshot.message, "Rendering");

    conn.send_json(json!({"overall": 55}));
    wait_view(&mut view, |v| v.snapshot.overall == 55.0).await;
}

// ---------------------------------------------------------------------------
// Test: stop() closes the channel for good
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stop_closes_without_reconnect() {
    let mut server = TestServer::start().await;
    let manager = manager_for(&server, Duration::from_millis(100));
    let stores = StoreRegistry::new();

    let tracker = ProgressTracker::start(Arc::clone(&manager), &stores, "job-1")
        .await
        .unwrap();
    let mut view = tracker.view();
    let _conn = server.next_conn().await;
    wait_view(&mut view, |v| v.is_connected).await;

    tracker.stop().await;

    server.expect_no_conn(Duration::from_millis(500)).await;
    assert_eq!(server.accepted(), 1);
    assert_eq!(manager.state("job-1").await, None);
}

// ---------------------------------------------------------------------------
// Test: imperative calls
// ---------------------------------------------------------------------------

#[tokio::test]
async fn send_reset_and_clear_logs() {
    let mut server = TestServer::start().await;
    let manager = manager_for(&server, Duration::from_millis(100));
    let stores = StoreRegistry::new();

    let tracker = ProgressTracker::start(manager, &stores, "job-1")
        .await
        .unwrap();
    let mut view = tracker.view();
    let mut conn = server.next_conn().await;
    wait_view(&mut view, |v| v.is_connected).await;

    assert!(tracker.send(&json!({"action": "refresh"})).await);
    let text = conn.next_text().await;
    assert_eq!(
        serde_json::from_str::<serde_json::Value>(&text).unwrap(),
        json!({"action": "refresh"})
    );

    conn.send_json(json!({"overall": 70}));
    conn.send_json(json!({"type": "log", "data": {"level": "info", "message": "Uploading"}}));
    wait_view(&mut view, |v| v.logs.len() == 1 && v.snapshot.overall == 70.0).await;

    tracker.reset();
    let current = wait_view(&mut view, |v| v.snapshot.overall == 0.0).await;
    assert_eq!(current.logs.len(), 1);
    assert_eq!(tracker.snapshot().overall, 0.0);

    tracker.clear_logs();
    wait_view(&mut view, |v| v.logs.is_empty()).await;
    assert!(tracker.store().logs().is_empty());
    assert!(stores.get("job-1").await.unwrap().logs().is_empty());
}

// ---------------------------------------------------------------------------
// Test: reconnect() swaps the socket but not the state
// ---------------------------------------------------------------------------

#[tokio::test]
async fn tracker_reconnect_is_not_a_close() {
    let mut server = TestServer::start().await;
    let manager = manager_for(&server, Duration::from_secs(30));
    let stores = StoreRegistry::new();

    let tracker = ProgressTracker::start(manager, &stores, "job-1").await.unwrap();
    let mut view = tracker.view();
    let conn = server.next_conn().await;
    wait_view(&mut view, |v| v.is_connected).await;
    conn.send_json(json!({"overall": 15}));
    wait_view(&mut view, |v| v.snapshot.overall == 15.0).await;

    assert!(tracker.reconnect().await);

    let _second = server.next_conn().await;
    assert_eq!(server.accepted(), 2);
    assert_eq!(tracker.snapshot().overall, 15.0);
    assert_eq!(tracker.job_id(), "job-1");
}

// ---------------------------------------------------------------------------
// Test: a second tracker on an active job sees the same progress
// ---------------------------------------------------------------------------

#[tokio::test]
async fn second_tracker_on_same_job_shares_the_store() {
    let mut server = TestServer::start().await;
    let manager = manager_for(&server, Duration::from_millis(100));
    let stores = StoreRegistry::new();

    let first = ProgressTracker::start(Arc::clone(&manager), &stores, "job-1")
        .await
        .unwrap();
    let mut first_view = first.view();
    let conn = server.next_conn().await;
    wait_view(&mut first_view, |v| v.is_connected).await;

    // Reuses the open channel and its handler.
    let second = ProgressTracker::start(Arc::clone(&manager), &stores, "job-1")
        .await
        .unwrap();
    let mut second_view = second.view();
    assert!(Arc::ptr_eq(first.store(), second.store()));

    conn.send_json(json!({"overall": 55}));
    wait_view(&mut first_view, |v| v.snapshot.overall == 55.0).await;
    let current = wait_view(&mut second_view, |v| v.snapshot.overall == 55.0).await;
    assert!(current.is_connected);

    server.expect_no_conn(Duration::from_millis(200)).await;
    assert_eq!(server.accepted(), 1);
    assert_eq!(stores.len().await, 1);
}
