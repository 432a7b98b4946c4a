//! Integration tests for health server shutdown.
//!
//! The server must stop cleanly both through its handle and through the
//! shutdown token it was started with.

use std::time::Duration;

use postforge_core::scheduler::SharedStats;
use postforge_daemon::api::{ApiState, start_server};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

fn state() -> ApiState {
    ApiState::new("https://deals.example", Duration::from_secs(3600), SharedStats::new())
}

#[tokio::test]
async fn test_graceful_shutdown() {
    let handle = start_server("127.0.0.1:0".parse().unwrap(), state(), CancellationToken::new())
        .await
        .expect("Failed to start server");
    let url = format!("http://{}/health", handle.local_addr());

    assert_eq!(reqwest::get(&url).await.unwrap().text().await.unwrap(), "OK");

    timeout(Duration::from_secs(5), handle.stop())
        .await
        .expect("Server stop timed out")
        .expect("Server stop should succeed");

    assert!(reqwest::get(&url).await.is_err(), "port should be closed after stop");
}

#[tokio::test]
async fn test_shutdown_token_stops_server() {
    let shutdown = CancellationToken::new();
    let handle = start_server("127.0.0.1:0".parse().unwrap(), state(), shutdown.clone())
        .await
        .expect("Failed to start server");
    let url = format!("http://{}/health", handle.local_addr());

    shutdown.cancel();
    sleep(Duration::from_millis(100)).await;

    assert!(reqwest::get(&url).await.is_err());
    handle.stop().await.expect("stop after cancel should succeed");
}

#[tokio::test]
async fn test_bind_conflict_is_reported() {
    let first = start_server("127.0.0.1:0".parse().unwrap(), state(), CancellationToken::new())
        .await
        .unwrap();

    let second = start_server(first.local_addr(), state(), CancellationToken::new()).await;

    let err = second.err().expect("binding a used port must fail");
    assert!(err.to_string().contains("Failed to bind health server"));
    first.stop().await.unwrap();
}
