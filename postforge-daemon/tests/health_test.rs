//! Integration tests for the health endpoints.

use std::sync::Arc;
use std::time::Duration;

use postforge_core::{
    retry::RetryingCaller,
    scheduler::SharedStats,
    store::Credential,
    token::{TokenProvider, TokenStatus},
    token_manager::{DefaultTokenManager, TokenEndpoint, TokenManagerConfig},
};
use postforge_daemon::api::{ApiState, ServerHandle, StatsResponse, start_server};
use tokio_util::sync::CancellationToken;

async fn serve(state: ApiState) -> (ServerHandle, String) {
    let handle = start_server("127.0.0.1:0".parse().unwrap(), state, CancellationToken::new())
        .await
        .expect("Failed to start server");
    let base = format!("http://{}", handle.local_addr());
    (handle, base)
}

fn state() -> ApiState {
    ApiState::new(
        "https://deals.example",
        Duration::from_secs(3600),
        SharedStats::new(),
    )
}

#[tokio::test]
async fn test_index_describes_bot() {
    let (handle, base) = serve(state()).await;

    let body = reqwest::get(format!("{base}/")).await.unwrap().text().await.unwrap();

    assert_eq!(
        body,
        "Affiliate blog bot is running. Blog: https://deals.example | Posting every 60 minutes"
    );
    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_health_returns_ok() {
    let (handle, base) = serve(state()).await;

    let response = reqwest::get(format!("{base}/health")).await.unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "OK");
    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_stats_without_credential() {
    let (handle, base) = serve(state()).await;

    let stats: StatsResponse = reqwest::get(format!("{base}/stats"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(stats.status, "stopped");
    assert_eq!(stats.blog, "https://deals.example");
    assert_eq!(stats.posting_interval, "60 minutes");
    assert_eq!(stats.post_count, 0);
    assert!(stats.last_success_at.is_none());
    assert_eq!(stats.token_status, None);
    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_stats_reports_token_status() {
    let tokens = Arc::new(DefaultTokenManager::new(
        Some(Credential::new("ya29.direct")),
        TokenEndpoint::new("http://127.0.0.1:9/token"),
        RetryingCaller::new(reqwest::Client::new()),
        TokenManagerConfig::default(),
    ));
    tokens.get_valid_token().await.unwrap();
    let (handle, base) = serve(state().with_tokens(tokens)).await;

    let body: serde_json::Value = reqwest::get(format!("{base}/stats"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["token_status"], "valid");
    assert_eq!(
        serde_json::from_value::<TokenStatus>(body["token_status"].clone()).unwrap(),
        TokenStatus::Valid
    );
    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let (handle, base) = serve(state()).await;

    let response = reqwest::get(format!("{base}/posts")).await.unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    handle.stop().await.unwrap();
}
