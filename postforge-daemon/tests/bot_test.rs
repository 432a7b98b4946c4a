//! Integration tests for bot wiring against a mock blog API.

use postforge_core::store::Secret;
use postforge_daemon::{Bot, BotConfig};
use tokio_util::sync::CancellationToken;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{header, method, path},
};

fn config(server: &MockServer) -> BotConfig {
    let mut config = BotConfig::default();
    config.blog.id = "42".to_string();
    config.blog.url = "https://deals.example".to_string();
    config.blog.api_base = server.uri();
    config.affiliate.tag = "shop-20".to_string();
    config.oauth.token = Some(Secret::new("ya29.direct"));
    config
}

#[tokio::test]
async fn test_verify_blog_access() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/blogs/42"))
        .and(header("authorization", "Bearer ya29.direct"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "42",
            "name": "Daily Deals",
            "url": "https://deals.example"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let bot = Bot::from_config(config(&server), &cancel).unwrap();

    let info = bot.verify_blog_access(&cancel).await.unwrap().unwrap();

    assert_eq!(info.name, "Daily Deals");
}

#[tokio::test]
async fn test_verify_blog_access_forbidden() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/blogs/42"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let bot = Bot::from_config(config(&server), &cancel).unwrap();

    let err = bot.verify_blog_access(&cancel).await.unwrap_err();

    assert!(format!("{:#}", err).contains("Blog access verification failed"));
}
