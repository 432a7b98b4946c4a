//! Health API handlers.

use std::sync::Arc;
use std::time::Duration;

use axum::{Json, Router, extract::State, routing::get};
use chrono::Utc;
use postforge_core::{scheduler::SharedStats, token::TokenProvider};

use super::types::StatsResponse;

/// State shared across handlers.
#[derive(Clone)]
pub struct ApiState {
    pub blog_url: String,
    pub posting_interval: Duration,
    pub stats: SharedStats,
    /// Read only for its status; handlers never fetch tokens.
    pub tokens: Option<Arc<dyn TokenProvider>>,
}

impl ApiState {
    pub fn new(
        blog_url: impl Into<String>,
        posting_interval: Duration,
        stats: SharedStats,
    ) -> Self {
        Self {
            blog_url: blog_url.into(),
            posting_interval,
            stats,
            tokens: None,
        }
    }

    pub fn with_tokens(mut self, tokens: Arc<dyn TokenProvider>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    fn interval_text(&self) -> String {
        format!("{} minutes", self.posting_interval.as_secs() / 60)
    }
}

/// Build the health router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .with_state(state)
}

async fn index(State(state): State<ApiState>) -> String {
    format!(
        "Affiliate blog bot is running. Blog: {} | Posting every {}",
        state.blog_url,
        state.interval_text()
    )
}

async fn health() -> &'static str {
    "OK"
}

async fn stats(State(state): State<ApiState>) -> Json<StatsResponse> {
    let snapshot = state.stats.snapshot();
    Json(StatsResponse {
        status: if snapshot.running { "running" } else { "stopped" }.to_string(),
        blog: state.blog_url.clone(),
        posting_interval: state.interval_text(),
        last_check: Utc::now(),
        started_at: snapshot.started_at,
        post_count: snapshot.post_count,
        successes: snapshot.successes,
        failures: snapshot.failures,
        consecutive_failures: snapshot.consecutive_failures,
        last_success_at: snapshot.last_success_at,
        token_status: state.tokens.as_ref().map(|t| t.status()),
    })
}
