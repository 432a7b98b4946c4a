//! Blog-hosting API client.
//!
//! Every request carries a bearer token from the shared [`TokenProvider`].
//! A 401 invalidates the cached token and the request is retried once with
//! a freshly obtained one.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::retry::{Attempt, CallError, RetryPolicy, RetryingCaller};
use crate::token::{TokenError, TokenProvider};

pub const DEFAULT_BLOG_API_BASE: &str = "https://www.googleapis.com/blogger/v3";

/// Error type for blog operations.
#[derive(Debug, Error)]
pub enum PublishError {
    /// No bearer token could be obtained.
    #[error("no usable access token: {0}")]
    Token(#[source] TokenError),

    /// The upstream call failed.
    #[error("blog API call failed: {0}")]
    Call(#[source] CallError),

    /// The upstream answered 2xx with an unexpected body.
    #[error("unexpected blog API response: {message}")]
    InvalidResponse { message: String },

    /// Shutdown was requested.
    #[error("blog request cancelled")]
    Cancelled,
}

impl From<CallError> for PublishError {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Token(e) => Self::Token(e),
            CallError::Cancelled => Self::Cancelled,
            other => Self::Call(other),
        }
    }
}

/// Labels attached to every post unless configured otherwise.
pub fn default_labels(year: i32) -> Vec<String> {
    ["amazon", "affiliate", "review", "deals"]
        .into_iter()
        .map(str::to_string)
        .chain([year.to_string()])
        .chain(["shopping", "products"].into_iter().map(str::to_string))
        .collect()
}

/// Blog API settings.
#[derive(Debug, Clone)]
pub struct BloggerConfig {
    pub api_base: String,
    pub blog_id: String,
    pub labels: Vec<String>,
    pub verify_timeout: Duration,
    pub publish_timeout: Duration,
    pub policy: RetryPolicy,
}

impl BloggerConfig {
    pub fn new(blog_id: impl Into<String>) -> Self {
        Self {
            api_base: DEFAULT_BLOG_API_BASE.to_string(),
            blog_id: blog_id.into(),
            labels: default_labels(Utc::now().year()),
            verify_timeout: Duration::from_secs(15),
            publish_timeout: Duration::from_secs(30),
            policy: RetryPolicy::fixed(3, Duration::from_secs(5)).with_auth_retries(1),
        }
    }
}

/// A post ready to publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlogPost {
    pub title: String,
    /// Full HTML.
    pub content: String,
    pub labels: Vec<String>,
}

/// What the blog API reports after publishing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PublishedPost {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// Blog metadata returned by the access check.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BlogInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// Authenticated client for one blog.
#[derive(Clone)]
pub struct BloggerClient {
    caller: RetryingCaller,
    tokens: Arc<dyn TokenProvider>,
    config: BloggerConfig,
}

impl BloggerClient {
    pub fn new(
        caller: RetryingCaller,
        tokens: Arc<dyn TokenProvider>,
        config: BloggerConfig,
    ) -> Self {
        Self {
            caller,
            tokens,
            config,
        }
    }

    pub fn config(&self) -> &BloggerConfig {
        &self.config
    }

    /// Build a post with the configured labels.
    pub fn post(&self, title: impl Into<String>, content: impl Into<String>) -> BlogPost {
        BlogPost {
            title: title.into(),
            content: content.into(),
            labels: self.config.labels.clone(),
        }
    }

    fn blog_url(&self) -> String {
        format!(
            "{}/blogs/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.blog_id
        )
    }

    /// Fetch a bearer token for `attempt`, invalidating after a 401.
    async fn bearer(&self, attempt: Attempt) -> Result<String, CallError> {
        if attempt.after_unauthorized {
            self.tokens.invalidate();
        }
        let token = self.tokens.get_valid_token().await?;
        Ok(token.expose().to_string())
    }

    /// Confirm the blog exists and the credential can read it.
    pub async fn verify_access(
        &self,
        cancel: &CancellationToken,
    ) -> Result<BlogInfo, PublishError> {
        let url = self.blog_url();
        let response = self
            .caller
            .call("verify_blog", &self.config.policy, cancel, |attempt| {
                let url = &url;
                async move {
                    let token = self.bearer(attempt).await?;
                    Ok(self
                        .caller
                        .client()
                        .get(url)
                        .bearer_auth(token)
                        .timeout(self.config.verify_timeout))
                }
            })
            .await?;

        let info: BlogInfo = response.json().await.map_err(|e| PublishError::InvalidResponse {
            message: e.to_string(),
        })?;
        tracing::info!(blog = %info.name, "blog access verified");
        Ok(info)
    }

    /// Publish `post`.
    pub async fn create_post(
        &self,
        post: &BlogPost,
        cancel: &CancellationToken,
    ) -> Result<PublishedPost, PublishError> {
        let url = format!("{}/posts", self.blog_url());
        let response = self
            .caller
            .call("create_post", &self.config.policy, cancel, |attempt| {
                let url = &url;
                async move {
                    let token = self.bearer(attempt).await?;
                    Ok(self
                        .caller
                        .client()
                        .post(url)
                        .bearer_auth(token)
                        .timeout(self.config.publish_timeout)
                        .json(post))
                }
            })
            .await?;

        let published: PublishedPost =
            response.json().await.map_err(|e| PublishError::InvalidResponse {
                message: e.to_string(),
            })?;
        tracing::info!(
            post_id = %published.id,
            url = published.url.as_deref().unwrap_or(""),
            "post published"
        );
        Ok(published)
    }
}
