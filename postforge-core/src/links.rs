//! Affiliate links and URL shortening.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::retry::{CallError, RetryPolicy, RetryingCaller};
use crate::store::Secret;

pub const DEFAULT_MARKETPLACE_BASE: &str = "https://www.amazon.com";
pub const DEFAULT_SHORTENER_BASE: &str = "https://api-ssl.bitly.com/v4";

/// Build the affiliate product URL for `identifier`.
///
/// `{base}/dp/{identifier}?tag={tag}&linkCode=as2&camp=1789&creative=9325`
pub fn affiliate_url(base: &str, identifier: &str, tag: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(base)?;
    url.path_segments_mut()
        .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
        .pop_if_empty()
        .extend(["dp", identifier]);
    url.query_pairs_mut()
        .append_pair("tag", tag)
        .append_pair("linkCode", "as2")
        .append_pair("camp", "1789")
        .append_pair("creative", "9325");
    Ok(url)
}

/// Link-shortener connection settings.
#[derive(Debug, Clone)]
pub struct ShortenerConfig {
    pub api_base: String,
    pub domain: String,
    pub timeout: Duration,
    pub policy: RetryPolicy,
}

impl Default for ShortenerConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_SHORTENER_BASE.to_string(),
            domain: "bit.ly".to_string(),
            timeout: Duration::from_secs(15),
            policy: RetryPolicy::fixed(3, Duration::from_secs(5)),
        }
    }
}

/// Result of a shortening attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShortenedLink {
    pub url: String,

    /// False when the original URL is used as a fallback.
    pub shortened: bool,
}

impl ShortenedLink {
    fn original(url: &str) -> Self {
        Self {
            url: url.to_string(),
            shortened: false,
        }
    }
}

#[derive(Serialize)]
struct ShortenRequest<'a> {
    long_url: &'a str,
    domain: &'a str,
}

#[derive(Deserialize)]
struct ShortenResponse {
    link: Option<String>,
}

/// Client for the link-shortening API.
///
/// Shortening is best effort: every failure falls back to the long URL.
#[derive(Debug, Clone)]
pub struct LinkShortener {
    caller: RetryingCaller,
    token: Option<Secret>,
    config: ShortenerConfig,
}

impl LinkShortener {
    pub fn new(caller: RetryingCaller, token: Option<Secret>, config: ShortenerConfig) -> Self {
        Self {
            caller,
            token,
            config,
        }
    }

    /// Shorten `long_url`, or return it unchanged.
    pub async fn shorten(&self, long_url: &str, cancel: &CancellationToken) -> ShortenedLink {
        let Some(token) = &self.token else {
            tracing::debug!("no shortener token configured, using original URL");
            return ShortenedLink::original(long_url);
        };

        let endpoint = format!("{}/shorten", self.config.api_base.trim_end_matches('/'));
        let body = ShortenRequest {
            long_url,
            domain: &self.config.domain,
        };

        let result = self
            .caller
            .call("shorten_url", &self.config.policy, cancel, |_| {
                std::future::ready(Ok(self
                    .caller
                    .client()
                    .post(&endpoint)
                    .bearer_auth(token.expose())
                    .timeout(self.config.timeout)
                    .json(&body)))
            })
            .await;

        match result {
            Ok(response) => match response.json::<ShortenResponse>().await {
                Ok(ShortenResponse { link: Some(link) }) if !link.is_empty() => {
                    tracing::info!(short_url = %link, "URL shortened");
                    ShortenedLink {
                        url: link,
                        shortened: true,
                    }
                }
                Ok(_) => {
                    tracing::warn!("shortener response has no link, using original URL");
                    ShortenedLink::original(long_url)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "unreadable shortener response, using original URL");
                    ShortenedLink::original(long_url)
                }
            },
            Err(CallError::RateLimited) => {
                tracing::warn!("shortener quota reached, using original URL");
                ShortenedLink::original(long_url)
            }
            Err(e) => {
                tracing::warn!(error = %e, "URL shortening failed, using original URL");
                ShortenedLink::original(long_url)
            }
        }
    }
}
