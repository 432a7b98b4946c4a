//! Bounded retries around single outbound HTTP requests.
//!
//! Every upstream call in the bot goes through [`RetryingCaller::call`], which
//! classifies each response into a [`Disposition`] and either returns,
//! retries after a delay, or gives up with a typed [`CallError`].
//!
//! | Status            | Disposition    | Behaviour                                   |
//! |-------------------|----------------|---------------------------------------------|
//! | 2xx               | `Success`      | returned to the caller                      |
//! | 401               | `Unauthorized` | retried while auth retries remain           |
//! | 429               | `RateLimited`  | returned immediately, caller degrades       |
//! | 400, 403          | `Fatal`        | returned immediately, no retry              |
//! | anything else     | `Retryable`    | retried with backoff up to `max_attempts`   |
//!
//! Network errors and timeouts are retryable.

use std::future::Future;
use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::token::TokenError;

/// Longest response body kept in errors and logs.
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Error returned when a call does not produce a successful response.
#[derive(Debug, Error)]
pub enum CallError {
    /// Connection-level failure.
    #[error("network error: {message}")]
    Network { message: String },

    /// The request exceeded its timeout.
    #[error("request timed out")]
    Timeout,

    /// A retryable status persisted through every attempt.
    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Credentials were rejected and no auth retries remain.
    #[error("upstream rejected credentials (401): {body}")]
    Unauthorized { body: String },

    /// The upstream quota is exhausted.
    #[error("upstream rate limited the request (429)")]
    RateLimited,

    /// Client error that retrying cannot fix.
    #[error("fatal upstream response {status}: {body}")]
    Fatal { status: u16, body: String },

    /// Shutdown was requested.
    #[error("request cancelled")]
    Cancelled,

    /// A bearer token could not be obtained for the request.
    #[error("token unavailable: {0}")]
    Token(#[from] TokenError),

    /// The request could not be constructed.
    #[error("failed to build request: {message}")]
    Build { message: String },
}

impl CallError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::Timeout | Self::Status { .. } | Self::Unauthorized { .. }
        )
    }

    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_builder() {
            Self::Build {
                message: err.to_string(),
            }
        } else {
            Self::Network {
                message: err.to_string(),
            }
        }
    }
}

/// How a response status is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Success,
    Unauthorized,
    RateLimited,
    Fatal,
    Retryable,
}

/// Map a status code to its [`Disposition`].
pub fn classify_status(status: StatusCode) -> Disposition {
    match status {
        s if s.is_success() => Disposition::Success,
        StatusCode::UNAUTHORIZED => Disposition::Unauthorized,
        StatusCode::TOO_MANY_REQUESTS => Disposition::RateLimited,
        StatusCode::BAD_REQUEST | StatusCode::FORBIDDEN => Disposition::Fatal,
        _ => Disposition::Retryable,
    }
}

/// Delay growth between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay after every attempt.
    Fixed,
    /// `base * attempt`.
    Linear,
    /// `base * 2^(attempt - 1)`, capped at `max`.
    Exponential { max: Duration },
}

/// Retry budget for one kind of call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,

    /// Delay unit fed into [`Backoff`].
    pub base_delay: Duration,

    /// Delay growth.
    pub backoff: Backoff,

    /// How many 401 responses may trigger a token invalidation and retry.
    pub max_auth_retries: u32,
}

impl RetryPolicy {
    /// Fixed delay between attempts.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            backoff: Backoff::Fixed,
            max_auth_retries: 0,
        }
    }

    /// Linearly growing delay between attempts.
    pub fn linear(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            backoff: Backoff::Linear,
            ..Self::fixed(max_attempts, base_delay)
        }
    }

    /// Doubling delay between attempts, capped at `max`.
    pub fn exponential(max_attempts: u32, base_delay: Duration, max: Duration) -> Self {
        Self {
            backoff: Backoff::Exponential { max },
            ..Self::fixed(max_attempts, base_delay)
        }
    }

    /// Allow `n` token invalidations on 401.
    pub fn with_auth_retries(mut self, n: u32) -> Self {
        self.max_auth_retries = n;
        self
    }

    /// Delay to wait after the given (1-based) attempt fails.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Linear => self.base_delay.saturating_mul(attempt),
            Backoff::Exponential { max } => {
                let factor = 2u32.saturating_pow(attempt - 1);
                self.base_delay.saturating_mul(factor).min(max)
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(3, Duration::from_secs(5))
    }
}

/// Context handed to the request factory for each attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    /// 1-based attempt number.
    pub number: u32,

    /// The previous attempt was answered with 401; invalidate cached tokens
    /// before building this request.
    pub after_unauthorized: bool,
}

/// Executes requests with bounded retries.
#[derive(Debug, Clone)]
pub struct RetryingCaller {
    client: reqwest::Client,
}

impl RetryingCaller {
    /// Wrap a shared HTTP client.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// The underlying HTTP client, for building requests.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Execute a request produced by `make_request` under `policy`.
    ///
    /// The factory runs once per attempt so it can attach a fresh bearer
    /// token. Cancellation is checked before every attempt and during every
    /// backoff sleep; an in-flight request is left to finish or time out.
    pub async fn call<F, Fut>(
        &self,
        label: &str,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
        mut make_request: F,
    ) -> Result<Response, CallError>
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = Result<RequestBuilder, CallError>>,
    {
        let max_attempts = policy.max_attempts.max(1);
        let mut auth_retries_left = policy.max_auth_retries;
        let mut after_unauthorized = false;
        let mut last_error = None;

        for number in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(CallError::Cancelled);
            }

            let request = make_request(Attempt {
                number,
                after_unauthorized,
            })
            .await?;
            after_unauthorized = false;

            let error = match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    match classify_status(status) {
                        Disposition::Success => {
                            debug!(
                                call = label,
                                attempt = number,
                                status = status.as_u16(),
                                "request succeeded"
                            );
                            return Ok(response);
                        }
                        Disposition::RateLimited => {
                            warn!(call = label, attempt = number, "rate limited (429)");
                            return Err(CallError::RateLimited);
                        }
                        Disposition::Fatal => {
                            let body = read_body(response).await;
                            error!(
                                call = label,
                                attempt = number,
                                status = status.as_u16(),
                                body = %body,
                                "fatal client error, not retrying"
                            );
                            return Err(CallError::Fatal {
                                status: status.as_u16(),
                                body,
                            });
                        }
                        Disposition::Unauthorized => {
                            let body = read_body(response).await;
                            if auth_retries_left == 0 {
                                warn!(
                                    call = label,
                                    attempt = number,
                                    "authentication failed (401), no auth retries left"
                                );
                                return Err(CallError::Unauthorized { body });
                            }
                            auth_retries_left -= 1;
                            after_unauthorized = true;
                            warn!(
                                call = label,
                                attempt = number,
                                max_attempts,
                                "authentication failed (401), will retry with a new token"
                            );
                            CallError::Unauthorized { body }
                        }
                        Disposition::Retryable => {
                            let body = read_body(response).await;
                            warn!(
                                call = label,
                                attempt = number,
                                max_attempts,
                                status = status.as_u16(),
                                "upstream error"
                            );
                            CallError::Status {
                                status: status.as_u16(),
                                body,
                            }
                        }
                    }
                }
                Err(err) => {
                    let error = CallError::from_reqwest(err);
                    if matches!(error, CallError::Build { .. }) {
                        return Err(error);
                    }
                    warn!(
                        call = label,
                        attempt = number,
                        max_attempts,
                        error = %error,
                        "request failed"
                    );
                    error
                }
            };

            if number < max_attempts {
                let delay = policy.delay_for(number);
                debug!(
                    call = label,
                    delay_ms = delay.as_millis() as u64,
                    "backing off before retry"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(CallError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            last_error = Some(error);
        }

        let error = last_error.unwrap_or(CallError::Cancelled);
        error!(call = label, max_attempts, error = %error, "all attempts failed");
        Err(error)
    }
}

async fn read_body(response: Response) -> String {
    let text = response.text().await.unwrap_or_default();
    truncate(&text, MAX_ERROR_BODY_CHARS)
}

/// Truncate on a char boundary, appending `...` when shortened.
pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{head}...")
}
