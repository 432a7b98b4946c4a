//! Default implementation of the TokenProvider trait.
//!
//! This module provides [`DefaultTokenManager`], which turns the configured
//! blog credential into usable bearer tokens.
//!
//! # Features
//!
//! - Classifies the credential as an access or refresh token
//! - Refreshes through the OAuth2 refresh-token grant when the cache is stale
//! - Caches exactly one token, replaced wholesale on refresh
//! - Configurable expiry buffer and access-token grace window
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use postforge_core::{
//!     retry::RetryingCaller,
//!     store::Credential,
//!     token::TokenProvider,
//!     token_manager::{DefaultTokenManager, TokenEndpoint, TokenManagerConfig},
//! };
//!
//! let caller = RetryingCaller::new(reqwest::Client::new());
//! let credential = Credential::new("1//refresh").with_client("id", "secret");
//! let manager = DefaultTokenManager::new(
//!     Some(credential),
//!     TokenEndpoint::default(),
//!     caller,
//!     TokenManagerConfig::default(),
//! );
//!
//! let token = manager.get_valid_token().await?;
//! # let _ = token;
//! # Ok(())
//! # }
//! ```

use std::future::ready;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::{
    retry::{CallError, RetryPolicy, RetryingCaller},
    store::{Credential, Secret},
    token::{CachedToken, TokenError, TokenKind, TokenProvider, TokenStatus, expiry_after},
};

/// Google's OAuth2 token endpoint.
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Default expiry buffer in seconds.
///
/// Tokens are considered stale this long before they nominally expire.
const DEFAULT_EXPIRY_BUFFER_SECS: i64 = 300;

/// Default grace window in seconds for directly supplied access tokens.
const DEFAULT_GRACE_WINDOW_SECS: i64 = 300;

/// Lifetime assumed for a raw access token, whose real expiry is unknown.
const ASSUMED_ACCESS_LIFETIME_SECS: i64 = 3600;

/// Used when the token endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Longest `expires_in` accepted from the token endpoint.
const MAX_EXPIRES_IN_SECS: i64 = 24 * 60 * 60;

/// Where and how to reach the OAuth token endpoint.
#[derive(Debug, Clone)]
pub struct TokenEndpoint {
    pub url: String,
    pub timeout: StdDuration,
}

impl TokenEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

impl Default for TokenEndpoint {
    fn default() -> Self {
        Self {
            url: DEFAULT_TOKEN_URL.to_string(),
            timeout: StdDuration::from_secs(20),
        }
    }
}

/// Tunables for [`DefaultTokenManager`].
#[derive(Debug, Clone)]
pub struct TokenManagerConfig {
    /// Treat tokens as stale this long before nominal expiry.
    pub expiry_buffer: Duration,

    /// How long past nominal expiry a raw access token is still handed out.
    /// Zero disables the grace window.
    pub grace_window: Duration,

    /// Expiry assigned to a raw access token on first use.
    pub assumed_access_lifetime: Duration,

    /// Expiry used when a refresh response carries no `expires_in`.
    pub default_expires_in: Duration,

    /// Retry budget for the refresh request.
    pub refresh_policy: RetryPolicy,
}

impl Default for TokenManagerConfig {
    fn default() -> Self {
        Self {
            expiry_buffer: Duration::seconds(DEFAULT_EXPIRY_BUFFER_SECS),
            grace_window: Duration::seconds(DEFAULT_GRACE_WINDOW_SECS),
            assumed_access_lifetime: Duration::seconds(ASSUMED_ACCESS_LIFETIME_SECS),
            default_expires_in: Duration::seconds(DEFAULT_EXPIRES_IN_SECS),
            refresh_policy: RetryPolicy::fixed(3, StdDuration::from_secs(2)),
        }
    }
}

/// Reason the manager stopped trying.
#[derive(Debug, Clone)]
enum FailedReason {
    MissingClientCredentials,
    InvalidCredential(String),
}

impl FailedReason {
    fn to_error(&self) -> TokenError {
        match self {
            Self::MissingClientCredentials => TokenError::MissingClientCredentials,
            Self::InvalidCredential(message) => TokenError::InvalidCredential {
                message: message.clone(),
            },
        }
    }
}

#[derive(Debug)]
enum TokenState {
    /// Credential classified, nothing cached.
    Empty,
    Cached(CachedToken),
    /// Reconfiguration required; no further network calls are made.
    Failed(FailedReason),
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: Option<String>,
    expires_in: Option<i64>,
}

/// Default implementation of TokenProvider.
///
/// This implementation:
/// - Hands out the configured access token directly (with expiry bookkeeping)
/// - Exchanges a refresh token for access tokens via the configured endpoint
/// - Serves the cached token without network calls while it is fresh
pub struct DefaultTokenManager {
    credential: Option<Credential>,
    kind: Option<TokenKind>,
    endpoint: TokenEndpoint,
    caller: RetryingCaller,
    config: TokenManagerConfig,
    state: Mutex<TokenState>,
    /// Nominal expiry of a configured access token, stamped once.
    access_expiry: Mutex<Option<DateTime<Utc>>>,
    cancel: CancellationToken,
}

impl DefaultTokenManager {
    /// Create a token manager for the given credential.
    ///
    /// The credential is classified immediately.
    pub fn new(
        credential: Option<Credential>,
        endpoint: TokenEndpoint,
        caller: RetryingCaller,
        config: TokenManagerConfig,
    ) -> Self {
        let kind = credential.as_ref().map(Credential::token_kind);
        if let Some(kind) = kind {
            tracing::debug!(%kind, "classified OAuth credential");
        }

        Self {
            credential,
            kind,
            endpoint,
            caller,
            config,
            state: Mutex::new(TokenState::Empty),
            access_expiry: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Abort in-progress refresh retries when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The resolved credential kind, if a credential is configured.
    pub fn kind(&self) -> Option<TokenKind> {
        self.kind
    }

    /// The configured credential.
    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    /// Install a token directly, replacing whatever is cached.
    pub fn seed(&self, token: CachedToken) {
        let mut state = self.state.lock();
        if self.kind == Some(TokenKind::AccessToken) && token.kind == TokenKind::AccessToken {
            *self.access_expiry.lock() = Some(token.expires_at);
        }
        *state = TokenState::Cached(token);
    }

    fn access_token(&self, credential: &Credential) -> Result<Secret, TokenError> {
        let mut state = self.state.lock();

        let token = match &*state {
            TokenState::Cached(token) => token.clone(),
            _ => {
                // Invalidation drops the cache but not the nominal expiry.
                let expires_at = *self
                    .access_expiry
                    .lock()
                    .get_or_insert_with(|| expiry_after(self.config.assumed_access_lifetime));
                let token = CachedToken::expiring_at(
                    credential.raw_token.expose(),
                    expires_at,
                    TokenKind::AccessToken,
                );
                tracing::info!(%expires_at, "using configured access token directly");
                *state = TokenState::Cached(token.clone());
                token
            }
        };

        if token.is_fresh(self.config.expiry_buffer) {
            return Ok(token.value);
        }
        if token.within_grace(self.config.grace_window) {
            tracing::warn!(
                expires_at = %token.expires_at,
                "access token is stale and cannot be refreshed, using it anyway"
            );
            return Ok(token.value);
        }
        tracing::error!(
            expires_at = %token.expires_at,
            "access token is past its grace window; supply a new token or a refresh token"
        );
        Err(TokenError::Expired {
            expires_at: token.expires_at,
        })
    }

    async fn refreshed_token(&self, credential: &Credential) -> Result<Secret, TokenError> {
        if !credential.has_client_credentials() {
            tracing::error!(
                "refresh token configured without client ID and secret; token refresh is impossible"
            );
            *self.state.lock() = TokenState::Failed(FailedReason::MissingClientCredentials);
            return Err(TokenError::MissingClientCredentials);
        }

        match self.refresh(credential).await {
            Ok(token) => {
                let value = token.value.clone();
                tracing::info!(expires_at = %token.expires_at, "access token refreshed");
                *self.state.lock() = TokenState::Cached(token);
                Ok(value)
            }
            Err(TokenError::InvalidCredential { message }) => {
                tracing::error!(%message, "token endpoint rejected the refresh token");
                *self.state.lock() =
                    TokenState::Failed(FailedReason::InvalidCredential(message.clone()));
                Err(TokenError::InvalidCredential { message })
            }
            Err(e) => {
                tracing::error!(error = %e, "token refresh failed");
                Err(e)
            }
        }
    }

    /// Perform the refresh-token grant.
    ///
    /// Never touches the cache; the caller installs the result.
    async fn refresh(&self, credential: &Credential) -> Result<CachedToken, TokenError> {
        let client_id = credential.client_id.as_deref().unwrap_or_default();
        let client_secret = credential
            .client_secret
            .as_ref()
            .map(Secret::expose)
            .unwrap_or_default();
        let form = [
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("refresh_token", credential.raw_token.expose()),
            ("grant_type", "refresh_token"),
        ];

        tracing::info!(endpoint = %self.endpoint.url, "refreshing access token");

        let response = self
            .caller
            .call("oauth_refresh", &self.config.refresh_policy, &self.cancel, |_| {
                ready(Ok(self
                    .caller
                    .client()
                    .post(&self.endpoint.url)
                    .timeout(self.endpoint.timeout)
                    .form(&form)))
            })
            .await
            .map_err(|e| match e {
                CallError::Fatal { status: 400, body } | CallError::Unauthorized { body } => {
                    TokenError::InvalidCredential { message: body }
                }
                CallError::Cancelled => TokenError::Cancelled,
                other => TokenError::RefreshFailed {
                    message: other.to_string(),
                },
            })?;

        let body: RefreshResponse = response.json().await.map_err(|e| TokenError::RefreshFailed {
            message: format!("invalid token response: {}", e),
        })?;

        let access_token = body
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| TokenError::RefreshFailed {
                message: "token response has no access_token".to_string(),
            })?;

        let lifetime = match body.expires_in {
            None => self.config.default_expires_in,
            Some(secs) => Duration::try_seconds(secs)
                .filter(|_| (1..=MAX_EXPIRES_IN_SECS).contains(&secs))
                .unwrap_or_else(|| {
                    tracing::warn!(
                        expires_in = secs,
                        "token endpoint returned an out-of-range expires_in, using the default"
                    );
                    self.config.default_expires_in
                }),
        };

        Ok(CachedToken::new(access_token, lifetime, TokenKind::AccessToken))
    }
}

#[async_trait]
impl TokenProvider for DefaultTokenManager {
    async fn get_valid_token(&self) -> Result<Secret, TokenError> {
        let (credential, kind) = match (&self.credential, self.kind) {
            (Some(credential), Some(kind)) => (credential, kind),
            _ => return Err(TokenError::NoCredential),
        };

        {
            let state = self.state.lock();
            match &*state {
                TokenState::Failed(reason) => return Err(reason.to_error()),
                TokenState::Cached(token) if token.is_fresh(self.config.expiry_buffer) => {
                    tracing::debug!("using cached access token");
                    return Ok(token.value.clone());
                }
                _ => {}
            }
        }

        match kind {
            TokenKind::AccessToken => self.access_token(credential),
            TokenKind::RefreshToken => self.refreshed_token(credential).await,
        }
    }

    fn invalidate(&self) {
        let mut state = self.state.lock();
        if matches!(&*state, TokenState::Cached(_)) {
            tracing::info!("invalidating cached access token");
            *state = TokenState::Empty;
        }
    }

    fn status(&self) -> TokenStatus {
        if self.credential.is_none() {
            return TokenStatus::Failed;
        }
        match &*self.state.lock() {
            TokenState::Empty => TokenStatus::Uninitialized,
            TokenState::Cached(token) if token.is_fresh(self.config.expiry_buffer) => {
                TokenStatus::Valid
            }
            TokenState::Cached(_) => TokenStatus::Stale,
            TokenState::Failed(_) => TokenStatus::Failed,
        }
    }
}
