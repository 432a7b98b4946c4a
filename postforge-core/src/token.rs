//! Token classification and lifecycle types.
//!
//! This module provides:
//! - [`TokenKind`] / [`CredentialKind`] - What a configured credential is
//! - [`classify`] - Prefix heuristic used when the kind is not configured
//! - [`CachedToken`] - The single live access token and its expiry
//! - [`TokenProvider`] - Trait for anything that hands out bearer tokens

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::Secret;

/// Error type for token operations.
#[derive(Debug, Error)]
pub enum TokenError {
    /// No OAuth credential was configured.
    #[error("no OAuth credential configured")]
    NoCredential,

    /// A refresh token was supplied without a client ID and secret.
    #[error("refresh token supplied but client credentials are missing")]
    MissingClientCredentials,

    /// The token endpoint rejected the credential outright.
    #[error("credential rejected by token endpoint: {message}")]
    InvalidCredential { message: String },

    /// Token refresh failed.
    #[error("token refresh failed: {message}")]
    RefreshFailed { message: String },

    /// A directly supplied access token is past its grace window.
    #[error("access token expired at {expires_at} and cannot be refreshed")]
    Expired { expires_at: DateTime<Utc> },

    /// Shutdown was requested while acquiring a token.
    #[error("token acquisition cancelled")]
    Cancelled,
}

impl TokenError {
    /// Whether retrying later could succeed without a configuration change.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RefreshFailed { .. } | Self::Cancelled)
    }
}

/// The two shapes of OAuth credential the bot understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Short-lived bearer credential used directly in API calls.
    AccessToken,
    /// Long-lived credential exchanged for access tokens.
    RefreshToken,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccessToken => "access_token",
            Self::RefreshToken => "refresh_token",
        }
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configured credential kind.
///
/// `Auto` falls back to [`classify`]; the explicit variants skip it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialKind {
    #[default]
    Auto,
    Access,
    Refresh,
}

impl std::str::FromStr for CredentialKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(Self::Auto),
            "access" | "access_token" => Ok(Self::Access),
            "refresh" | "refresh_token" => Ok(Self::Refresh),
            other => Err(format!(
                "unknown credential kind '{other}' (expected auto, access or refresh)"
            )),
        }
    }
}

const ACCESS_TOKEN_PREFIX: &str = "ya29.";
const REFRESH_TOKEN_PREFIX: &str = "1//";

/// Classify a raw credential by its format.
///
/// - `ya29.` prefix: access token
/// - `1//` prefix: refresh token
/// - three dot-separated segments (JWT shaped): access token
/// - anything else is ambiguous and handled as a refresh token
pub fn classify(raw: &str) -> TokenKind {
    let raw = raw.trim();

    if raw.starts_with(ACCESS_TOKEN_PREFIX) {
        return TokenKind::AccessToken;
    }
    if raw.starts_with(REFRESH_TOKEN_PREFIX) {
        return TokenKind::RefreshToken;
    }

    let segments: Vec<&str> = raw.split('.').collect();
    if segments.len() == 3 && segments.iter().all(|s| !s.is_empty()) {
        return TokenKind::AccessToken;
    }

    TokenKind::RefreshToken
}

/// The single live access token.
#[derive(Debug, Clone)]
pub struct CachedToken {
    /// Bearer value.
    pub value: Secret,

    /// Nominal expiry.
    pub expires_at: DateTime<Utc>,

    /// Whether the value came straight from configuration or from a refresh.
    pub kind: TokenKind,
}

impl CachedToken {
    /// Create a cached token expiring `lifetime` from now.
    ///
    /// A lifetime past the representable range saturates.
    pub fn new(value: impl Into<String>, lifetime: Duration, kind: TokenKind) -> Self {
        Self {
            value: Secret::new(value),
            expires_at: expiry_after(lifetime),
            kind,
        }
    }

    /// Create a cached token with an absolute expiry.
    pub fn expiring_at(
        value: impl Into<String>,
        expires_at: DateTime<Utc>,
        kind: TokenKind,
    ) -> Self {
        Self {
            value: Secret::new(value),
            expires_at,
            kind,
        }
    }

    /// Usable without refresh: `now < expires_at - buffer`.
    pub fn is_fresh(&self, buffer: Duration) -> bool {
        self.expires_at
            .checked_sub_signed(buffer)
            .is_some_and(|stale_at| Utc::now() < stale_at)
    }

    /// Still inside the best-effort window past nominal expiry.
    pub fn within_grace(&self, grace: Duration) -> bool {
        self.expires_at
            .checked_add_signed(grace)
            .is_none_or(|end| Utc::now() < end)
    }
}

/// `now + lifetime`, saturating at the latest representable time.
pub fn expiry_after(lifetime: Duration) -> DateTime<Utc> {
    Utc::now()
        .checked_add_signed(lifetime)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Coarse token state, safe to expose on diagnostics endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    /// No token obtained yet (or the cache was invalidated).
    Uninitialized,
    /// A fresh token is cached.
    Valid,
    /// The cached token is inside the expiry buffer or grace window.
    Stale,
    /// The credential cannot produce tokens without reconfiguration.
    Failed,
}

/// Trait for handing out bearer tokens to authenticated calls.
///
/// # Example
///
/// ```rust,ignore
/// use postforge_core::token::TokenProvider;
///
/// async fn bearer(tokens: &dyn TokenProvider) -> Result<String, TokenError> {
///     let token = tokens.get_valid_token().await?;
///     Ok(format!("Bearer {}", token.expose()))
/// }
/// ```
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Return a usable access token, refreshing if necessary.
    async fn get_valid_token(&self) -> Result<Secret, TokenError>;

    /// Drop the cached token so the next call obtains a new one.
    ///
    /// Called after the upstream API answers 401.
    fn invalidate(&self);

    /// Current state without touching the network.
    fn status(&self) -> TokenStatus;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_huge_lifetime_saturates() {
        let token = CachedToken::new("ya29.x", Duration::MAX, TokenKind::AccessToken);
        assert_eq!(token.expires_at, DateTime::<Utc>::MAX_UTC);
        assert!(token.is_fresh(Duration::seconds(300)));
        assert!(token.within_grace(Duration::seconds(300)));
    }

    #[test]
    fn test_freshness_near_time_bounds() {
        let ancient =
            CachedToken::expiring_at("ya29.x", DateTime::<Utc>::MIN_UTC, TokenKind::AccessToken);
        assert!(!ancient.is_fresh(Duration::seconds(300)));
        assert!(!ancient.within_grace(Duration::seconds(300)));
    }

    #[test]
    fn test_classify_access_prefix() {
        for raw in ["ya29.a0AfH6SMB", "ya29.", "  ya29.padded  "] {
            assert_eq!(classify(raw), TokenKind::AccessToken, "{raw}");
        }
    }

    #[test]
    fn test_classify_refresh_prefix() {
        for raw in ["1//0gabc", "1//", "1//04-xyz.with.dots"] {
            assert_eq!(classify(raw), TokenKind::RefreshToken, "{raw}");
        }
    }

    #[test]
    fn test_classify_jwt_shaped_is_access() {
        assert_eq!(classify("eyJhbGciOi.eyJzdWIiOi.c2lnbmF0dXJl"), TokenKind::AccessToken);
    }

    #[test]
    fn test_classify_ambiguous_defaults_to_refresh() {
        assert_eq!(classify("opaque-token-value"), TokenKind::RefreshToken);
        assert_eq!(classify(""), TokenKind::RefreshToken);
        assert_eq!(classify("a..b"), TokenKind::RefreshToken);
    }

    #[test]
    fn test_credential_kind_from_str() {
        assert_eq!("auto".parse::<CredentialKind>().unwrap(), CredentialKind::Auto);
        assert_eq!("ACCESS".parse::<CredentialKind>().unwrap(), CredentialKind::Access);
        assert_eq!("refresh_token".parse::<CredentialKind>().unwrap(), CredentialKind::Refresh);
        assert!("bearer".parse::<CredentialKind>().is_err());
    }

    #[test]
    fn test_cached_token_freshness() {
        let fresh = CachedToken::new("t", Duration::hours(1), TokenKind::AccessToken);
        assert!(fresh.is_fresh(Duration::minutes(5)));

        let inside_buffer = CachedToken::new("t", Duration::minutes(3), TokenKind::AccessToken);
        assert!(!inside_buffer.is_fresh(Duration::minutes(5)));
        assert!(inside_buffer.within_grace(Duration::minutes(5)));

        let long_gone = CachedToken::new("t", Duration::minutes(-10), TokenKind::AccessToken);
        assert!(!long_gone.within_grace(Duration::minutes(5)));
    }
}
