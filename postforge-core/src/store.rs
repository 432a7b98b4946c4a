//! Credential storage.
//!
//! This module provides:
//! - [`Secret`] - A wrapper for sensitive values that prevents accidental logging
//! - [`Credential`] - The OAuth material used to authenticate against the blog API
//! - [`CredentialStore`] - Every credential and API key the bot needs, loaded once
//!
//! Nothing here is persisted. The store is built from process configuration
//! at startup and shared read-only afterwards.
//!
//! # Example
//!
//! ```rust
//! use postforge_core::store::{Credential, CredentialStore, Secret};
//! use postforge_core::token::CredentialKind;
//!
//! let credential = Credential::new("1//refresh-token")
//!     .with_client("client-id", "client-secret")
//!     .with_kind(CredentialKind::Refresh);
//!
//! let store = CredentialStore::new("my-tag-20").with_oauth(credential);
//! assert!(store.oauth().unwrap().has_client_credentials());
//! ```

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::token::{CredentialKind, TokenKind, classify};

/// A secret value that prevents accidental exposure in logs.
///
/// The inner value is only accessible via [`expose()`](Secret::expose).
/// Debug and Display implementations show `[REDACTED]` instead of the value,
/// and the buffer is wiped when the secret is dropped.
#[derive(Clone, Default, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    ///
    /// Use sparingly and never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the secret holds only whitespace.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Short, log-safe preview of the first `n` characters.
    pub fn preview(&self, n: usize) -> String {
        let head: String = self.0.chars().take(n).collect();
        format!("{head}...")
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Secret {}

/// Drop blank optional secrets so "set but empty" reads as absent.
pub fn non_blank(secret: Option<Secret>) -> Option<Secret> {
    secret.filter(|s| !s.is_blank())
}

/// OAuth material for the blog-hosting API.
///
/// Immutable after load. The raw token may be a short-lived access token or a
/// long-lived refresh token; [`Credential::token_kind`] decides which.
#[derive(Debug, Clone)]
pub struct Credential {
    /// The token exactly as configured.
    pub raw_token: Secret,

    /// OAuth client ID, required to refresh.
    pub client_id: Option<String>,

    /// OAuth client secret, required to refresh.
    pub client_secret: Option<Secret>,

    /// Explicit kind from configuration, or `Auto` for the prefix heuristic.
    pub kind: CredentialKind,
}

impl Credential {
    /// Create a credential with automatic kind detection and no client.
    pub fn new(raw_token: impl Into<String>) -> Self {
        Self {
            raw_token: Secret::new(raw_token.into().trim()),
            client_id: None,
            client_secret: None,
            kind: CredentialKind::Auto,
        }
    }

    /// Attach OAuth client credentials.
    pub fn with_client(
        mut self,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        self.client_id = Some(client_id.into());
        self.client_secret = Some(Secret::new(client_secret));
        self
    }

    /// Override the token kind instead of sniffing the prefix.
    pub fn with_kind(mut self, kind: CredentialKind) -> Self {
        self.kind = kind;
        self
    }

    /// Whether both the client ID and secret are present and non-empty.
    pub fn has_client_credentials(&self) -> bool {
        let id_ok = self
            .client_id
            .as_deref()
            .is_some_and(|id| !id.trim().is_empty());
        let secret_ok = self.client_secret.as_ref().is_some_and(|s| !s.is_blank());
        id_ok && secret_ok
    }

    /// Resolve the effective token kind.
    pub fn token_kind(&self) -> TokenKind {
        match self.kind {
            CredentialKind::Access => TokenKind::AccessToken,
            CredentialKind::Refresh => TokenKind::RefreshToken,
            CredentialKind::Auto => classify(self.raw_token.expose()),
        }
    }
}

/// Every credential and key the bot uses, sourced from configuration.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    oauth: Option<Credential>,
    generator_api_key: Option<Secret>,
    shortener_token: Option<Secret>,
    affiliate_tag: String,
}

impl CredentialStore {
    /// Create a store holding only the affiliate tag.
    pub fn new(affiliate_tag: impl Into<String>) -> Self {
        Self {
            affiliate_tag: affiliate_tag.into(),
            ..Self::default()
        }
    }

    /// Set the blog OAuth credential. Blank tokens are ignored.
    pub fn with_oauth(mut self, credential: Credential) -> Self {
        self.oauth = (!credential.raw_token.is_blank()).then_some(credential);
        self
    }

    /// Set the generative-text API key.
    pub fn with_generator_api_key(mut self, key: Option<Secret>) -> Self {
        self.generator_api_key = non_blank(key);
        self
    }

    /// Set the link-shortener bearer token.
    pub fn with_shortener_token(mut self, token: Option<Secret>) -> Self {
        self.shortener_token = non_blank(token);
        self
    }

    /// The blog OAuth credential, if configured.
    pub fn oauth(&self) -> Option<&Credential> {
        self.oauth.as_ref()
    }

    /// The generative-text API key, if configured.
    pub fn generator_api_key(&self) -> Option<&Secret> {
        self.generator_api_key.as_ref()
    }

    /// The link-shortener token, if configured.
    pub fn shortener_token(&self) -> Option<&Secret> {
        self.shortener_token.as_ref()
    }

    /// The affiliate tag appended to product links.
    pub fn affiliate_tag(&self) -> &str {
        &self.affiliate_tag
    }
}
