//! Top-level error types for postforge.

use thiserror::Error;

use crate::blog::PublishError;
use crate::pipeline::PipelineError;
use crate::retry::CallError;
use crate::token::TokenError;

/// Top-level error type encompassing all postforge errors.
#[derive(Debug, Error)]
pub enum PostforgeError {
    /// Error from token operations.
    #[error("token error: {0}")]
    Token(#[from] TokenError),

    /// Error from an outbound HTTP call.
    #[error("call error: {0}")]
    Call(#[from] CallError),

    /// Error from the blog API.
    #[error("publish error: {0}")]
    Publish(#[from] PublishError),

    /// A posting run failed.
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Generic internal error.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl PostforgeError {
    /// Whether the same operation could succeed later without reconfiguration.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Token(e) => e.is_transient(),
            Self::Call(e) => e.is_retryable() || matches!(e, CallError::RateLimited),
            Self::Publish(e) | Self::Pipeline(PipelineError::Publish(e)) => match e {
                PublishError::Token(e) => e.is_transient(),
                PublishError::Call(e) => e.is_retryable(),
                PublishError::InvalidResponse { .. } | PublishError::Cancelled => true,
            },
            Self::Pipeline(PipelineError::AffiliateUrl(_)) => false,
            Self::Pipeline(_) => true,
            Self::Config { .. } | Self::Internal { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(
            PostforgeError::from(TokenError::RefreshFailed {
                message: "502".into()
            })
            .is_transient()
        );
        assert!(!PostforgeError::from(TokenError::MissingClientCredentials).is_transient());
        assert!(
            !PostforgeError::from(PublishError::Token(TokenError::NoCredential)).is_transient()
        );
        assert!(PostforgeError::from(CallError::RateLimited).is_transient());
        assert!(PostforgeError::from(PipelineError::NoCandidates).is_transient());
        assert!(
            !PostforgeError::from(PipelineError::Publish(PublishError::Token(
                TokenError::MissingClientCredentials
            )))
            .is_transient()
        );
        assert!(
            !PostforgeError::Config {
                message: "bad port".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn test_display_wraps_source() {
        let err = PostforgeError::from(TokenError::NoCredential);
        assert_eq!(err.to_string(), "token error: no OAuth credential configured");
    }
}
