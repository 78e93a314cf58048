use thiserror::Error;

use crate::signer::SignError;

/// Failure surfaced to callers of the token lifecycle.
///
/// Malformed, unknown, expired, revoked and mis-bound tokens all collapse
/// into [`TokenError::AuthenticationFailed`]; the precise reason only reaches
/// the security event log.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("token storage unavailable: {0}")]
    StorageUnavailable(#[source] sqlx::Error),

    #[error("token signing failed: {0}")]
    Signing(#[source] SignError),
}

impl TokenError {
    /// Infrastructure faults may be retried; authentication failures must not
    /// be.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }
}

impl From<sqlx::Error> for TokenError {
    fn from(e: sqlx::Error) -> Self {
        Self::StorageUnavailable(e)
    }
}
