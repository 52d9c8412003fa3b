//! Error taxonomy for the token lifecycle and the currently-playing query.
//!
//! Both enums are `Clone`: a single refresh outcome is handed to every caller
//! that was waiting on it.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The refresh token was revoked or expired. Retrying will not help; the
    /// operator has to run the authorization flow again.
    #[error("refresh token rejected ({0}); re-run `auth` to link the account again")]
    RefreshTokenInvalid(String),

    /// client_id / client_secret were rejected by the token endpoint.
    #[error("client credentials rejected ({0}); check client_id and client_secret")]
    InvalidClient(String),

    /// The API kept refusing the access token even after a forced refresh.
    #[error("access token rejected by the API after a forced refresh")]
    AccessTokenRejected,

    #[error("token endpoint unavailable: {0}")]
    Transient(String),
}

impl AuthError {
    /// True when only an operator (new authorization, fixed config) can resolve it.
    pub fn needs_operator(&self) -> bool {
        matches!(
            self,
            AuthError::RefreshTokenInvalid(_) | AuthError::InvalidClient(_)
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthError::Transient(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("authorization failed: {0}")]
    Auth(#[from] AuthError),

    #[error("malformed currently-playing response: {0}")]
    MalformedResponse(String),

    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("currently-playing request failed: {0}")]
    Transient(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transient(_) | FetchError::RateLimited { .. } => true,
            FetchError::Auth(e) => e.is_retryable(),
            FetchError::MalformedResponse(_) => false,
        }
    }

    pub fn needs_operator(&self) -> bool {
        matches!(self, FetchError::Auth(e) if e.needs_operator())
    }
}
