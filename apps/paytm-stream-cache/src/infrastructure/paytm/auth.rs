//! Paytm Money Broadcast Authentication
//!
//! The broadcast endpoint authenticates during the WebSocket upgrade: the
//! public access token travels as the `x_jwt_token` query parameter and
//! the server answers the upgrade request with HTTP 401 (or 403) when the
//! token is rejected.
//!
//! # Authentication Flow
//!
//! 1. Open the TCP (and TLS) transport
//! 2. Send the upgrade request to `{url}?x_jwt_token={token}`
//! 3. `101 Switching Protocols` means authenticated
//! 4. `401`/`403` means the token is invalid or expired; retrying with the
//!    same token cannot succeed
//!
//! Token acquisition is out of scope; the token is supplied by configuration.

use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Query parameter carrying the access token.
pub const TOKEN_QUERY_PARAM: &str = "x_jwt_token";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during authentication.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// No token configured.
    #[error("access token cannot be empty")]
    EmptyToken,

    /// The server rejected the token.
    #[error("access token rejected by server (HTTP {status})")]
    Rejected {
        /// HTTP status of the upgrade response.
        status: u16,
    },

    /// The upgrade did not complete in time.
    #[error("authentication timed out after {0:?}")]
    Timeout(Duration),

    /// The endpoint URL cannot be turned into an upgrade request.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// The upgrade failed for a reason other than the token.
    #[error("handshake failed: {0}")]
    Handshake(String),
}

impl AuthError {
    /// Whether retrying with the same configuration cannot succeed.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::EmptyToken | Self::Rejected { .. } | Self::InvalidEndpoint(_)
        )
    }

    /// Classify a failed upgrade.
    #[must_use]
    pub fn from_handshake(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::Http(response) => Self::from_status(response.status().as_u16()),
            tungstenite::Error::Url(e) => Self::InvalidEndpoint(e.to_string()),
            other => Self::Handshake(other.to_string()),
        }
    }

    /// Classify a non-101 upgrade response.
    #[must_use]
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Rejected { status },
            other => Self::Handshake(format!("unexpected HTTP {other} during upgrade")),
        }
    }
}

// =============================================================================
// Access Token
// =============================================================================

/// Public access token for the broadcast endpoint.
///
/// The `Debug` implementation redacts the token for safe logging.
#[derive(Clone)]
pub struct AccessToken(String);

impl AccessToken {
    /// Wrap a token.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::EmptyToken` if the token is blank.
    pub fn new(token: impl Into<String>) -> Result<Self, AuthError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(AuthError::EmptyToken);
        }
        Ok(Self(token.trim().to_string()))
    }

    /// Raw token value.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Token length, safe to log.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always `false`; empty tokens are rejected on construction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AccessToken").field(&"[REDACTED]").finish()
    }
}

/// Endpoint URL with the token attached as a query parameter.
#[must_use]
pub fn authenticated_url(base: &str, token: &AccessToken) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}{TOKEN_QUERY_PARAM}={}", token.expose())
}

// =============================================================================
// Tests
// =============================================================================
