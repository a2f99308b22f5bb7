//! Credential checks for the authentication stage.
//!
//! The service is protected by a single shared secret presented as a bearer
//! token. There is no per-user identity: [`TokenAuthenticator`] answers one
//! question, "does this credential equal the configured secret?", in time
//! independent of where the two strings differ.
//!
//! Other strategies (per-user keys, signed tokens) plug in by implementing
//! [`Authenticator`]; the middleware only holds an `Arc<dyn Authenticator>`.

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Prefix expected in front of the credential in the `Authorization` header.
pub const BEARER_PREFIX: &str = "Bearer ";

/// Error type for authenticator construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    /// An empty secret would make the empty credential valid.
    #[error("authentication token must not be empty")]
    EmptySecret,
}

/// Decides whether a presented credential is acceptable.
pub trait Authenticator: Send + Sync {
    /// Returns `true` if `credential` is valid. Never fails.
    fn authenticate(&self, credential: &str) -> bool;
}

/// Shared-secret authenticator using constant-time comparison.
pub struct TokenAuthenticator {
    expected: Vec<u8>,
}

impl TokenAuthenticator {
    /// Create an authenticator for `secret`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::EmptySecret`] if `secret` is empty.
    pub fn new(secret: impl Into<String>) -> Result<Self, AuthError> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(AuthError::EmptySecret);
        }
        Ok(Self {
            expected: secret.into_bytes(),
        })
    }
}

impl Authenticator for TokenAuthenticator {
    fn authenticate(&self, credential: &str) -> bool {
        // `ct_eq` on slices returns 0 for a length mismatch without looking at
        // the contents, and otherwise compares every byte.
        credential.as_bytes().ct_eq(&self.expected).into()
    }
}

impl std::fmt::Debug for TokenAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuthenticator")
            .field("expected", &"<redacted>")
            .finish()
    }
}

/// Extract the bearer credential from the `Authorization` header.
///
/// Returns `None` when the header is missing, not valid UTF-8, or does not
/// start with [`BEARER_PREFIX`] (the scheme is matched case-sensitively).
pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix(BEARER_PREFIX)
}
