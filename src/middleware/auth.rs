//! Bearer token authentication stage.
//!
//! # Security Features
//!
//! - **Constant-time comparison**: the credential check is delegated to an
//!   [`Authenticator`], by default [`TokenAuthenticator`](crate::auth::TokenAuthenticator)
//! - **Short-circuit**: a rejected request never reaches later stages, so an
//!   unauthenticated caller cannot consume rate limit quota when this stage
//!   runs first
//! - **Optional brute force guard**: per-client cap on failed attempts
//!
//! # Usage
//!
//! Clients send the shared secret as a bearer token:
//!
//! ```bash
//! curl -H "Authorization: Bearer your-secret-token" http://localhost:8080/api
//! ```
//!
//! # Responses
//!
//! - `401 Unauthorized` (plain text, `WWW-Authenticate: Bearer`) when the
//!   header is missing, uses another scheme, or carries the wrong token
//! - `429 Too Many Requests` when the brute force guard is enabled and the
//!   client has used up its failed-attempt budget; the credential is not
//!   evaluated at all in that case, and a failure that arrives after the
//!   budget ran out (concurrent guesses) is answered the same way
//!
//! Failed attempts are client-input conditions and are logged at `warn`.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::http::header::{RETRY_AFTER, WWW_AUTHENTICATE};
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::ip::ClientKeyResolver;
use crate::auth::{Authenticator, extract_bearer};
use crate::limiter::{RateLimiter, SlidingWindowLimiter, WindowConfig};
use crate::metrics;

/// Window over which failed attempts are counted by [`AuthFailureGuard`].
pub const AUTH_FAILURE_WINDOW: Duration = Duration::from_secs(60);

/// Per-client budget of failed authentication attempts.
///
/// Backed by its own sliding-window log, separate from the request rate
/// limiter: failures never touch the request quota.
pub struct AuthFailureGuard {
    failures: Arc<SlidingWindowLimiter>,
}

impl AuthFailureGuard {
    /// Allow `max_failures` failed attempts per client per minute.
    ///
    /// Returns `None` when `max_failures` is 0 (guard disabled).
    pub fn new(max_failures: u32) -> Option<Self> {
        let config = WindowConfig::new(max_failures, AUTH_FAILURE_WINDOW).ok()?;
        (max_failures > 0).then(|| Self {
            failures: Arc::new(SlidingWindowLimiter::new(config)),
        })
    }

    /// Whether `client_key` has exhausted its failure budget.
    pub fn is_blocked(&self, client_key: &str) -> bool {
        self.failures.remaining(client_key) == 0
    }

    /// Count one failed attempt for `client_key`.
    ///
    /// Check and record happen under one lock: returns `false` when the
    /// budget was already spent, in which case nothing is recorded.
    pub fn record_failure(&self, client_key: &str) -> bool {
        self.failures.allow(client_key)
    }

    /// The underlying limiter, for the eviction task.
    pub fn limiter(&self) -> Arc<dyn RateLimiter> {
        self.failures.clone()
    }
}

/// Bearer authentication layer.
#[derive(Clone)]
pub struct BearerAuthLayer {
    authenticator: Arc<dyn Authenticator>,
    resolver: Arc<ClientKeyResolver>,
    failure_guard: Option<Arc<AuthFailureGuard>>,
}

impl BearerAuthLayer {
    pub fn new(authenticator: Arc<dyn Authenticator>, resolver: Arc<ClientKeyResolver>) -> Self {
        Self {
            authenticator,
            resolver,
            failure_guard: None,
        }
    }

    /// Enable the brute force guard.
    pub fn with_failure_guard(mut self, guard: Arc<AuthFailureGuard>) -> Self {
        self.failure_guard = Some(guard);
        self
    }
}

impl<S> Layer<S> for BearerAuthLayer {
    type Service = BearerAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        BearerAuthService {
            inner,
            authenticator: self.authenticator.clone(),
            resolver: self.resolver.clone(),
            failure_guard: self.failure_guard.clone(),
        }
    }
}

/// Bearer authentication service wrapper.
#[derive(Clone)]
pub struct BearerAuthService<S> {
    inner: S,
    authenticator: Arc<dyn Authenticator>,
    resolver: Arc<ClientKeyResolver>,
    failure_guard: Option<Arc<AuthFailureGuard>>,
}

impl<S> Service<Request<Body>> for BearerAuthService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let authenticator = self.authenticator.clone();
        let failure_guard = self.failure_guard.clone();
        let client_key = self.resolver.resolve(&req);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            if let Some(ref guard) = failure_guard
                && guard.is_blocked(&client_key)
            {
                warn!(
                    client_key = %client_key,
                    "Client blocked due to excessive auth failures"
                );
                metrics::record_auth_failure("blocked");
                return Ok(too_many_failures_response(AUTH_FAILURE_WINDOW.as_secs()));
            }

            let verdict = extract_bearer(req.headers()).map(|token| authenticator.authenticate(token));

            let reason = match verdict {
                Some(true) => {
                    debug!(client_key = %client_key, "Bearer authentication successful");
                    return inner.call(req).await;
                }
                Some(false) => "invalid",
                None => "missing",
            };

            if let Some(ref guard) = failure_guard
                && !guard.record_failure(&client_key)
            {
                warn!(
                    client_key = %client_key,
                    reason,
                    "Auth failure over budget, client blocked"
                );
                metrics::record_auth_failure("blocked");
                return Ok(too_many_failures_response(AUTH_FAILURE_WINDOW.as_secs()));
            }
            metrics::record_auth_failure(reason);
            warn!(
                client_key = %client_key,
                path = %req.uri().path(),
                reason,
                "Unauthorized request"
            );

            Ok(unauthorized_response())
        })
    }
}

/// Build an unauthorized (401) response.
fn unauthorized_response() -> Response<Body> {
    (
        StatusCode::UNAUTHORIZED,
        [(WWW_AUTHENTICATE, "Bearer")],
        "Unauthorized",
    )
        .into_response()
}

/// Build a 429 response for clients blocked by the failure guard.
fn too_many_failures_response(retry_after: u64) -> Response<Body> {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(RETRY_AFTER, retry_after.to_string())],
        "Too many failed authentication attempts",
    )
        .into_response()
}
