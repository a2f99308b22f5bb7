//! Ordered composition of the request stages.
//!
//! A [`MiddlewareChain`] is an explicit outer-to-inner list of [`Stage`]s.
//! [`apply`](MiddlewareChain::apply) wraps a router so that the first stage
//! sees the request first and the response last. A stage that rejects a
//! request returns immediately; nothing inside it runs.
//!
//! ```text
//! auth_first (default):        Logging → Auth → RateLimit → handler
//! rate_limit_first:            Logging → RateLimit → Auth → handler
//! ```
//!
//! With `auth_first`, unauthenticated requests are answered 401 before the
//! limiter is consulted and so never consume quota. With `rate_limit_first`,
//! every request counts, and an over-quota caller sees 429 even without a
//! valid token.

use std::fmt;
use std::str::FromStr;

use axum::Router;
use thiserror::Error;

use super::auth::BearerAuthLayer;
use super::logging::RequestLogLayer;
use super::rate_limit::RateLimitLayer;

/// Error for an unrecognised `CHAIN_ORDER` value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown chain order '{0}' (expected 'auth_first' or 'rate_limit_first')")]
pub struct UnknownStageOrder(pub String);

/// Relative order of the auth and rate limit stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StageOrder {
    #[default]
    AuthFirst,
    RateLimitFirst,
}

impl FromStr for StageOrder {
    type Err = UnknownStageOrder;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auth_first" | "auth-first" => Ok(StageOrder::AuthFirst),
            "rate_limit_first" | "rate-limit-first" => Ok(StageOrder::RateLimitFirst),
            other => Err(UnknownStageOrder(other.to_string())),
        }
    }
}

impl fmt::Display for StageOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageOrder::AuthFirst => write!(f, "auth_first"),
            StageOrder::RateLimitFirst => write!(f, "rate_limit_first"),
        }
    }
}

/// One request stage.
#[derive(Clone)]
pub enum Stage {
    Logging(RequestLogLayer),
    Auth(BearerAuthLayer),
    RateLimit(RateLimitLayer),
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Logging(_) => "logging",
            Stage::Auth(_) => "auth",
            Stage::RateLimit(_) => "rate_limit",
        }
    }

    fn wrap<S>(self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        match self {
            Stage::Logging(layer) => router.layer(layer),
            Stage::Auth(layer) => router.layer(layer),
            Stage::RateLimit(layer) => router.layer(layer),
        }
    }
}

/// Outer-to-inner list of stages.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    stages: Vec<Stage>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the standard chain for `order`.
    ///
    /// Logging is always outermost. Passing `None` for `rate_limit` leaves
    /// the stage out entirely.
    pub fn with_order(
        order: StageOrder,
        logging: RequestLogLayer,
        auth: BearerAuthLayer,
        rate_limit: Option<RateLimitLayer>,
    ) -> Self {
        let chain = Self::new().stage(Stage::Logging(logging));
        let auth = Stage::Auth(auth);

        match (order, rate_limit) {
            (_, None) => chain.stage(auth),
            (StageOrder::AuthFirst, Some(rl)) => chain.stage(auth).stage(Stage::RateLimit(rl)),
            (StageOrder::RateLimitFirst, Some(rl)) => {
                chain.stage(Stage::RateLimit(rl)).stage(auth)
            }
        }
    }

    /// Append a stage inside the ones already added.
    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Stage names, outermost first.
    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(Stage::name).collect()
    }

    /// Wrap `router` so the first stage is outermost.
    ///
    /// `Router::layer` wraps everything added so far, so stages are applied
    /// innermost first.
    pub fn apply<S>(self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        self.stages
            .into_iter()
            .rev()
            .fold(router, |router, stage| stage.wrap(router))
    }
}
