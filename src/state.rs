//! Shared application state.
//!
//! Holds the components the request stages and handlers share:
//!
//! - **Authenticator**: the configured shared secret check
//! - **Limiter**: the per-client request limiter, when rate limiting is on
//! - **Failure guard**: per-client failed-auth budget, when configured
//! - **Resolver**: client key derivation with trusted proxy rules
//!
//! # Structured Concurrency
//!
//! Each limiter gets a background eviction task. Tasks are managed using
//! `tokio_util::task::TaskTracker` and `CancellationToken`; call `shutdown()`
//! to stop them before application exit.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use crate::auth::{Authenticator, TokenAuthenticator};
use crate::config::Config;
use crate::error::AppResult;
use crate::limiter::{RateLimiter, build_limiter, run_eviction};
use crate::middleware::{
    AuthFailureGuard, BearerAuthLayer, ClientKeyResolver, MiddlewareChain, RateLimitLayer,
    RequestLogLayer, TrustedProxyConfig,
};

/// Label for the request limiter in logs and metrics.
const REQUEST_LIMITER: &str = "requests";

/// Label for the failed-auth limiter in logs and metrics.
const AUTH_FAILURE_LIMITER: &str = "auth_failures";

/// Shared application state.
///
/// Cloned for each request handler; all internal data is behind `Arc`.
///
/// # Lifecycle
///
/// Eviction tasks are spawned when the state is created, so `new` must run
/// inside a Tokio runtime. Call `shutdown()` before dropping:
///
/// ```rust,ignore
/// let state = AppState::new(config)?;
/// // ... serve ...
/// state.shutdown().await;  // Wait for background tasks to complete
/// ```
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Timestamp when the application started
    pub started_at: Instant,
    authenticator: Arc<dyn Authenticator>,
    limiter: Option<Arc<dyn RateLimiter>>,
    failure_guard: Option<Arc<AuthFailureGuard>>,
    resolver: Arc<ClientKeyResolver>,
    /// Tracks spawned background tasks for graceful shutdown
    task_tracker: TaskTracker,
    /// Cancellation token for signaling background tasks to stop
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Build the shared components from `config` and start eviction.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if the token is empty or the window is
    /// zero.
    pub fn new(config: Config) -> AppResult<Self> {
        let authenticator: Arc<dyn Authenticator> =
            Arc::new(TokenAuthenticator::new(config.auth_token.clone())?);

        let limiter = if config.rate_limit_enabled {
            Some(build_limiter(
                config.rate_limit_strategy,
                config.window_config()?,
            ))
        } else {
            None
        };

        let failure_guard = AuthFailureGuard::new(config.auth_failure_limit).map(Arc::new);
        let resolver = Arc::new(ClientKeyResolver::new(TrustedProxyConfig::new(
            &config.trusted_proxies,
        )));

        let state = Self {
            config: Arc::new(config),
            started_at: Instant::now(),
            authenticator,
            limiter,
            failure_guard,
            resolver,
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        };

        state.spawn_eviction_tasks();

        Ok(state)
    }

    /// The request limiter, if rate limiting is enabled.
    pub fn limiter(&self) -> Option<&Arc<dyn RateLimiter>> {
        self.limiter.as_ref()
    }

    /// Assemble the request stages in the configured order.
    pub fn middleware_chain(&self) -> MiddlewareChain {
        let mut auth = BearerAuthLayer::new(self.authenticator.clone(), self.resolver.clone());
        if let Some(guard) = &self.failure_guard {
            auth = auth.with_failure_guard(guard.clone());
        }

        let rate_limit = self
            .limiter
            .as_ref()
            .map(|limiter| RateLimitLayer::new(limiter.clone(), self.resolver.clone()));

        MiddlewareChain::with_order(
            self.config.chain_order,
            RequestLogLayer::new(self.resolver.clone()),
            auth,
            rate_limit,
        )
    }

    /// Spawn one eviction task per limiter.
    ///
    /// The tasks are tracked by `task_tracker` and respect
    /// `cancellation_token` for graceful shutdown.
    fn spawn_eviction_tasks(&self) {
        if let Some(limiter) = &self.limiter {
            self.task_tracker.spawn(run_eviction(
                REQUEST_LIMITER,
                limiter.clone(),
                self.config.eviction_interval(),
                self.cancellation_token.clone(),
            ));
        }

        if let Some(guard) = &self.failure_guard {
            let limiter = guard.limiter();
            let period = limiter.window();
            self.task_tracker.spawn(run_eviction(
                AUTH_FAILURE_LIMITER,
                limiter,
                period,
                self.cancellation_token.clone(),
            ));
        }
    }

    /// Gracefully shutdown all background tasks.
    ///
    /// This method:
    /// 1. Signals all tasks to stop via cancellation token
    /// 2. Closes the task tracker (prevents new tasks)
    /// 3. Waits for all tasks to complete
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("All background tasks have completed");
    }

    /// Get the application uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::AppError;
    use crate::middleware::StageOrder;

    fn config() -> Config {
        Config {
            auth_token: "secret".to_string(),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_rate_limit_disabled_has_no_limiter() {
        let state = AppState::new(config()).unwrap();
        assert!(state.limiter().is_none());
        assert_eq!(state.middleware_chain().names(), ["logging", "auth"]);
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_chain_follows_configured_order() {
        let state = AppState::new(Config {
            rate_limit_enabled: true,
            chain_order: StageOrder::RateLimitFirst,
            ..config()
        })
        .unwrap();

        assert!(state.limiter().is_some());
        assert_eq!(
            state.middleware_chain().names(),
            ["logging", "rate_limit", "auth"]
        );
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_empty_token_is_rejected() {
        let result = AppState::new(Config::default());
        assert!(matches!(result, Err(AppError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_zero_window_is_rejected() {
        let result = AppState::new(Config {
            rate_limit_enabled: true,
            rate_limit_window: Duration::ZERO,
            ..config()
        });
        assert!(matches!(result, Err(AppError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_shutdown_stops_eviction_tasks() {
        let state = AppState::new(Config {
            rate_limit_enabled: true,
            auth_failure_limit: 3,
            rate_limit_window: Duration::from_secs(3600),
            ..config()
        })
        .unwrap();

        tokio::time::timeout(Duration::from_secs(5), state.shutdown())
            .await
            .expect("shutdown should not hang");
    }
}
