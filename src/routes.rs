//! Application routing configuration with middleware stack.
//!
//! # Middleware Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │   Request ID     │ ← Sets / propagates X-Request-Id
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Logging      │ ← One line per request, any status
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Authentication  │ ← 401 if token invalid (429 if failure guard trips)
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Rate Limiting   │ ← 429 if exceeded (only when enabled)
//! └────────┬─────────┘
//!          ▼
//!      Handler
//! ```
//!
//! Authentication and rate limiting swap places with
//! `CHAIN_ORDER=rate_limit_first`.
//!
//! # Routes
//!
//! - `GET /api` - API information
//! - `GET /api/hello` - Greeting
//! - `GET /health` - Liveness
//!
//! Other methods on these paths get a 405 JSON envelope; unknown paths get
//! a 404 JSON envelope. Both still pass through the whole chain.

use axum::Router;
use axum::routing::get;
use tracing::info;

use crate::handlers;
use crate::middleware::{propagate_request_id_layer, set_request_id_layer};
use crate::state::AppState;

/// Build the application router with all routes and middleware configured.
///
/// # Middleware Configuration
///
/// - **Authentication**: always on
/// - **Rate Limiting**: added if `rate_limit_enabled`
/// - **Order**: from `chain_order`
pub fn build_router(state: AppState) -> Router {
    let config = &state.config;

    let router = Router::new()
        .route(
            "/api",
            get(handlers::api_info).fallback(handlers::method_not_allowed),
        )
        .route(
            "/api/hello",
            get(handlers::hello).fallback(handlers::method_not_allowed),
        )
        .route(
            "/health",
            get(handlers::health_check).fallback(handlers::method_not_allowed),
        )
        .fallback(handlers::not_found);

    let chain = state.middleware_chain();
    info!(
        stages = ?chain.names(),
        order = %config.chain_order,
        "Request chain configured"
    );

    if config.rate_limit_enabled {
        info!(
            max_requests = config.rate_limit_max_requests,
            window = ?config.rate_limit_window,
            strategy = %config.rate_limit_strategy,
            eviction_interval = ?config.eviction_interval(),
            "Rate limiting enabled"
        );
    } else {
        info!("Rate limiting disabled (RATE_LIMIT_ENABLED=false)");
    }

    if config.proxy_validation_enabled() {
        info!(
            trusted_proxies = ?config.trusted_proxies,
            "Forwarding headers honoured only from trusted proxies"
        );
    } else {
        info!("TRUSTED_PROXIES not set, forwarding headers are trusted from any peer");
    }

    if config.auth_failure_guard_enabled() {
        info!(
            max_failures_per_minute = config.auth_failure_limit,
            "Auth failure guard enabled"
        );
    }

    chain
        .apply(router)
        // Request ID wraps the chain so rejections carry it too
        .layer(propagate_request_id_layer())
        .layer(set_request_id_layer())
        .with_state(state)
}
