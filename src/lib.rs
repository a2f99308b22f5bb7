//! # Gatekeeper
//!
//! Request admission control for Axum services:
//!
//! - **Authentication**: shared bearer secret, compared in constant time
//! - **Rate Limiting**: per-client sliding-window log (or GCRA token bucket)
//! - **Client Identity**: forwarding headers with trusted proxy rules
//! - **Observability**: request IDs, structured logging, Prometheus metrics
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Request ID                                                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  MiddlewareChain (Logging → Auth → RateLimit)               │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (/api, /api/hello, /health)                       │
//! └─────────────────────────────────────────────────────────────┘
//!        ▲                         ▲
//!   Authenticator            RateLimiter ◄── eviction task
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gatekeeper::{AppState, Config, build_router};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let state = AppState::new(config)?;
//!     let app = build_router(state.clone());
//!
//!     // Serve with `into_make_service_with_connect_info::<SocketAddr>()`...
//!
//!     state.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! ```bash
//! AUTH_TOKEN=your-secret RATE_LIMIT_ENABLED=true RATE_LIMIT_MAX_REQUESTS=100 RATE_LIMIT_WINDOW=1m cargo run
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod limiter;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state;
pub mod utils;

// Re-exports for convenience
pub use auth::{Authenticator, TokenAuthenticator};
pub use config::Config;
pub use error::{AppError, AppResult};
pub use limiter::{RateLimiter, SlidingWindowLimiter, Strategy, WindowConfig};
pub use middleware::{MiddlewareChain, StageOrder};
pub use routes::build_router;
pub use state::AppState;
