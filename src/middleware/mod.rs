//! HTTP request stages in front of the handlers.
//!
//! - **Logging**: one structured line and a duration sample per request
//! - **Bearer Authentication**: constant-time shared secret check
//! - **Rate Limiting**: per-client sliding window (or token bucket)
//! - **Request ID**: generated or propagated `X-Request-Id`
//! - **Client Key Resolution**: forwarding headers, peer address, trusted proxies
//!
//! # Architecture
//!
//! ```text
//! Request → Logging → Auth → RateLimit → Handler → Response
//!                      ↓         ↓
//!               401 Unauthorized  429 Too Many Requests
//! ```
//!
//! The order of Auth and RateLimit is configurable, see [`chain`].

pub mod auth;
pub mod chain;
pub mod ip;
pub mod logging;
pub mod rate_limit;
pub mod request_id;

pub use auth::{AuthFailureGuard, BearerAuthLayer};
pub use chain::{MiddlewareChain, Stage, StageOrder, UnknownStageOrder};
pub use ip::{ClientKeyResolver, TrustedProxyConfig, UNKNOWN_IP, resolve_client_key};
pub use logging::RequestLogLayer;
pub use rate_limit::RateLimitLayer;
pub use request_id::{REQUEST_ID_HEADER, propagate_request_id_layer, set_request_id_layer};
