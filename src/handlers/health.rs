//! Health and fallback endpoints.
//!
//! # Endpoints
//!
//! - `GET /health` - Liveness check with version and uptime
//!
//! `/health` sits behind the same request stages as every other route,
//! so liveness checks must present the bearer token too.

use axum::Json;
use axum::extract::State;
use axum::http::Uri;
use chrono::Utc;
use tracing::instrument;

use crate::error::AppError;
use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint.
///
/// Always returns 200 OK while the process is serving.
///
/// # Response Body
///
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "timestamp": "2024-01-15T10:30:00Z",
///   "uptime_seconds": 42,
///   "rate_limit_enabled": true
/// }
/// ```
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        uptime_seconds: state.uptime_seconds(),
        rate_limit_enabled: state.limiter().is_some(),
    })
}

/// Any other method on a known path.
pub async fn method_not_allowed() -> AppError {
    AppError::MethodNotAllowed
}

/// Any unknown path.
pub async fn not_found(uri: Uri) -> AppError {
    AppError::NotFound(uri.path().to_string())
}
