//! API information endpoint.

use axum::Json;
use tracing::instrument;

use crate::models::{ApiInfo, ApiResponse, EndpointInfo};

/// Endpoints listed by `GET /api`.
pub const ENDPOINTS: &[EndpointInfo] = &[
    EndpointInfo {
        path: "/api",
        method: "GET",
        description: "API information",
    },
    EndpointInfo {
        path: "/api/hello",
        method: "GET",
        description: "Greeting",
    },
    EndpointInfo {
        path: "/health",
        method: "GET",
        description: "Health check",
    },
];

/// API information endpoint.
///
/// # Response Body
///
/// ```json
/// {
///   "success": true,
///   "message": "API Information",
///   "data": {
///     "name": "gatekeeper",
///     "version": "0.1.0",
///     "description": "...",
///     "endpoints": [{"path": "/api", "method": "GET", "description": "API information"}]
///   }
/// }
/// ```
#[instrument]
pub async fn api_info() -> Json<ApiResponse<ApiInfo>> {
    Json(ApiResponse::success(
        ApiInfo {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            description: env!("CARGO_PKG_DESCRIPTION"),
            endpoints: ENDPOINTS.to_vec(),
        },
        "API Information",
    ))
}
