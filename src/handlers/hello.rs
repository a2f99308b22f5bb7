use axum::Json;
use tracing::instrument;

use crate::models::{ApiResponse, HelloMessage};

/// `GET /api/hello`.
#[instrument]
pub async fn hello() -> Json<ApiResponse<HelloMessage>> {
    Json(ApiResponse::success(
        HelloMessage {
            message: "Hello World!",
        },
        "Hello, World!",
    ))
}
