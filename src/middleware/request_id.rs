//! Request ID generation and propagation.
//!
//! - Keeps an incoming `X-Request-Id` header as is
//! - Otherwise generates a UUIDv4
//! - Copies the ID onto the response
//!
//! Both layers wrap the whole chain, so the logging stage and rejected
//! responses (401, 429) carry the ID too.
//!
//! ```bash
//! curl -H "X-Request-Id: my-correlation-id" http://localhost:8080/api
//! ```

use axum::http::{HeaderName, HeaderValue, Request};
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use uuid::Uuid;

/// Header name for request ID.
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Generates UUIDv4 request IDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Layer that sets `X-Request-Id` on requests lacking one.
pub fn set_request_id_layer() -> SetRequestIdLayer<UuidRequestId> {
    SetRequestIdLayer::new(REQUEST_ID_HEADER, UuidRequestId)
}

/// Layer that copies `X-Request-Id` from the request to the response.
pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(REQUEST_ID_HEADER)
}
