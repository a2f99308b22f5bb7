//! Request logging stage.
//!
//! Outermost stage of the chain. It records the start instant, lets the rest
//! of the chain run, then logs one structured line per request:
//!
//! ```text
//! INFO Request completed method=GET client_key=10.0.0.1 path=/api/hello status=200 request_id=… elapsed_ms=0.42
//! ```
//!
//! Requests rejected by later stages (401, 429) are logged the same way as
//! admitted ones. This stage never rejects anything.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use tower::{Layer, Service};
use tracing::info;

use super::ip::ClientKeyResolver;
use super::request_id::REQUEST_ID_HEADER;
use crate::metrics;

/// Layer that logs every completed request.
#[derive(Clone)]
pub struct RequestLogLayer {
    resolver: Arc<ClientKeyResolver>,
}

impl RequestLogLayer {
    pub fn new(resolver: Arc<ClientKeyResolver>) -> Self {
        Self { resolver }
    }
}

impl<S> Layer<S> for RequestLogLayer {
    type Service = RequestLogService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestLogService {
            inner,
            resolver: self.resolver.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RequestLogService<S> {
    inner: S,
    resolver: Arc<ClientKeyResolver>,
}

impl<S> Service<Request<Body>> for RequestLogService<S>
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
        let start = Instant::now();
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let client_key = self.resolver.resolve(&req);
        let request_id = req
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-")
            .to_string();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let response = inner.call(req).await?;

            let elapsed = start.elapsed();
            let status = response.status().as_u16();
            info!(
                method = %method,
                client_key = %client_key,
                path = %path,
                status,
                request_id = %request_id,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                "Request completed"
            );
            metrics::record_request_duration(method.as_str(), status, elapsed.as_secs_f64());

            Ok(response)
        })
    }
}
