//! Rate limiting stage.
//!
//! Resolves the client key (see [`ip`](super::ip)), asks the shared
//! [`RateLimiter`] for a decision, and either forwards the request unchanged or
//! answers `429 Too Many Requests` without calling the inner service.
//!
//! # Response Headers
//!
//! On rate limit exceeded (429, plain-text body):
//! - `Retry-After`: the window length in whole seconds (rounded up). Once a
//!   full window has passed, the oldest admitted request has expired.
//! - `X-RateLimit-Limit`: configured requests per window
//! - `X-RateLimit-Remaining`: always `0`
//!
//! The limiter is injected, not global: one instance is created per service
//! and shared through `Arc` by every request task and the eviction task.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::http::header::RETRY_AFTER;
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use tower::{Layer, Service};
use tracing::{trace, warn};

use super::ip::ClientKeyResolver;
use crate::limiter::RateLimiter;
use crate::metrics;

/// Header carrying the configured limit.
pub const RATE_LIMIT_LIMIT_HEADER: &str = "x-ratelimit-limit";

/// Header carrying the remaining quota.
pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";

/// Per-client rate limiting layer.
///
/// # Example
///
/// ```rust,ignore
/// let limiter = build_limiter(Strategy::SlidingWindow, WindowConfig::new(100, Duration::from_secs(60))?);
/// let app = Router::new()
///     .route("/api", get(handler))
///     .layer(RateLimitLayer::new(limiter, Arc::new(ClientKeyResolver::default())));
/// ```
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<dyn RateLimiter>,
    resolver: Arc<ClientKeyResolver>,
}

impl RateLimitLayer {
    pub fn new(limiter: Arc<dyn RateLimiter>, resolver: Arc<ClientKeyResolver>) -> Self {
        Self { limiter, resolver }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
            resolver: self.resolver.clone(),
        }
    }
}

/// Rate limiting service wrapper.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<dyn RateLimiter>,
    resolver: Arc<ClientKeyResolver>,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
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
        let client_key = self.resolver.resolve(&req);

        // The decision is synchronous and the limiter lock is released before
        // the inner service runs.
        let admitted = self.limiter.allow(&client_key);
        let limit = self.limiter.limit();
        let window = self.limiter.window();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            if admitted {
                trace!(client_key = %client_key, "Request admitted by rate limiter");
                metrics::record_admitted();
                return inner.call(req).await;
            }

            let retry_after = retry_after_secs(window);
            warn!(
                client_key = %client_key,
                path = %req.uri().path(),
                limit,
                retry_after_secs = retry_after,
                "Rate limit exceeded"
            );
            metrics::record_rate_limited();

            Ok(rate_limited_response(limit, retry_after))
        })
    }
}

/// Whole seconds until a full window has passed, at least 1.
fn retry_after_secs(window: Duration) -> u64 {
    let secs = window.as_secs() + u64::from(window.subsec_nanos() > 0);
    secs.max(1)
}

/// Build the 429 response with rate limit headers.
fn rate_limited_response(limit: u32, retry_after: u64) -> Response<Body> {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [
            (RETRY_AFTER.as_str(), retry_after.to_string()),
            (RATE_LIMIT_LIMIT_HEADER, limit.to_string()),
            (RATE_LIMIT_REMAINING_HEADER, "0".to_string()),
        ],
        "Rate limit exceeded",
    )
        .into_response()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::body::to_bytes;
    use tower::{ServiceExt, service_fn};

    use super::*;
    use crate::limiter::{Strategy, WindowConfig, build_limiter};

    fn limiter(max_requests: u32) -> Arc<dyn RateLimiter> {
        build_limiter(
            Strategy::SlidingWindow,
            WindowConfig::new(max_requests, Duration::from_secs(60)).unwrap(),
        )
    }

    fn request(ip: &'static str) -> Request<Body> {
        Request::builder()
            .uri("/api/hello")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_admits_then_rejects_with_headers() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let svc = RateLimitLayer::new(limiter(2), Arc::new(ClientKeyResolver::default())).layer(
            service_fn(move |_req: Request<Body>| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Infallible>(Response::new(Body::empty()))
                }
            }),
        );

        for _ in 0..2 {
            let resp = svc.clone().oneshot(request("1.2.3.4")).await.unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
        }

        let resp = svc.clone().oneshot(request("1.2.3.4")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers().get("retry-after").unwrap(), "60");
        assert_eq!(resp.headers().get(RATE_LIMIT_LIMIT_HEADER).unwrap(), "2");
        assert_eq!(resp.headers().get(RATE_LIMIT_REMAINING_HEADER).unwrap(), "0");
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"Rate limit exceeded");

        // Another client still has its own quota.
        let resp = svc.oneshot(request("5.6.7.8")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_capacity_rejects_everything() {
        let svc = RateLimitLayer::new(limiter(0), Arc::new(ClientKeyResolver::default())).layer(
            service_fn(|_req: Request<Body>| async {
                Ok::<_, Infallible>(Response::new(Body::empty()))
            }),
        );

        let resp = svc.oneshot(request("1.2.3.4")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(retry_after_secs(Duration::from_secs(60)), 60);
        assert_eq!(retry_after_secs(Duration::from_millis(1500)), 2);
        assert_eq!(retry_after_secs(Duration::from_millis(10)), 1);
    }
}
