//! End-to-end tests for the full router.
//!
//! Most tests drive the router in-process with `tower::ServiceExt::oneshot`.
//! Those requests carry no `ConnectInfo`, so clients are told apart through
//! `X-Forwarded-For`. The `server` tests bind a real listener and use
//! `reqwest` to exercise the peer-address fallback.
//!
//! Run with: `cargo test --test integration_tests`
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::header::{AUTHORIZATION, RETRY_AFTER, WWW_AUTHENTICATE};
use axum::http::{Method, Request, StatusCode};
use axum::response::Response;
use gatekeeper::{AppState, Config, StageOrder, build_router};
use serde_json::Value;
use tower::ServiceExt;

const TOKEN: &str = "integration-secret";

fn base_config() -> Config {
    Config {
        auth_token: TOKEN.to_string(),
        metrics_port: 0,
        ..Config::default()
    }
}

fn rate_limited_config(max_requests: u32) -> Config {
    Config {
        rate_limit_enabled: true,
        rate_limit_max_requests: max_requests,
        rate_limit_window: Duration::from_secs(60),
        ..base_config()
    }
}

/// Router plus the state, so tests can inspect the limiter and shut down.
struct TestApp {
    state: AppState,
    router: Router,
}

impl TestApp {
    fn new(config: Config) -> Self {
        let state = AppState::new(config).expect("state should build");
        let router = build_router(state.clone());
        Self { state, router }
    }

    async fn send(&self, req: Request<Body>) -> Response {
        self.router.clone().oneshot(req).await.unwrap()
    }

    async fn get(&self, path: &str, client_ip: &str, token: Option<&str>) -> Response {
        self.send(request(Method::GET, path, client_ip, token)).await
    }
}

fn request(method: Method, path: &str, client_ip: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(path)
        .header("x-forwarded-for", client_ip);
    if let Some(token) = token {
        builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

async fn body_text(resp: Response) -> String {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(resp: Response) -> Value {
    serde_json::from_str(&body_text(resp).await).unwrap()
}

// =============================================================================
// Handlers
// =============================================================================

#[tokio::test]
async fn test_hello_with_valid_token() {
    let app = TestApp::new(base_config());

    let resp = app.get("/api/hello", "1.1.1.1", Some(TOKEN)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().contains_key("x-request-id"));

    let json = body_json(resp).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["message"], "Hello World!");
}

#[tokio::test]
async fn test_api_info_lists_endpoints() {
    let app = TestApp::new(base_config());

    let json = body_json(app.get("/api", "1.1.1.1", Some(TOKEN)).await).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["message"], "API Information");
    assert_eq!(json["data"]["name"], "gatekeeper");
    let paths: Vec<&str> = json["data"]["endpoints"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["path"].as_str().unwrap())
        .collect();
    assert!(paths.contains(&"/api/hello"));
}

#[tokio::test]
async fn test_health_reports_version() {
    let app = TestApp::new(base_config());

    let json = body_json(app.get("/health", "1.1.1.1", Some(TOKEN)).await).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(json["rate_limit_enabled"], false);
}

#[tokio::test]
async fn test_wrong_method_is_405_envelope() {
    let app = TestApp::new(base_config());

    let resp = app
        .send(request(Method::POST, "/api/hello", "1.1.1.1", Some(TOKEN)))
        .await;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(
        body_json(resp).await,
        serde_json::json!({"success": false, "error": "Method not allowed"})
    );
}

#[tokio::test]
async fn test_unknown_path_is_404_envelope() {
    let app = TestApp::new(base_config());

    let resp = app.get("/nope", "1.1.1.1", Some(TOKEN)).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(resp).await["error"], "Not found");
}

// =============================================================================
// Authentication
// =============================================================================

#[tokio::test]
async fn test_every_route_requires_token() {
    let app = TestApp::new(base_config());

    for path in ["/api", "/api/hello", "/health", "/nope"] {
        let resp = app.get(path, "1.1.1.1", None).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "path {path}");
        assert_eq!(resp.headers().get(WWW_AUTHENTICATE).unwrap(), "Bearer");
        // Rejections still carry the request ID
        assert!(resp.headers().contains_key("x-request-id"));
        assert_eq!(body_text(resp).await, "Unauthorized");
    }
}

#[tokio::test]
async fn test_wrong_token_is_401() {
    let app = TestApp::new(base_config());

    let resp = app.get("/api", "1.1.1.1", Some("not-the-secret")).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_auth_failure_guard_blocks_client() {
    let app = TestApp::new(Config {
        auth_failure_limit: 3,
        ..base_config()
    });

    for _ in 0..3 {
        let resp = app.get("/api", "6.6.6.6", Some("guess")).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    let resp = app.get("/api", "6.6.6.6", Some(TOKEN)).await;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);

    // Another client is unaffected
    let resp = app.get("/api", "7.7.7.7", Some(TOKEN)).await;
    assert_eq!(resp.status(), StatusCode::OK);

    app.state.shutdown().await;
}

// =============================================================================
// Rate limiting
// =============================================================================

#[tokio::test]
async fn test_rate_limit_exceeded_headers() {
    let app = TestApp::new(rate_limited_config(3));

    for _ in 0..3 {
        let resp = app.get("/api/hello", "2.2.2.2", Some(TOKEN)).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let resp = app.get("/api/hello", "2.2.2.2", Some(TOKEN)).await;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(resp.headers().get(RETRY_AFTER).unwrap(), "60");
    assert_eq!(resp.headers().get("x-ratelimit-limit").unwrap(), "3");
    assert_eq!(resp.headers().get("x-ratelimit-remaining").unwrap(), "0");
    assert_eq!(body_text(resp).await, "Rate limit exceeded");

    app.state.shutdown().await;
}

#[tokio::test]
async fn test_clients_have_separate_quotas() {
    let app = TestApp::new(rate_limited_config(1));

    assert_eq!(
        app.get("/api", "3.3.3.3", Some(TOKEN)).await.status(),
        StatusCode::OK
    );
    assert_eq!(
        app.get("/api", "3.3.3.3", Some(TOKEN)).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(
        app.get("/api", "4.4.4.4", Some(TOKEN)).await.status(),
        StatusCode::OK
    );

    app.state.shutdown().await;
}

#[tokio::test]
async fn test_only_first_forwarded_entry_is_the_key() {
    let app = TestApp::new(rate_limited_config(1));

    let resp = app.get("/api", "5.5.5.5, 10.0.0.1", Some(TOKEN)).await;
    assert_eq!(resp.status(), StatusCode::OK);

    // Different proxy hop, same client
    let resp = app.get("/api", " 5.5.5.5 , 10.0.0.2", Some(TOKEN)).await;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);

    app.state.shutdown().await;
}

#[tokio::test]
async fn test_auth_first_unauthenticated_requests_keep_quota() {
    let app = TestApp::new(rate_limited_config(2));

    for _ in 0..10 {
        let resp = app.get("/api", "8.8.8.8", None).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
    assert_eq!(app.state.limiter().unwrap().tracked_keys(), 0);

    for _ in 0..2 {
        let resp = app.get("/api", "8.8.8.8", Some(TOKEN)).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    app.state.shutdown().await;
}

#[tokio::test]
async fn test_rate_limit_first_answers_429_before_auth() {
    let app = TestApp::new(Config {
        chain_order: StageOrder::RateLimitFirst,
        ..rate_limited_config(2)
    });

    for _ in 0..2 {
        let resp = app.get("/api", "9.9.9.9", None).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    let resp = app.get("/api", "9.9.9.9", None).await;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);

    app.state.shutdown().await;
}

#[tokio::test]
async fn test_zero_capacity_rejects_authenticated_requests() {
    let app = TestApp::new(rate_limited_config(0));

    let resp = app.get("/api/hello", "1.2.3.4", Some(TOKEN)).await;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);

    app.state.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_requests_never_exceed_limit() {
    const CAPACITY: u32 = 20;
    const REQUESTS: usize = 200;

    let app = TestApp::new(rate_limited_config(CAPACITY));

    let handles: Vec<_> = (0..REQUESTS)
        .map(|_| {
            let router = app.router.clone();
            tokio::spawn(async move {
                router
                    .oneshot(request(Method::GET, "/api", "4.3.2.1", Some(TOKEN)))
                    .await
                    .unwrap()
                    .status()
            })
        })
        .collect();

    let mut ok = 0;
    let mut limited = 0;
    for handle in handles {
        match handle.await.unwrap() {
            StatusCode::OK => ok += 1,
            StatusCode::TOO_MANY_REQUESTS => limited += 1,
            other => panic!("unexpected status {other}"),
        }
    }

    assert_eq!(ok, CAPACITY as usize);
    assert_eq!(limited, REQUESTS - CAPACITY as usize);

    app.state.shutdown().await;
}

#[tokio::test]
async fn test_token_bucket_strategy_limits_too() {
    let app = TestApp::new(Config {
        rate_limit_strategy: gatekeeper::Strategy::TokenBucket,
        ..rate_limited_config(2)
    });

    for _ in 0..2 {
        let resp = app.get("/api", "1.0.0.1", Some(TOKEN)).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }
    let resp = app.get("/api", "1.0.0.1", Some(TOKEN)).await;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);

    app.state.shutdown().await;
}

// =============================================================================
// Real listener
// =============================================================================

/// Serve the app on an ephemeral port with connect info enabled.
async fn spawn_server(config: Config) -> (SocketAddr, AppState) {
    let state = AppState::new(config).expect("state should build");
    let app = build_router(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to ephemeral port");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("server failed");
    });

    (addr, state)
}

#[tokio::test]
async fn test_server_keys_by_peer_address_without_headers() {
    let (addr, state) = spawn_server(rate_limited_config(2)).await;
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap();
    let url = format!("http://{addr}/api/hello");

    for _ in 0..2 {
        let resp = client.get(&url).bearer_auth(TOKEN).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
    }

    let resp = client.get(&url).bearer_auth(TOKEN).send().await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::TOO_MANY_REQUESTS);

    // The loopback peer address is the only tracked key
    assert_eq!(state.limiter().unwrap().tracked_keys(), 1);

    // A forwarded client is a different bucket
    let resp = client
        .get(&url)
        .bearer_auth(TOKEN)
        .header("x-forwarded-for", "203.0.113.7")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    state.shutdown().await;
}

#[tokio::test]
async fn test_server_ignores_headers_from_untrusted_peer() {
    let (addr, state) = spawn_server(Config {
        trusted_proxies: vec!["10.0.0.0/8".to_string()],
        ..rate_limited_config(1)
    })
    .await;
    let client = reqwest::Client::new();
    let url = format!("http://{addr}/api");

    let resp = client
        .get(&url)
        .bearer_auth(TOKEN)
        .header("x-forwarded-for", "203.0.113.1")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    // Spoofing another address does not buy a fresh bucket
    let resp = client
        .get(&url)
        .bearer_auth(TOKEN)
        .header("x-forwarded-for", "203.0.113.2")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::TOO_MANY_REQUESTS);

    // Health checks share the peer's bucket too
    let resp = client
        .get(format!("http://{addr}/health"))
        .bearer_auth(TOKEN)
        .header("x-forwarded-for", "203.0.113.3")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(resp.text().await.unwrap(), "Rate limit exceeded");

    state.shutdown().await;
}
