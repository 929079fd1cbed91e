//! Integration tests for the load balancer.
//!
//! These tests assemble the same router the binary serves and drive it
//! against wiremock backends, covering forwarding, rotation, health-gated
//! failover, and the local metrics endpoint.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    routing::get,
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use tower_http::trace::TraceLayer;
use turnpike::{
    api::{forward, metrics_handler, ProxyState},
    core::{init_metrics, middleware::request_id_middleware, MetricsMiddleware},
    services::{HealthChecker, Pooler, ServerPool},
};
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Build the application exactly as the load balancer binary does.
fn create_lb_app(pool: Arc<ServerPool>) -> Router {
    init_metrics();

    let state = ProxyState {
        pool,
        http_client: reqwest::Client::new(),
    };

    Router::new()
        .route("/metrics", get(metrics_handler))
        .fallback(forward)
        .with_state(state)
        .layer(axum::middleware::from_fn(MetricsMiddleware::track_metrics))
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
}

async fn get_body(app: Router, uri: &str) -> (StatusCode, String) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

async fn mock_backend(body: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_forwards_request_to_backend() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/data"))
        .respond_with(ResponseTemplate::new(200).set_body_string("payload"))
        .mount(&backend)
        .await;

    let pool = Arc::new(ServerPool::new(&[backend.uri()]).unwrap());
    let app = create_lb_app(pool);

    let (status, body) = get_body(app, "/api/data").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "payload");
}

#[tokio::test]
async fn test_forwards_post_body() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/submit"))
        .and(body_json(serde_json::json!({"name": "alice"})))
        .respond_with(ResponseTemplate::new(201))
        .mount(&backend)
        .await;

    let pool = Arc::new(ServerPool::new(&[backend.uri()]).unwrap());
    let app = create_lb_app(pool);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/submit")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"name": "alice"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_rotates_over_backends_in_configured_order() {
    let backend_a = mock_backend("a").await;
    let backend_b = mock_backend("b").await;
    let backend_c = mock_backend("c").await;

    let pool = Arc::new(
        ServerPool::new(&[backend_a.uri(), backend_b.uri(), backend_c.uri()]).unwrap(),
    );
    let app = create_lb_app(pool);

    let mut bodies = Vec::new();
    for _ in 0..6 {
        let (status, body) = get_body(app.clone(), "/").await;
        assert_eq!(status, StatusCode::OK);
        bodies.push(body);
    }

    assert_eq!(bodies, vec!["a", "b", "c", "a", "b", "c"]);
}

#[tokio::test]
async fn test_health_checker_removes_dead_backend_from_rotation() {
    init_metrics();
    let live = mock_backend("live").await;
    // Nothing listens on port 9, so probes fail with a connect error
    let dead = "http://127.0.0.1:9".to_string();

    let pool = Arc::new(ServerPool::new(&[live.uri(), dead.clone()]).unwrap());
    let checker = HealthChecker::start(
        pool.clone(),
        reqwest::Client::new(),
        Duration::from_millis(50),
    );

    // Give the first probe cycle time to finish
    tokio::time::sleep(Duration::from_millis(300)).await;

    let app = create_lb_app(pool.clone());
    for _ in 0..4 {
        let (status, body) = get_body(app.clone(), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "live");
    }

    // Configured order is still reported in full
    assert_eq!(pool.get_all(), vec![live.uri(), dead]);

    checker.stop().await;
}

#[tokio::test]
async fn test_returns_503_when_every_backend_is_dead() {
    init_metrics();
    let dead = "http://127.0.0.1:9".to_string();
    let pool = Arc::new(ServerPool::new(&[dead]).unwrap());
    let checker = HealthChecker::start(
        pool.clone(),
        reqwest::Client::new(),
        Duration::from_millis(50),
    );

    tokio::time::sleep(Duration::from_millis(300)).await;

    let app = create_lb_app(pool);
    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(
        json,
        serde_json::json!({"code": 503, "message": "no available server"})
    );

    checker.stop().await;
}

#[tokio::test]
async fn test_backend_rejoins_rotation_after_recovery() {
    init_metrics();
    let flaky = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&flaky)
        .await;
    let steady = mock_backend("steady").await;

    let pool = Arc::new(ServerPool::new(&[flaky.uri(), steady.uri()]).unwrap());
    let checker = HealthChecker::start(
        pool.clone(),
        reqwest::Client::new(),
        Duration::from_millis(50),
    );

    tokio::time::sleep(Duration::from_millis(300)).await;

    let app = create_lb_app(pool.clone());
    let (_, body) = get_body(app.clone(), "/").await;
    assert_eq!(body, "steady");

    // Backend comes back healthy
    flaky.reset().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("flaky"))
        .mount(&flaky)
        .await;

    tokio::time::sleep(Duration::from_millis(300)).await;

    let mut bodies = Vec::new();
    for _ in 0..4 {
        let (_, body) = get_body(app.clone(), "/").await;
        bodies.push(body);
    }
    assert!(bodies.contains(&"flaky".to_string()));
    assert!(bodies.contains(&"steady".to_string()));

    checker.stop().await;
}

#[tokio::test]
async fn test_metrics_endpoint_is_served_locally() {
    let backend = mock_backend("backend").await;
    let pool = Arc::new(ServerPool::new(&[backend.uri()]).unwrap());
    let app = create_lb_app(pool);

    // Warm up with one proxied request so counters are populated
    let _ = get_body(app.clone(), "/").await;

    let (status, text) = get_body(app, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("# HELP"));
    assert!(text.contains("turnpike_requests_total"));

    // Exactly one request reached the backend; /metrics was answered locally
    let received = backend.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
}

#[tokio::test]
async fn test_response_carries_request_id_header() {
    let backend = mock_backend("backend").await;
    let pool = Arc::new(ServerPool::new(&[backend.uri()]).unwrap());
    let app = create_lb_app(pool);

    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let request_id = response
        .headers()
        .get("x-request-id")
        .expect("x-request-id header missing")
        .to_str()
        .unwrap();
    assert_eq!(request_id.len(), 36);
}

#[tokio::test]
async fn test_concurrent_requests_spread_over_backends() {
    let backend_a = mock_backend("a").await;
    let backend_b = mock_backend("b").await;

    let pool = Arc::new(ServerPool::new(&[backend_a.uri(), backend_b.uri()]).unwrap());
    let app = create_lb_app(pool);

    let mut handles = vec![];
    for _ in 0..10 {
        let app = app.clone();
        handles.push(tokio::spawn(async move {
            let (status, _) = get_body(app, "/").await;
            assert_eq!(status, StatusCode::OK);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let hits_a = backend_a.received_requests().await.unwrap().len();
    let hits_b = backend_b.received_requests().await.unwrap().len();
    assert_eq!(hits_a + hits_b, 10);
    assert_eq!(hits_a, 5);
    assert_eq!(hits_b, 5);
}
