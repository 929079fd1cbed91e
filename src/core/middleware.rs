//! HTTP middleware for request identity, metrics, and rate limiting.
//!
//! The rate-limit middleware is the admission boundary of the rate limiter
//! service: it maps a missing key and an exhausted bucket to the structured
//! error bodies clients depend on, and forwards everything else.

use crate::core::error::AppError;
use crate::core::logging::generate_request_id;
use crate::core::metrics::get_metrics;
use crate::services::bucket::Bucket;
use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use std::time::Instant;

/// Header carrying the caller's rate-limit key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Extension type for the per-request correlation id
#[derive(Clone, Debug)]
pub struct RequestId(pub String);

/// Extension type recording which upstream served a proxied request
#[derive(Clone, Debug)]
pub struct UpstreamAddr(pub String);

/// Attach a correlation id to the request and echo it back in the
/// `x-request-id` response header.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = generate_request_id();
    request
        .extensions_mut()
        .insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Admission control keyed on the `X-API-Key` header.
///
/// Missing key → 400, exhausted bucket → 429, both with the structured
/// JSON bodies from [`AppError`]; admitted requests pass through untouched.
pub async fn rate_limit_middleware(
    State(bucket): State<Arc<Bucket>>,
    request: Request,
    next: Next,
) -> Response {
    let key = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let metrics = get_metrics();

    if key.is_empty() {
        metrics
            .rate_limit_decisions
            .with_label_values(&["missing_key"])
            .inc();
        return AppError::MissingApiKey.into_response();
    }

    if !bucket.take(&key).await {
        metrics
            .rate_limit_decisions
            .with_label_values(&["denied"])
            .inc();
        tracing::debug!("rate limit exceeded");
        return AppError::RateLimited.into_response();
    }

    metrics
        .rate_limit_decisions
        .with_label_values(&["allowed"])
        .inc();
    next.run(request).await
}

/// Middleware for tracking request metrics.
pub struct MetricsMiddleware;

impl MetricsMiddleware {
    /// Track metrics for incoming requests.
    ///
    /// This middleware:
    /// - Increments active request counter
    /// - Measures request duration
    /// - Records request count by upstream and status code
    /// - Logs request details
    pub async fn track_metrics(request: Request, next: Next) -> Response {
        let endpoint = request.uri().path().to_string();
        let method = request.method().to_string();

        // Skip metrics endpoint itself to avoid recursion
        if endpoint == "/metrics" {
            return next.run(request).await;
        }

        let metrics = get_metrics();
        metrics.active_requests.with_label_values(&[&endpoint]).inc();

        let start = Instant::now();
        let response = next.run(request).await;
        let duration = start.elapsed().as_secs_f64();
        let status_code = response.status().as_u16().to_string();

        // Set by the proxy handler; absent on locally answered requests
        let upstream = response
            .extensions()
            .get::<UpstreamAddr>()
            .map(|u| u.0.as_str())
            .unwrap_or("none");

        metrics
            .request_count
            .with_label_values(&[&method, &endpoint, upstream, &status_code])
            .inc();
        metrics
            .request_duration
            .with_label_values(&[&method, &endpoint])
            .observe(duration);

        if upstream == "none" {
            tracing::info!(
                "{} {} - status={} duration={:.3}s",
                method,
                endpoint,
                status_code,
                duration
            );
        } else {
            tracing::info!(
                "{} {} - status={} upstream={} duration={:.3}s",
                method,
                endpoint,
                status_code,
                upstream,
                duration
            );
        }

        metrics.active_requests.with_label_values(&[&endpoint]).dec();

        response
    }
}
