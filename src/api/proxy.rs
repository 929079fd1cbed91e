//! Reverse proxy handler.
//!
//! Every request that reaches the load balancer is forwarded verbatim to the
//! next healthy upstream chosen by the [`Pooler`], streaming both bodies so
//! large payloads never buffer in memory. Hop-by-hop headers are stripped in
//! both directions per RFC 7230 section 6.1.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    response::Response,
};

use crate::core::middleware::UpstreamAddr;
use crate::core::{AppError, Result};
use crate::services::Pooler;

/// Headers that are meaningful only for a single transport hop and must not
/// be forwarded to the upstream or relayed back to the client.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Shared state for the proxy handler.
#[derive(Clone)]
pub struct ProxyState {
    pub pool: Arc<dyn Pooler>,
    pub http_client: reqwest::Client,
}

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name)
}

/// Forward the incoming request to the next healthy upstream.
///
/// Upstream selection failures (every server marked dead) surface as a 503
/// before any connection is attempted. Transport errors talking to the chosen
/// upstream map to 502, timeouts to 504; see [`AppError::Request`].
pub async fn forward(
    State(state): State<ProxyState>,
    request: Request<Body>,
) -> Result<Response> {
    let upstream = state.pool.get().map_err(|e| {
        tracing::error!(error = %e, "upstream selection failed");
        e
    })?;

    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let target = format!("{}{}", upstream.trim_end_matches('/'), path_and_query);

    tracing::debug!(upstream = %upstream, target = %target, "forwarding request");

    // axum and reqwest sit on different http crate versions, so method and
    // header values cross the boundary as bytes rather than as typed values.
    let method = reqwest::Method::from_bytes(request.method().as_str().as_bytes())
        .map_err(|_| AppError::BadRequest("unsupported HTTP method".to_string()))?;

    let mut upstream_request = state.http_client.request(method, &target);
    for (name, value) in request.headers() {
        let name = name.as_str();
        // Host is regenerated by the client for the upstream authority.
        if name == "host" || is_hop_by_hop(name) {
            continue;
        }
        upstream_request = upstream_request.header(name, value.as_bytes());
    }

    let body_stream = request.into_body().into_data_stream();
    let upstream_response = upstream_request
        .body(reqwest::Body::wrap_stream(body_stream))
        .send()
        .await?;

    let status = StatusCode::from_u16(upstream_response.status().as_u16())
        .unwrap_or(StatusCode::BAD_GATEWAY);

    let mut builder = Response::builder().status(status);
    for (name, value) in upstream_response.headers() {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_bytes());
    }

    let mut response = builder
        .body(Body::from_stream(upstream_response.bytes_stream()))
        .map_err(|e| AppError::Internal(e.to_string()))?;

    // Expose the chosen upstream to the metrics middleware.
    response.extensions_mut().insert(UpstreamAddr(upstream));

    Ok(response)
}
