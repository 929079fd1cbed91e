//! Admin API for capacity management.
//!
//! The rate limiter exposes a separate listener where operators assign
//! per-token capacities. Writes go straight to the database; running buckets
//! pick the new value up on their next refill cycle.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::api::handlers::{health, metrics_handler};
use crate::core::database::CapacityStore;
use crate::core::{AppError, Result};

/// Write half of the capacity store.
///
/// Handlers depend on this instead of the concrete store so tests can stub
/// the database away.
#[async_trait]
pub trait CapacityWriter: Send + Sync {
    async fn set_capacity(&self, token: &str, capacity: i32) -> Result<()>;
}

#[async_trait]
impl CapacityWriter for CapacityStore {
    async fn set_capacity(&self, token: &str, capacity: i32) -> Result<()> {
        CapacityStore::set_capacity(self, token, capacity).await
    }
}

#[derive(Debug, Deserialize)]
pub struct SetCapacityRequest {
    pub token: String,
    pub capacity: u32,
}

/// Assign the capacity for a token.
///
/// The body is parsed by hand so every malformed payload maps to a 400 with
/// the standard error envelope. The token itself is never logged.
pub async fn set_capacity(
    State(writer): State<Arc<dyn CapacityWriter>>,
    body: Bytes,
) -> Result<Json<serde_json::Value>> {
    let request: SetCapacityRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("invalid request body: {e}")))?;

    if request.token.is_empty() {
        return Err(AppError::BadRequest("token is required".to_string()));
    }
    let capacity = i32::try_from(request.capacity)
        .map_err(|_| AppError::BadRequest("capacity out of range".to_string()))?;

    writer.set_capacity(&request.token, capacity).await?;

    tracing::info!(capacity = capacity, "token capacity updated");

    Ok(Json(serde_json::json!({"status": "ok"})))
}

/// Create the admin API router.
pub fn admin_router(writer: Arc<dyn CapacityWriter>) -> Router {
    Router::new()
        .route("/set_capacity", post(set_capacity))
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .with_state(writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use std::sync::Mutex;
    use tower::ServiceExt;

    async fn body_json(body: Body) -> serde_json::Value {
        let bytes = to_bytes(body, usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[derive(Default)]
    struct RecordingWriter {
        writes: Mutex<Vec<(String, i32)>>,
    }

    #[async_trait]
    impl CapacityWriter for RecordingWriter {
        async fn set_capacity(&self, token: &str, capacity: i32) -> Result<()> {
            self.writes
                .lock()
                .unwrap()
                .push((token.to_string(), capacity));
            Ok(())
        }
    }

    struct FailingWriter;

    #[async_trait]
    impl CapacityWriter for FailingWriter {
        async fn set_capacity(&self, _token: &str, _capacity: i32) -> Result<()> {
            Err(AppError::Database(sqlx::Error::PoolClosed))
        }
    }

    fn post_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/set_capacity")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_set_capacity_persists_and_acknowledges() {
        let writer = Arc::new(RecordingWriter::default());
        let app = admin_router(writer.clone());

        let response = app
            .oneshot(post_request(r#"{"token": "alice", "capacity": 42}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response.into_body()).await;
        assert_eq!(json, serde_json::json!({"status": "ok"}));
        assert_eq!(
            writer.writes.lock().unwrap().as_slice(),
            &[("alice".to_string(), 42)]
        );
    }

    #[tokio::test]
    async fn test_set_capacity_rejects_malformed_json() {
        let app = admin_router(Arc::new(RecordingWriter::default()));

        let response = app.oneshot(post_request("{not json")).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response.into_body()).await;
        assert_eq!(json["code"], 400);
    }

    #[tokio::test]
    async fn test_set_capacity_rejects_missing_fields() {
        let app = admin_router(Arc::new(RecordingWriter::default()));

        let response = app
            .oneshot(post_request(r#"{"token": "alice"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_set_capacity_rejects_negative_capacity() {
        let app = admin_router(Arc::new(RecordingWriter::default()));

        let response = app
            .oneshot(post_request(r#"{"token": "alice", "capacity": -3}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_set_capacity_rejects_capacity_beyond_i32() {
        let app = admin_router(Arc::new(RecordingWriter::default()));

        let response = app
            .oneshot(post_request(r#"{"token": "alice", "capacity": 3000000000}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response.into_body()).await;
        assert_eq!(json["message"], "capacity out of range");
    }

    #[tokio::test]
    async fn test_set_capacity_rejects_empty_token() {
        let app = admin_router(Arc::new(RecordingWriter::default()));

        let response = app
            .oneshot(post_request(r#"{"token": "", "capacity": 5}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response.into_body()).await;
        assert_eq!(json["message"], "token is required");
    }

    #[tokio::test]
    async fn test_set_capacity_maps_store_failures_to_500() {
        let app = admin_router(Arc::new(FailingWriter));

        let response = app
            .oneshot(post_request(r#"{"token": "alice", "capacity": 7}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response.into_body()).await;
        assert_eq!(
            json,
            serde_json::json!({"code": 500, "message": "failed to update capacity"})
        );
    }

    #[tokio::test]
    async fn test_admin_health_route() {
        let app = admin_router(Arc::new(RecordingWriter::default()));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response.into_body()).await;
        assert_eq!(json["status"], "ok");
    }
}
