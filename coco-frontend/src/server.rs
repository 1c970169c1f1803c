use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Path as AxumPath, State as AxumState};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use coco_observability::{AccessLogExporter, MetricsCollector};
use coco_queue::Queue;
use serde_json::{json, Value};
use tracing::warn;

/// State shared across every handler.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<dyn Queue>,
    pub metrics: Arc<MetricsCollector>,
    pub access_log: Arc<AccessLogExporter>,
    pub frontend_timeout: Duration,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/wait", axum::routing::post(wait))
        .route("/{endpoint}", get(dispatch).post(dispatch))
        .with_state(app_state)
}

async fn metrics_handler(AxumState(state): AxumState<AppState>) -> String {
    state.metrics.gather_text()
}

/// Sleeps for the requested number of seconds before acknowledging. Touches
/// no shared state, so it answers directly instead of going through the
/// queue. Useful for exercising `frontend_timeout` and queue-draining
/// behaviour by hand.
async fn wait(Json(body): Json<Value>) -> Response {
    let seconds = body.get("seconds").and_then(Value::as_f64).unwrap_or(0.0);
    tokio::time::sleep(Duration::from_secs_f64(seconds.max(0.0))).await;
    Json(json!({ "reply": "ok" })).into_response()
}

/// The generic endpoint handler: enqueue the request and wait for the
/// worker to deliver a result through the rendezvous, bounded by
/// `frontend_timeout`.
async fn dispatch(
    AxumState(state): AxumState<AppState>,
    AxumPath(endpoint): AxumPath<String>,
    method: axum::http::Method,
    body: Option<Json<Value>>,
) -> Response {
    let started = Instant::now();
    let body = body.map(|Json(v)| v).unwrap_or(Value::Null);
    let method_str = method.as_str().to_string();

    let enqueued = state
        .queue
        .enqueue(method_str.clone(), endpoint.clone(), body, String::new())
        .await;

    let (key, rx) = match enqueued {
        Ok(pair) => pair,
        Err(err) => {
            state.metrics.record_dropped(&endpoint);
            return error_response(err);
        }
    };

    let response = match tokio::time::timeout(state.frontend_timeout, rx).await {
        Ok(Ok((status, body))) => build_response(status, body),
        Ok(Err(_)) => {
            warn!(endpoint = %endpoint, "rendezvous sender dropped without completing");
            error_response(coco_core::CocoError::Internal("worker never completed this request".into()))
        }
        Err(_) => {
            warn!(endpoint = %endpoint, key = %key, "frontend timed out waiting for worker");
            build_response(504, json!({ "reply": "Coco did not respond in time.", "status": 504 }))
        }
    };

    state
        .access_log
        .access_log(&method_str, &endpoint, response.status().as_u16(), started.elapsed().as_secs_f64() * 1000.0, "");

    response
}

fn build_response(status: u16, body: Value) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(body)).into_response()
}

fn error_response(err: coco_core::CocoError) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = serde_json::from_slice(&err.to_json_body()).unwrap_or(json!({"reply": "internal error"}));
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use coco_observability::AccessLogConfig;
    use coco_queue::InMemoryQueue;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        AppState {
            queue: Arc::new(InMemoryQueue::new(1)),
            metrics: Arc::new(MetricsCollector::new().unwrap()),
            access_log: Arc::new(AccessLogExporter::new(&AccessLogConfig { enabled: false, endpoint_url: String::new() })),
            frontend_timeout: Duration::from_millis(50),
        }
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn wait_acknowledges_after_the_requested_delay() {
        let app_state = test_state();
        let router = build_router(app_state);
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/wait")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({"seconds": 0.01}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["reply"], "ok");
    }

    #[tokio::test]
    async fn dispatch_times_out_when_no_worker_is_draining_the_queue() {
        let app_state = test_state();
        let router = build_router(app_state);
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/ping")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn dispatch_returns_503_when_queue_is_full() {
        let app_state = test_state();
        // capacity is 1: fill it first so the second request is rejected.
        let _ = app_state
            .queue
            .enqueue("POST".into(), "ping".into(), json!({}), String::new())
            .await
            .unwrap();
        let router = build_router(app_state);
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/ping")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
