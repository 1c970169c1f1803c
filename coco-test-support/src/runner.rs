use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use coco_core::{Blocklist, CocoConfig, Host, State};
use coco_endpoint::{EndpointEngine, EndpointRegistry};
use coco_forwarder::{parse_timeout, RequestForwarder};
use coco_frontend::{build_router, AppState};
use coco_observability::{AccessLogConfig, AccessLogExporter, MetricsCollector};
use coco_queue::{InMemoryQueue, Queue};
use coco_worker::Worker;
use serde_json::Value;
use tower::ServiceExt;

/// Everything an integration test needs to drive a Coco instance entirely
/// in-process: a [`axum::Router`] reachable via `tower::ServiceExt::oneshot`
/// (no bound port), a worker task draining the same queue, plus the shared
/// stores both sides wrap.
pub struct CocoRunner {
    app_state: AppState,
    state: Arc<State>,
    blocklist: Arc<Blocklist>,
    worker_handle: tokio::task::JoinHandle<()>,
    _temp_dir: tempfile::TempDir,
}

impl CocoRunner {
    /// Build a runner from an inline config document (typically a
    /// `serde_json::json!` literal), with storage and blocklist paths
    /// rewritten into a fresh temp directory, and spawn a single worker
    /// draining its queue.
    pub fn from_config(mut config: Value) -> Self {
        let dir = tempfile::tempdir().unwrap();
        config["storage_path"] = Value::String(dir.path().join("state").display().to_string());
        config["blocklist_path"] = Value::String(dir.path().join("bl.json").display().to_string());

        let config: CocoConfig = serde_json::from_value(config).unwrap();

        let known_hosts: Vec<Host> = config.groups.values().flatten().map(|h| Host::parse(h)).collect();
        let blocklist = Arc::new(Blocklist::new(known_hosts, config.blocklist_path.clone()).unwrap());
        let state = Arc::new(
            State::new(config.storage_path.clone(), HashMap::new(), config.exclude_from_reset.clone()).unwrap(),
        );

        let registry = Arc::new(EndpointRegistry::from_config(&config).unwrap());
        let forwarder = Arc::new(RequestForwarder::new(blocklist.clone(), config.session_limit));
        let timeout = parse_timeout(&config.timeout).unwrap();
        let engine = Arc::new(EndpointEngine::new(registry, forwarder, blocklist.clone(), state.clone(), timeout));

        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let access_log = Arc::new(AccessLogExporter::new(&AccessLogConfig { enabled: false, endpoint_url: String::new() }));
        let queue: Arc<dyn Queue> = Arc::new(InMemoryQueue::new(config.queue_length));

        let worker = Worker::new(queue.clone(), engine, metrics.clone(), access_log.clone());
        let worker_handle = tokio::spawn(async move { worker.run().await });

        let app_state = AppState {
            queue,
            metrics,
            access_log,
            frontend_timeout: Duration::from_millis(500),
        };

        Self { app_state, state, blocklist, worker_handle, _temp_dir: dir }
    }

    pub fn queue(&self) -> Arc<dyn Queue> {
        self.app_state.queue.clone()
    }

    pub fn state(&self) -> Arc<State> {
        self.state.clone()
    }

    pub fn blocklist(&self) -> Arc<Blocklist> {
        self.blocklist.clone()
    }

    /// Push the shutdown sentinel and wait for the worker task to exit.
    pub async fn shutdown(self) {
        self.app_state.queue.shutdown().await;
        self.worker_handle.await.ok();
    }

    /// Send a request through the router without binding a port, returning
    /// `(status, body)`.
    pub async fn call(&self, method: Method, path: &str, body: Value) -> (StatusCode, Value) {
        let router = build_router(self.app_state.clone());
        let request = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }
}
