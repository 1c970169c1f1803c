use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path as AxumPath, State as AxumState};
use axum::response::Json;
use axum::routing::any;
use axum::Router;
use coco_core::Host;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::info;

/// A callback a fake host runs for one endpoint name, producing the body
/// it replies with. Receives the host's own bound port so tests can make
/// different fake hosts disagree without a time/random source.
pub type Callback = Arc<dyn Fn(u16, Value) -> Value + Send + Sync>;

#[derive(Clone)]
struct FarmState {
    port: u16,
    callbacks: Arc<HashMap<String, Callback>>,
    counters: Arc<DashMap<(u16, String), u64>>,
}

/// A farm of fake backend hosts, each accepting any `/{name}` call and
/// running the callback registered for `name`, counting every call it
/// receives. Used to exercise the forwarder and endpoint engine end to
/// end without a real backend.
pub struct Farm {
    pub hosts: Vec<Host>,
    counters: Arc<DashMap<(u16, String), u64>>,
    shutdowns: Vec<oneshot::Sender<()>>,
}

impl Farm {
    /// Start `n_hosts` fake backends, each dispatching calls through
    /// `callbacks`.
    pub async fn start(n_hosts: usize, callbacks: HashMap<String, Callback>) -> Self {
        let callbacks = Arc::new(callbacks);
        let counters = Arc::new(DashMap::new());
        let mut hosts = Vec::with_capacity(n_hosts);
        let mut shutdowns = Vec::with_capacity(n_hosts);

        for _ in 0..n_hosts {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();

            let state = FarmState { port, callbacks: callbacks.clone(), counters: counters.clone() };
            let router = Router::new().route("/{name}", any(endpoint)).with_state(state);

            let (tx, rx) = oneshot::channel();
            tokio::spawn(async move {
                axum::serve(listener, router)
                    .with_graceful_shutdown(async {
                        rx.await.ok();
                    })
                    .await
                    .ok();
            });

            info!(port, "started fake endpoint host");
            hosts.push(Host::new("127.0.0.1", port));
            shutdowns.push(tx);
        }

        Self { hosts, counters, shutdowns }
    }

    /// Number of times `name` was called on `port`.
    pub fn count(&self, port: u16, name: &str) -> u64 {
        self.counters.get(&(port, name.to_string())).map(|c| *c).unwrap_or(0)
    }

    pub async fn stop(self) {
        for tx in self.shutdowns {
            tx.send(()).ok();
        }
    }
}

async fn endpoint(
    AxumState(state): AxumState<FarmState>,
    AxumPath(name): AxumPath<String>,
    body: Option<Json<Value>>,
) -> Json<Value> {
    let body = body.map(|Json(v)| v).unwrap_or(Value::Null);
    *state.counters.entry((state.port, name.clone())).or_insert(0) += 1;

    let reply = match state.callbacks.get(&name) {
        Some(callback) => callback(state.port, body),
        None => Value::Null,
    };
    Json(reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn farm_counts_calls_and_runs_the_registered_callback() {
        let mut callbacks: HashMap<String, Callback> = HashMap::new();
        callbacks.insert("ping".to_string(), Arc::new(|_port, _body| serde_json::json!({"pong": true})));

        let farm = Farm::start(1, callbacks).await;
        let host = &farm.hosts[0];

        let client = reqwest::Client::new();
        let response: Value = client
            .get(format!("{}/ping", host.base_url()))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(response, serde_json::json!({"pong": true}));
        assert_eq!(farm.count(host.port.unwrap(), "ping"), 1);

        farm.stop().await;
    }
}
