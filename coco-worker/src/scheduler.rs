use std::sync::Arc;

use coco_endpoint::{Endpoint, EndpointEngine};
use tracing::{error, info};

/// Runs every `call_on_start` endpoint once, synchronously, before the
/// frontend is allowed to bind — so a controller that seeds state on boot
/// never serves a request against half-initialized state.
pub async fn run_call_on_start(engine: &EndpointEngine, endpoints: &[Arc<Endpoint>]) {
    for endpoint in endpoints {
        info!(endpoint = %endpoint.name, "running call_on_start endpoint");
        if let Err(err) = engine.execute(endpoint, serde_json::json!({})).await {
            error!(endpoint = %endpoint.name, error = %err, "call_on_start endpoint failed");
        }
    }
}

/// Spawns one periodic task per endpoint declaring a `schedule.period`,
/// invoking it on that cadence for the lifetime of the process.
pub fn spawn_scheduled(engine: Arc<EndpointEngine>, endpoints: Vec<Arc<Endpoint>>) -> Vec<tokio::task::JoinHandle<()>> {
    endpoints
        .into_iter()
        .filter_map(|endpoint| {
            let period = endpoint.schedule_period?;
            let engine = engine.clone();
            Some(tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    info!(endpoint = %endpoint.name, "running scheduled endpoint");
                    if let Err(err) = engine.execute(&endpoint, serde_json::json!({})).await {
                        error!(endpoint = %endpoint.name, error = %err, "scheduled endpoint failed");
                    }
                }
            }))
        })
        .collect()
}
