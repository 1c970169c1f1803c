use std::sync::Arc;
use std::time::Instant;

use coco_endpoint::EndpointEngine;
use coco_observability::{AccessLogExporter, MetricsCollector};
use coco_queue::Queue;
use tracing::{error, info};

/// Pulls invocations off the queue one at a time and runs them through the
/// endpoint engine, handing the result back through the queue's rendezvous.
///
/// A single worker processes entries sequentially; `n_workers` of these run
/// concurrently as separate tasks to get parallelism, matching how the
/// queue's blocking `dequeue` naturally load-balances across consumers.
pub struct Worker {
    queue: Arc<dyn Queue>,
    engine: Arc<EndpointEngine>,
    metrics: Arc<MetricsCollector>,
    access_log: Arc<AccessLogExporter>,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn Queue>,
        engine: Arc<EndpointEngine>,
        metrics: Arc<MetricsCollector>,
        access_log: Arc<AccessLogExporter>,
    ) -> Self {
        Self { queue, engine, metrics, access_log }
    }

    /// Run until the shutdown sentinel is popped.
    pub async fn run(&self) {
        loop {
            let Some(entry) = self.queue.dequeue().await else {
                info!("worker received shutdown sentinel, exiting");
                return;
            };

            let started = Instant::now();
            let result = self.engine.execute_by_name(&entry.endpoint, entry.request_body).await;
            let elapsed = started.elapsed().as_secs_f64();

            let (status, body) = match result {
                Ok((status, body)) => (status, body),
                Err(err) => {
                    error!(endpoint = %entry.endpoint, error = %err, "endpoint execution failed");
                    (err.status_code(), serde_json::from_slice(&err.to_json_body()).unwrap())
                }
            };

            self.metrics.record_invocation(&entry.endpoint, &entry.method, status, elapsed);
            self.access_log.access_log(&entry.method, &entry.endpoint, status, elapsed * 1000.0, &entry.params);

            if entry.endpoint == "update-blocklist" && status == 200 {
                self.metrics.set_blocklist_size(self.engine.blocklist_len());
            }

            self.queue.complete(&entry.key, status, body);
        }
    }
}
