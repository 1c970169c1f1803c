use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Prometheus metrics for the Coco deployment: one registry shared by the
/// frontend and worker processes (or threads, in the single-binary build).
///
/// Mirrors the shape of an invocation: a request enters through the
/// frontend, sits in the queue, and is executed by a worker against one
/// endpoint, possibly failing.
pub struct MetricsCollector {
    registry: Registry,
    pub endpoint_invocations_total: IntCounterVec,
    pub endpoint_failures_total: IntCounterVec,
    pub endpoint_latency_seconds: HistogramVec,
    pub queue_depth: IntGauge,
    pub queue_dropped_total: IntCounterVec,
    pub blocklist_size: IntGauge,
}

impl MetricsCollector {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let endpoint_invocations_total = IntCounterVec::new(
            Opts::new("endpoint_invocations_total", "Endpoint invocations by name and method").namespace("coco"),
            &["endpoint", "method"],
        )?;
        let endpoint_failures_total = IntCounterVec::new(
            Opts::new("endpoint_failures_total", "Endpoint invocations that ended in a failure status").namespace("coco"),
            &["endpoint", "status"],
        )?;
        let endpoint_latency_seconds = HistogramVec::new(
            HistogramOpts::new("endpoint_latency_seconds", "End-to-end endpoint execution latency")
                .namespace("coco")
                .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["endpoint"],
        )?;
        let queue_depth = IntGauge::with_opts(Opts::new("queue_depth", "Entries currently sitting in the queue").namespace("coco"))?;
        let queue_dropped_total = IntCounterVec::new(
            Opts::new("queue_dropped_total", "Requests rejected because the queue was full").namespace("coco"),
            &["endpoint"],
        )?;
        let blocklist_size = IntGauge::with_opts(Opts::new("blocklist_size", "Number of hosts currently blocklisted").namespace("coco"))?;

        registry.register(Box::new(endpoint_invocations_total.clone()))?;
        registry.register(Box::new(endpoint_failures_total.clone()))?;
        registry.register(Box::new(endpoint_latency_seconds.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(queue_dropped_total.clone()))?;
        registry.register(Box::new(blocklist_size.clone()))?;

        Ok(Self {
            registry,
            endpoint_invocations_total,
            endpoint_failures_total,
            endpoint_latency_seconds,
            queue_depth,
            queue_dropped_total,
            blocklist_size,
        })
    }

    /// Record one completed invocation against the counters and histogram.
    pub fn record_invocation(&self, endpoint: &str, method: &str, status: u16, duration_secs: f64) {
        self.endpoint_invocations_total.with_label_values(&[endpoint, method]).inc();
        self.endpoint_latency_seconds.with_label_values(&[endpoint]).observe(duration_secs);
        if status >= 400 {
            self.endpoint_failures_total
                .with_label_values(&[endpoint, &status.to_string()])
                .inc();
        }
    }

    pub fn record_dropped(&self, endpoint: &str) {
        self.queue_dropped_total.with_label_values(&[endpoint]).inc();
    }

    pub fn set_queue_depth(&self, depth: i64) {
        self.queue_depth.set(depth);
    }

    pub fn set_blocklist_size(&self, size: i64) {
        self.blocklist_size.set(size);
    }

    /// Render the registry in Prometheus text exposition format, for a
    /// `/metrics` scrape endpoint.
    pub fn gather_text(&self) -> String {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&metric_families, &mut buffer).ok();
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new().expect("static metric descriptors are always valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_invocation_increments_counters_and_histogram() {
        let collector = MetricsCollector::new().unwrap();
        collector.record_invocation("ping", "GET", 200, 0.01);
        collector.record_invocation("ping", "GET", 503, 0.02);

        let text = collector.gather_text();
        assert!(text.contains("coco_endpoint_invocations_total"));
        assert!(text.contains("coco_endpoint_failures_total"));
        assert!(text.contains("coco_endpoint_latency_seconds"));
    }

    #[test]
    fn gauges_reflect_latest_set_value() {
        let collector = MetricsCollector::new().unwrap();
        collector.set_queue_depth(3);
        collector.set_blocklist_size(2);
        let text = collector.gather_text();
        assert!(text.contains("coco_queue_depth 3"));
        assert!(text.contains("coco_blocklist_size 2"));
    }

    #[test]
    fn dropped_counter_is_labeled_per_endpoint() {
        let collector = MetricsCollector::new().unwrap();
        collector.record_dropped("save-state");
        let text = collector.gather_text();
        assert!(text.contains("coco_queue_dropped_total"));
        assert!(text.contains("save-state"));
    }
}
