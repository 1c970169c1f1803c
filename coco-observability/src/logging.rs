use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global `tracing` subscriber for the process. Level comes
/// from `log_level` (a `RUST_LOG`-style filter directive, e.g. `"info"` or
/// `"coco_worker=debug,info"`), falling back to `info` if it fails to parse.
///
/// Output is JSON-formatted, one object per line, matching how the rest of
/// the fleet's logs are shipped and queried.
pub fn init(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer().json().with_target(true).with_current_span(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .ok();
}
