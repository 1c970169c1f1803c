use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use coco_core::{Blocklist, CocoConfig, State};
use coco_endpoint::{EndpointEngine, EndpointRegistry};
use coco_forwarder::{parse_timeout, RequestForwarder};
use coco_frontend::AppState;
use coco_observability::{logging, AccessLogConfig, AccessLogExporter, MetricsCollector};
use coco_queue::{InMemoryQueue, Queue};
use coco_worker::{run_call_on_start, spawn_scheduled, Worker};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "coco", version, about = "Coco — a configuration controller fronting a fleet of backend hosts")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "/etc/coco/coco.yaml")]
    config: PathBuf,

    /// Log level filter, e.g. "info" or "coco_worker=debug,info".
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Reset all state to its initial contents and exit.
    #[arg(long)]
    reset: bool,

    /// Parse and validate the configuration, then exit without serving.
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    let config = CocoConfig::load(&cli.config)?;
    info!(config = %cli.config.display(), "configuration loaded");

    if cli.check_config {
        info!("configuration is valid");
        return Ok(());
    }

    let state = Arc::new(State::new(
        config.storage_path.clone(),
        config.load_state.clone(),
        config.exclude_from_reset.clone(),
    )?);

    if cli.reset {
        state.reset()?;
        info!("state reset to initial contents");
        return Ok(());
    }

    let known_hosts: Vec<_> = config
        .groups
        .values()
        .flatten()
        .map(|h| coco_core::Host::parse(h))
        .collect();
    let blocklist = Arc::new(Blocklist::new(known_hosts, config.blocklist_path.clone())?);

    let registry = Arc::new(EndpointRegistry::from_config(&config)?);
    let forward_timeout = parse_timeout(&config.timeout)?;
    let frontend_timeout = parse_timeout(&config.frontend_timeout)?;
    let forwarder = Arc::new(RequestForwarder::new(blocklist.clone(), config.session_limit));
    let engine = Arc::new(EndpointEngine::new(
        registry.clone(),
        forwarder,
        blocklist.clone(),
        state.clone(),
        forward_timeout,
    ));

    let metrics = Arc::new(MetricsCollector::new()?);
    metrics.set_blocklist_size(blocklist.hosts().len() as i64);
    let access_log = Arc::new(AccessLogExporter::new(&AccessLogConfig {
        enabled: false,
        endpoint_url: String::new(),
    }));

    let queue: Arc<dyn Queue> = Arc::new(InMemoryQueue::new(config.queue_length));

    run_call_on_start(&engine, &registry.call_on_start_endpoints()).await;
    let scheduled_handles = spawn_scheduled(engine.clone(), registry.scheduled_endpoints());

    let mut worker_handles = Vec::with_capacity(config.n_workers);
    for _ in 0..config.n_workers {
        let worker = Worker::new(queue.clone(), engine.clone(), metrics.clone(), access_log.clone());
        worker_handles.push(tokio::spawn(async move { worker.run().await }));
    }

    let app_state = AppState {
        queue: queue.clone(),
        metrics: metrics.clone(),
        access_log,
        frontend_timeout,
    };
    let router = coco_frontend::build_router(app_state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "frontend listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutdown signal received, draining workers");
    queue.shutdown().await;
    for handle in worker_handles {
        handle.await.ok();
    }
    for handle in scheduled_handles {
        handle.abort();
    }

    info!("coco stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to listen for ctrl-c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
