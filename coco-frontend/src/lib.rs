//! The HTTP surface of Coco: a generic `/{endpoint}` handler that enqueues
//! work for the worker pool, the builtin local endpoints that bypass the
//! queue entirely, and a `/metrics` scrape endpoint.

pub mod server;

pub use server::{build_router, AppState};

use std::net::SocketAddr;

use tracing::info;

/// Bind and serve the router on `port`, running until the process is
/// signalled to stop (the caller owns shutdown via `axum::serve`'s
/// `with_graceful_shutdown`, not wired here to keep this crate's surface
/// small — see `coco-server` for the full lifecycle).
pub async fn serve(app_state: AppState, port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "frontend listening");
    axum::serve(listener, build_router(app_state)).await?;
    Ok(())
}
