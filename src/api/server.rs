//! Server lifecycle: bind, serve, and shut down on a signal.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;

use crate::api::router::api_router;
use crate::pipeline::Scheduler;

/// How often idle sessions are swept.
const SWEEP_INTERVAL: Duration = Duration::from_secs(600);

/// Binds the configured address and serves the API until `shutdown` resolves.
pub async fn serve<F>(scheduler: Scheduler, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(&scheduler.config().bind_addr).await?;
    serve_on(listener, scheduler, shutdown).await
}

/// Serves the API on an already bound listener.
pub async fn serve_on<F>(listener: TcpListener, scheduler: Scheduler, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = listener.local_addr()?;
    let sweeper = scheduler.spawn_session_sweeper(SWEEP_INTERVAL);
    let app = api_router(scheduler);

    tracing::info!(%addr, "API server started");
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await;
    sweeper.abort();
    tracing::info!("API server stopped");
    result
}

/// Resolves on Ctrl-C.
pub async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
