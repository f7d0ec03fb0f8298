use crate::api;
use crate::metrics;
use crate::service::Agent;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Serve the agent on `listener` until the process exits.
///
/// # Errors
///
/// Returns an error if the listener fails.
pub async fn run(listener: TcpListener, agent: Arc<Agent>) -> anyhow::Result<()> {
    run_with_shutdown(listener, agent, std::future::pending()).await
}

/// Serve the agent until `shutdown` completes.
///
/// On shutdown the agent stops reporting ready, every pending wait ends as
/// cancelled and open sessions are closed; in-flight requests then finish
/// before this returns.
///
/// # Errors
///
/// Returns an error if the listener fails.
pub async fn run_with_shutdown<F>(
    listener: TcpListener,
    agent: Arc<Agent>,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local_addr = listener.local_addr()?;
    info!("echo agent listening on {}", local_addr);

    let app = api::router(agent.clone(), metrics::install_recorder());
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("shutdown signal received, cancelling pending waits");
            agent.shutdown().await;
        })
        .await?;

    info!("server shut down gracefully");
    Ok(())
}
