//! Stratus API server entry point.

use stratus_api::{http, ApiConfig, StratusServer};
use tokio::signal;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::from_default_env()
                .add_directive("stratus_api=info".parse()?)
                .add_directive("stratus_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting Stratus API server");

    let config = ApiConfig::from_env();
    tracing::info!(?config, "Configuration loaded");

    config.validate_warn();

    let server = StratusServer::new(config.clone()).await?;
    server.start().await?;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let http_manager = server.manager_arc();
    let http_addr = config.http_addr;
    let mut shutdown_rx = shutdown_tx.subscribe();
    let http_handle = tokio::spawn(async move {
        let shutdown = async move {
            let _ = shutdown_rx.recv().await;
        };

        if let Err(e) = http::serve(http_manager, http_addr, shutdown).await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    tracing::info!(http_addr = %config.http_addr, "Server ready");

    signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal, cleaning up...");

    let _ = shutdown_tx.send(());
    let _ = http_handle.await;

    // Stops the poller and writes the final snapshot.
    if let Err(e) = server.shutdown().await {
        tracing::error!(error = %e, "Error during shutdown");
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}
