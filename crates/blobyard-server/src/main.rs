use blobyard_server::{config::ServerConfig, create_app, AppState, Blobstores};
use color_eyre::eyre;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,blobyard=debug")),
        )
        .init();

    info!("Starting blobyard...");

    let config = ServerConfig::from_env()?;
    let addr = config.socket_addr()?;
    let stores = Blobstores::from_config(&config).await?;
    let state = Arc::new(AppState::new(config, stores));
    let shutdown = state.shutdown.clone();

    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Blobyard listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutdown requested, cancelling in-flight bundles");
            shutdown.cancel();
        })
        .await?;

    Ok(())
}
