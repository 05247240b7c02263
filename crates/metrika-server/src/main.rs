use anyhow::Result;
use clap::Parser;
use metrika_server::config::{ServerArgs, ServerConfig};
use metrika_server::server;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("metrika=info".parse()?))
        .init();

    let config = ServerConfig::from_args(ServerArgs::parse())?;
    tracing::info!(
        address = %config.address,
        grpc_address = %config.grpc_address,
        store_interval = config.store_interval,
        restore = config.restore,
        database = config.uses_database(),
        "Loaded configuration"
    );

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if let Err(e) = signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                return;
            }
            tracing::info!("Shutdown signal received");
            cancel.cancel();
        }
    });

    server::run(config, cancel).await
}
