#![deny(unused)]
//! agentgate - agent gateway server.
//!
//! Loads configuration, installs telemetry, opens the configured state
//! backend, and serves the gateway over HTTP until interrupted.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use agent_gateway::{configure_tracing, setup_metrics_recorder, Gateway, GatewayServer};
use agent_gateway_core::config::AppConfig;
use agent_gateway_store::build_backend;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    configure_tracing(&config.telemetry)?;

    tracing::info!("Starting agentgate v{}", env!("CARGO_PKG_VERSION"));

    let backend = build_backend(&config.store)?;
    let gateway = Arc::new(
        Gateway::builder()
            .with_backend(backend)
            .with_config(&config.gateway)
            .build(),
    );

    let mut server = GatewayServer::new(config.server.clone(), gateway);
    if config.telemetry.metrics_enabled {
        server = server.with_metrics(setup_metrics_recorder()?);
    }

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                return;
            }
            tracing::info!("Shutdown signal received");
            shutdown.cancel();
        });
    }

    server.run(shutdown).await?;
    Ok(())
}
