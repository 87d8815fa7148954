//! Warden authority
//!
//! Central authority of the suspension escalation engine: records usage,
//! escalates violations into infractions and suspensions, and pushes
//! suspensions to registered enforcement points.

use anyhow::Context;
use std::sync::Arc;

use warden_core::config::AppConfig;
use warden_gateway::{GatewayConfig, GatewayServer};
use warden_governance::AuthorityContext;
use warden_store::{InMemoryInfractionStore, InMemoryMetricService, InMemoryPolicyStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("failed to load configuration")?;

    warden_governance::configure_tracing(config.governance.json_logs)?;

    tracing::info!("Starting Warden authority v{}", env!("CARGO_PKG_VERSION"));

    // =========================================================================
    // Observability
    // =========================================================================
    let metrics_handle = if config.governance.enable_metrics {
        Some(warden_governance::setup_metrics_recorder()?)
    } else {
        None
    };

    // =========================================================================
    // Stores
    // =========================================================================
    let policies = Arc::new(InMemoryPolicyStore::new());
    let infractions = Arc::new(InMemoryInfractionStore::new());
    let metric_service = Arc::new(InMemoryMetricService::new());
    tracing::info!("Initializing in-memory policy, infraction and metric stores");

    // =========================================================================
    // Authority and background services
    // =========================================================================
    let (context, events) = AuthorityContext::build(config.clone(), policies, infractions, metric_service);
    let services = context.start(events);

    // =========================================================================
    // HTTP surface
    // =========================================================================
    let gateway_config = GatewayConfig::from(&config.server);
    let mut server = GatewayServer::new(gateway_config.clone(), context.authority.clone());
    if let Some(handle) = metrics_handle {
        server = server.with_metrics(handle);
    }

    tracing::info!(
        host = %gateway_config.host,
        port = gateway_config.port,
        "Authority gateway initialized"
    );

    let result = server
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
        })
        .await;

    services.shutdown().await;
    result?;

    tracing::info!("Warden authority stopped");
    Ok(())
}
