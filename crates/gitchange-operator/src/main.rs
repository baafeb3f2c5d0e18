//! Controller entry point: wires the Kubernetes client, the metrics
//! endpoint, and both control loops together.

use std::sync::Arc;

use anyhow::Context as _;
use gitchange::OperatorConfig;
use gitchange::reconcile::{self, Context};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // kube's rustls transport needs a process-wide crypto provider.
    rustls::crypto::ring::default_provider()
        .install_default()
        .ok();

    let config = OperatorConfig::from_env();
    tracing::info!(metrics_addr = %config.metrics_addr, "starting gitchange operator");

    let client = kube::Client::try_default()
        .await
        .context("failed to build the Kubernetes client")?;

    let listener = tokio::net::TcpListener::bind(&config.metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics address {}", config.metrics_addr))?;
    let metrics_server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, gitchange::metrics::router()).await {
            tracing::error!(error = %e, "metrics server stopped");
        }
    });

    let ctx = Arc::new(Context::new(client, config));
    reconcile::run(ctx).await;

    metrics_server.abort();
    tracing::info!("gitchange operator stopped");
    Ok(())
}
