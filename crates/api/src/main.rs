use anyhow::Context;

use saldo_infra::config::LedgerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    saldo_observability::init();

    let config = LedgerConfig::from_env().context("invalid configuration")?;
    let services = saldo_api::app::services::build_services(&config).await?;
    let app = saldo_api::app::build_app(services);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
