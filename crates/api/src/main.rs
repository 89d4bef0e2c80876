use std::sync::Arc;

use anyhow::Context;

use branchledger_api::app::services::{build_services, open_database};
use branchledger_infra::{AppConfig, LogFormat};
use branchledger_observability::LogConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("invalid configuration")?;

    branchledger_observability::init(&LogConfig {
        json: config.log_format == LogFormat::Json,
        filter: None,
    });

    let db = open_database(&config).await?;
    let services = Arc::new(build_services(&config, db));
    let app = branchledger_api::app::build_app(services);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(
        addr = %listener.local_addr()?,
        webhook_timeout_ms = config.webhook_timeout.as_millis() as u64,
        allow_negative_stock = config.policy.allow_negative_stock,
        persistent = config.database_url.is_some(),
        "listening"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
