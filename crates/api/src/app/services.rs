use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde_json::Value as JsonValue;

use branchledger_events::{BusSink, EventEnvelope, InMemoryEventBus};
use branchledger_infra::services::StoreSyncService;
use branchledger_infra::{AppConfig, CoreContext, Database, InMemoryDatabase, PostgresDatabase, StaticSettings};

pub type EnvelopeBus = InMemoryEventBus<EventEnvelope<JsonValue>>;

#[derive(Debug, Clone)]
pub struct AppServices {
    pub ctx: CoreContext,
    pub sync: StoreSyncService,
    /// Committed domain events, for in-process subscribers.
    pub bus: Arc<EnvelopeBus>,
    pub webhook_timeout: Duration,
}

impl AppServices {
    /// Wrap an existing context. The context keeps whatever event sink it was
    /// built with; `bus` only sees events if that sink publishes onto it.
    pub fn new(ctx: CoreContext, bus: Arc<EnvelopeBus>, webhook_timeout: Duration) -> Self {
        Self {
            sync: StoreSyncService::new(ctx.clone()),
            ctx,
            bus,
            webhook_timeout,
        }
    }
}

/// Wire the services over `db`.
pub fn build_services(config: &AppConfig, db: Arc<dyn Database>) -> AppServices {
    let bus = Arc::new(EnvelopeBus::new());
    let ctx = CoreContext::in_memory()
        .with_database(db)
        .with_settings(Arc::new(StaticSettings::new(config.policy)))
        .with_events(Arc::new(BusSink::new(bus.clone())));
    AppServices::new(ctx, bus, config.webhook_timeout)
}

/// Postgres when `database_url` is set (schema applied on connect), the
/// in-memory store otherwise.
pub async fn open_database(config: &AppConfig) -> anyhow::Result<Arc<dyn Database>> {
    let Some(url) = config.database_url.as_deref() else {
        tracing::warn!("no database configured; state is kept in memory and lost on restart");
        return Ok(Arc::new(InMemoryDatabase::new()));
    };
    let db = PostgresDatabase::connect(url, config.db_max_connections)
        .await
        .context("failed to connect to postgres")?;
    db.migrate().await.context("failed to apply schema")?;
    tracing::info!(max_connections = config.db_max_connections, "connected to postgres");
    Ok(Arc::new(db))
}
