use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use stockwatch_infra::config::{AppConfig, StorageConfig};
use stockwatch_infra::store::{InMemoryInventoryStore, ItemStore, PostgresInventoryStore};
use stockwatch_infra::sweeper::LowStockSweeper;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stockwatch_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    tracing::info!(
        sweep_enabled = config.sweeper.enabled,
        sweep_interval_secs = config.sweeper.interval.as_secs(),
        alert_channel = ?config.alerts.channel,
        "starting stockwatch worker"
    );

    let items = open_item_store(&config.storage).await?;
    let alerts = config.alerts.build_dispatcher();
    if !alerts.is_enabled() {
        tracing::warn!("no alert channel configured; alerts will be dropped");
    }

    let sweeper = LowStockSweeper::new(items, alerts, config.sweeper.clone()).start();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown requested");

    if let Some(handle) = sweeper {
        handle.stop().await;
    }
    Ok(())
}

async fn open_item_store(storage: &StorageConfig) -> anyhow::Result<Arc<dyn ItemStore>> {
    let Some(url) = storage.database_url.as_deref() else {
        tracing::warn!("DATABASE_URL not set; using in-memory store");
        return Ok(Arc::new(InMemoryInventoryStore::new()));
    };

    let pool = PgPoolOptions::new()
        .max_connections(storage.max_connections)
        .connect(url)
        .await
        .context("failed to connect to postgres")?;
    let store = PostgresInventoryStore::new(pool);
    store.migrate().await.context("failed to apply migrations")?;
    Ok(Arc::new(store))
}
