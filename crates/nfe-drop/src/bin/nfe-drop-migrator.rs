//! Migrator - applies the embedded SQL migrations and exits

use std::time::Duration;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use nfe_common::logging::{init_logging, LogConfig};
use nfe_drop::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let log_config = LogConfig::from_env().unwrap_or_default();
    init_logging(&log_config)?;

    info!("starting nfe-drop-migrator");

    let config = Config::load()?;

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database_url())
        .await?;

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("failed to run migrations: {}", e))?;

    info!("database migrations completed");

    Ok(())
}
