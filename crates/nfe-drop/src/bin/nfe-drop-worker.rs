//! Worker daemon - main entry point

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

use nfe_common::logging::{init_logging, LogConfig};
use nfe_drop::config::Config;
use nfe_drop::invoice::InvoiceParser;
use nfe_drop::metrics;
use nfe_drop::queue::RabbitMqQueue;
use nfe_drop::shutdown::shutdown_signal;
use nfe_drop::store::PgInvoiceStore;
use nfe_drop::worker::Worker;

#[tokio::main]
async fn main() -> Result<()> {
    let log_config = LogConfig::from_env().unwrap_or_default();
    init_logging(&log_config)?;

    info!("starting nfe-drop-worker");

    let config = Config::load()?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database_url())
        .await?;
    info!("connected to the application database");

    metrics::init_metrics()?;
    let metrics_addr = config.metrics.worker_addr;
    tokio::spawn(async move {
        if let Err(e) = metrics::serve_metrics(metrics_addr).await {
            error!(error = %e, "metrics server failed");
        }
    });

    // A broker that cannot be reached degrades the worker to polling mode
    // instead of preventing startup.
    let queue = if config.queue_enabled() {
        match RabbitMqQueue::connect(&config.queue_settings()).await {
            Ok(queue) => {
                info!(
                    url = %config.queue.url,
                    queue = %config.queue.queue_name,
                    "RabbitMQ enabled in worker"
                );
                Some(Arc::new(queue))
            }
            Err(e) => {
                error!(error = %e, "failed to create RabbitMQ client, falling back to polling mode");
                None
            }
        }
    } else {
        info!("RabbitMQ queue disabled in worker (NFE_DROP_QUEUE_BACKEND != rabbitmq)");
        None
    };

    let parser = InvoiceParser::with_xsd(config.xsd_settings());
    let store = Arc::new(PgInvoiceStore::new(pool));

    let worker = Arc::new(Worker::new(config.dirs.clone(), parser, store));
    worker.run(queue, shutdown_signal()).await?;

    info!("nfe-drop-worker finished");

    Ok(())
}
