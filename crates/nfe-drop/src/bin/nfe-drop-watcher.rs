//! Watcher daemon - main entry point

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use nfe_common::logging::{init_logging, LogConfig};
use nfe_drop::config::Config;
use nfe_drop::metrics;
use nfe_drop::queue::{JobPublisher, RabbitMqQueue};
use nfe_drop::shutdown::shutdown_signal;
use nfe_drop::watcher::Watcher;

#[tokio::main]
async fn main() -> Result<()> {
    let log_config = LogConfig::from_env().unwrap_or_default();
    init_logging(&log_config)?;

    info!("starting nfe-drop-watcher");

    let config = Config::load()?;

    metrics::init_metrics()?;
    let metrics_addr = config.metrics.watcher_addr;
    tokio::spawn(async move {
        if let Err(e) = metrics::serve_metrics(metrics_addr).await {
            error!(error = %e, "metrics server failed");
        }
    });

    let publisher: Option<Arc<dyn JobPublisher>> = if config.queue_enabled() {
        let queue = RabbitMqQueue::connect(&config.queue_settings()).await?;
        info!(
            url = %config.queue.url,
            queue = %config.queue.queue_name,
            "RabbitMQ enabled in watcher"
        );
        Some(Arc::new(queue))
    } else {
        info!("RabbitMQ queue disabled in watcher (NFE_DROP_QUEUE_BACKEND != rabbitmq)");
        None
    };

    let watcher = Watcher::new(config.dirs.clone(), publisher);
    watcher.run(shutdown_signal()).await?;

    info!("nfe-drop-watcher finished");

    Ok(())
}
