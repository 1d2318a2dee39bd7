//! Prometheus metrics instrumentation
//!
//! Two time-series describe every terminal transition in the worker:
//!
//! - `invoices_processed_total{status, source}` — counter;
//!   status ∈ {success, parse_error, db_error, duplicate}, source ∈ {xml, zip}
//! - `invoice_process_duration_seconds{status, source}` — histogram
//!
//! Both daemons expose the registry over HTTP at `GET /metrics`.

use std::net::SocketAddr;
use std::sync::LazyLock;
use std::time::Duration;

use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{CounterVec, HistogramOpts, HistogramVec, Opts, Registry};
use tracing::{error, info};

/// Global Prometheus registry for the pipeline.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Counter of processed invoices by outcome and origin.
pub static INVOICES_PROCESSED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "invoices_processed_total",
        "Number of invoices processed, by status and source (xml/zip)",
    );
    CounterVec::new(opts, &["status", "source"])
        .expect("invoices_processed_total metric creation failed")
});

/// Histogram of per-invoice processing time in seconds.
pub static INVOICE_PROCESS_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        "invoice_process_duration_seconds",
        "Processing time of each invoice in seconds",
    );
    HistogramVec::new(opts, &["status", "source"])
        .expect("invoice_process_duration_seconds metric creation failed")
});

/// Register all metrics with the global registry.
///
/// Idempotent: duplicate registrations are tolerated.
pub fn init_metrics() -> anyhow::Result<()> {
    let registry = &*REGISTRY;

    for metric in [
        Box::new(INVOICES_PROCESSED_TOTAL.clone()) as Box<dyn prometheus::core::Collector>,
        Box::new(INVOICE_PROCESS_DURATION_SECONDS.clone()),
    ] {
        if let Err(e) = registry.register(metric) {
            let msg = e.to_string();
            if !msg.contains("Duplicate metrics collector registration attempted") {
                return Err(e.into());
            }
        }
    }

    Ok(())
}

/// Record the outcome of one processed invoice.
pub fn observe_invoice(status: &str, source: &str, elapsed: Duration) {
    INVOICES_PROCESSED_TOTAL
        .with_label_values(&[status, source])
        .inc();
    INVOICE_PROCESS_DURATION_SECONDS
        .with_label_values(&[status, source])
        .observe(elapsed.as_secs_f64());
}

/// Gather all registered metrics in Prometheus text format.
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .map_err(Into::into)
}

/// Serve `GET /metrics` on `addr` until the process exits.
///
/// Spawn this on its own task; a bind failure is logged and surfaced.
pub async fn serve_metrics(addr: SocketAddr) -> anyhow::Result<()> {
    let app = Router::new().route("/metrics", get(metrics_handler));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "metrics endpoint listening");

    axum::serve(listener, app).await?;

    Ok(())
}

async fn metrics_handler() -> impl IntoResponse {
    match gather_metrics() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(e) => {
            error!(error = %e, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
