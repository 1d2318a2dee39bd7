//! nfe-drop pipeline library
//!
//! High-throughput ingestion of NF-e electronic invoices dropped into a
//! filesystem inbox. Two daemons share this library:
//!
//! - **nfe-drop-watcher**: detects drops in `incoming/`, verifies the file
//!   stabilized, promotes it to `processing/` and publishes a job to the
//!   broker.
//! - **nfe-drop-worker**: consumes jobs, parses and optionally
//!   XSD-validates each invoice, persists it atomically across five
//!   tables, and routes the file to `processed/`, `failed/` or `ignored/`.
//!
//! The third binary, **nfe-drop-migrator**, applies the embedded SQL
//! migrations.
//!
//! # Architecture
//!
//! `incoming/ → watcher → processing/ → broker → worker → (parser →
//! store) → {processed,failed,ignored}/`
//!
//! The broker's prefetch is the sole backpressure knob; per-access-key
//! atomicity comes from the database uniqueness constraints. Metrics are
//! observed at every terminal transition and exposed at `GET /metrics`.

pub mod config;
pub mod invoice;
pub mod metrics;
pub mod queue;
pub mod shutdown;
pub mod store;
pub mod watcher;
pub mod worker;

pub use config::Config;
