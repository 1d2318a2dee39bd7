//! Shared foundation for the nfe-drop pipeline.
//!
//! This crate holds the pieces both daemons (and the migrator) need:
//!
//! - [`error`]: the common error type with actionable messages
//! - [`logging`]: tracing-based logging configuration and initialization
//! - [`checksum`]: SHA-256 helpers used for invoice integrity hashing

pub mod checksum;
pub mod error;
pub mod logging;

pub use error::{NfeError, Result};
