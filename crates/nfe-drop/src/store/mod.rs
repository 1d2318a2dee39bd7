//! Transactional invoice persistence
//!
//! One [`InvoiceStore::save`] call writes the invoice header, its raw XML
//! and all child rows inside a single transaction. Uniqueness on the
//! access key and the integrity hash turns resubmissions into
//! [`SaveOutcome::Duplicate`] without side effects.

pub mod invoice_store;

use async_trait::async_trait;

use nfe_common::Result;

use crate::invoice::ParsedInvoice;

pub use invoice_store::PgInvoiceStore;

/// Result of persisting one parsed invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The invoice and all children were committed under this id.
    Saved { invoice_id: i64 },
    /// A row with the same access key or integrity hash already exists;
    /// nothing was written.
    Duplicate,
}

/// Atomically persists one parsed invoice across the five tables.
#[async_trait]
pub trait InvoiceStore: Send + Sync {
    async fn save(&self, invoice: &ParsedInvoice) -> Result<SaveOutcome>;
}
