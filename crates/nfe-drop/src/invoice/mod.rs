//! NF-e invoice parsing
//!
//! Turns raw invoice XML bytes into a [`model::ParsedInvoice`] ready for
//! persistence. The parser is schema-tolerant: it understands both the
//! authorization envelope (`nfeProc`) and the bare `NFe` document, every
//! ICMS tax variant, and both v4 and legacy issue-date fields.

pub mod model;
pub mod parser;
pub mod xml;
pub mod xsd;

pub use model::{ParsedInvoice, ParsedItem, ParsedPayment, ParsedReceivable};
pub use parser::InvoiceParser;
