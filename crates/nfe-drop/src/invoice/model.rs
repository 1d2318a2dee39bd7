//! Normalized invoice records
//!
//! These types mirror the relational schema: one [`ParsedInvoice`] header
//! plus its items, receivables and payments. String fields are trimmed,
//! identifier fields are digits-only, and monetary fields default to zero
//! when absent from the source document.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;

/// A fully extracted invoice, ready for a single transactional insert.
#[derive(Debug, Clone, Serialize)]
pub struct ParsedInvoice {
    /// 44-digit national access key, unique per issued document.
    pub access_key: String,
    /// Hex-encoded SHA-256 of the raw XML bytes, recomputed on every ingest.
    pub integrity_hash: String,

    pub model: i16,
    pub series: i32,
    pub number: i32,
    pub issue_date: NaiveDate,
    pub operation_type: i16,
    pub environment_type: i16,
    pub operation_nature: String,

    pub authorization_protocol: String,
    pub authorization_date: Option<NaiveDate>,
    pub status_code: i16,

    /// Issuer CNPJ, digits only.
    pub issuer_tax_id: String,
    pub issuer_name: String,
    /// Recipient CNPJ or CPF, digits only; empty when the document has none.
    pub recipient_tax_id: String,
    pub recipient_name: String,

    pub total: Decimal,
    pub products: Decimal,
    pub discount: Decimal,
    pub icms: Decimal,
    pub ipi: Decimal,
    pub pis: Decimal,
    pub cofins: Decimal,
    pub ii: Decimal,
    pub freight: Decimal,
    pub insurance: Decimal,

    pub freight_mode: Option<i16>,

    /// The exact bytes the integrity hash was computed over.
    #[serde(skip)]
    pub raw_xml: Vec<u8>,

    pub items: Vec<ParsedItem>,
    pub receivables: Vec<ParsedReceivable>,
    pub payments: Vec<ParsedPayment>,
}

/// One `det` entry of the invoice.
#[derive(Debug, Clone, Serialize)]
pub struct ParsedItem {
    pub item_number: i32,
    pub code: String,
    pub ean_code: String,
    pub description: String,
    pub ncm: String,
    pub cfop: String,
    pub unit: String,

    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub gross_total: Decimal,

    pub freight: Decimal,
    pub insurance: Decimal,
    pub discount: Decimal,
    pub other: Decimal,
    pub total_indicator: i16,

    pub icms_base: Decimal,
    pub icms_value: Decimal,
    pub icms_st_base: Decimal,
    pub icms_st_value: Decimal,
    pub ipi_value: Decimal,
    pub pis_value: Decimal,
    pub cofins_value: Decimal,
}

/// One `cobr/dup` installment.
#[derive(Debug, Clone, Serialize)]
pub struct ParsedReceivable {
    pub receivable_number: String,
    pub due_date: Option<NaiveDate>,
    pub amount: Decimal,
}

/// One `pag/detPag` entry.
#[derive(Debug, Clone, Serialize)]
pub struct ParsedPayment {
    /// `indPag` when present (0 = cash, 1 = installments, ...).
    pub payment_indicator: Option<i16>,
    /// `tPag` code (01 = money, 03 = credit card, ...).
    pub payment_method: String,
    pub amount: Decimal,

    /// Card acquirer CNPJ, digits only; empty without a `card` element.
    pub acquirer_tax_id: String,
    pub card_brand: String,
    pub authorization_code: String,
}

impl ParsedInvoice {
    /// Compact summary used in structured logs after a successful parse.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "access_key": self.access_key,
            "model": self.model,
            "series": self.series,
            "number": self.number,
            "issue_date": self.issue_date.to_string(),
            "issuer_tax_id": self.issuer_tax_id,
            "issuer_name": self.issuer_name,
            "recipient_tax_id": self.recipient_tax_id,
            "total": self.total.to_string(),
            "items": self.items.len(),
            "receivables": self.receivables.len(),
            "payments": self.payments.len(),
        })
    }
}
