//! Invoice parser
//!
//! Reads a file, computes its integrity hash, optionally validates it
//! against the official XSD, then decodes it as either document root and
//! extracts the normalized record. Parsing is a pure function of the input
//! bytes plus the schema configuration.

use std::path::Path;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use nfe_common::checksum::sha256_hex;
use nfe_common::{NfeError, Result};

use super::model::{ParsedInvoice, ParsedItem, ParsedPayment, ParsedReceivable};
use super::xml::{
    Cofins, Det, IcmsGroup, InfNfe, Ipi, NfeDocument, Pis, ProcDocument, ProtocolInfo,
};
use super::xsd::XsdSettings;

/// Parser for NF-e invoice files.
#[derive(Debug, Default, Clone)]
pub struct InvoiceParser {
    xsd: Option<XsdSettings>,
}

impl InvoiceParser {
    /// Parser without schema validation.
    pub fn new() -> Self {
        Self { xsd: None }
    }

    /// Parser that validates every document against the configured schema
    /// before extraction.
    pub fn with_xsd(settings: Option<XsdSettings>) -> Self {
        Self { xsd: settings }
    }

    /// Parse a single invoice file from disk.
    pub fn parse_file(&self, path: &Path) -> Result<ParsedInvoice> {
        let data = std::fs::read(path)?;
        self.parse_bytes(&data)
    }

    /// Parse raw invoice XML bytes.
    ///
    /// Attempts the `nfeProc` envelope first and falls back to a bare `NFe`
    /// root; a candidate decode is accepted only when it carries a non-zero
    /// document model.
    pub fn parse_bytes(&self, data: &[u8]) -> Result<ParsedInvoice> {
        let integrity_hash = sha256_hex(data);

        if let Some(ref settings) = self.xsd {
            let schema_path = settings.resolve()?;
            super::xsd::validate(data, &schema_path)?;
        }

        let text = std::str::from_utf8(data)
            .map_err(|e| NfeError::parse("invoice XML", format!("not valid UTF-8: {}", e)))?;

        if let Ok(doc) = quick_xml::de::from_str::<ProcDocument>(text) {
            if parse_i16(&doc.nfe.inf.ide.model) != 0 {
                let protocol = doc.protocol.map(|p| p.inf);
                return build_invoice(doc.nfe.inf, protocol, data, integrity_hash);
            }
        }

        if let Ok(doc) = quick_xml::de::from_str::<NfeDocument>(text) {
            if parse_i16(&doc.inf.ide.model) != 0 {
                return build_invoice(doc.inf, None, data, integrity_hash);
            }
        }

        Err(NfeError::parse(
            "invoice XML",
            "document not recognized as nfeProc or NFe",
        ))
    }
}

fn build_invoice(
    inf: InfNfe,
    protocol: Option<ProtocolInfo>,
    raw: &[u8],
    integrity_hash: String,
) -> Result<ParsedInvoice> {
    // The access key lives in the protocol envelope when the document was
    // authorized; otherwise it is recovered from the infNFe identifier,
    // whose non-digit prefix (typically "NFe") is dropped.
    let mut access_key = protocol
        .as_ref()
        .map(|p| only_digits(&p.access_key))
        .unwrap_or_default();
    if access_key.is_empty() {
        access_key = only_digits(&inf.id);
    }

    let raw_issue = if inf.ide.issued_at.trim().is_empty() {
        inf.ide.issued_on.as_str()
    } else {
        inf.ide.issued_at.as_str()
    };
    let issue_date = normalize_date(raw_issue).ok_or_else(|| {
        NfeError::parse(
            "invoice XML",
            format!("missing or invalid issue date for access key {}", access_key),
        )
    })?;

    let totals = &inf.total.icms_totals;

    let mut invoice = ParsedInvoice {
        access_key,
        integrity_hash,

        model: parse_i16(&inf.ide.model),
        series: parse_i32(&inf.ide.serie),
        number: parse_i32(&inf.ide.number),
        issue_date,
        operation_type: parse_i16(&inf.ide.operation_type),
        environment_type: parse_i16(&inf.ide.environment_type),
        operation_nature: inf.ide.operation_nature.trim().to_string(),

        authorization_protocol: String::new(),
        authorization_date: None,
        status_code: 0,

        issuer_tax_id: only_digits(&inf.emit.cnpj),
        issuer_name: inf.emit.name.trim().to_string(),
        recipient_tax_id: String::new(),
        recipient_name: String::new(),

        total: parse_decimal(&totals.total),
        products: parse_decimal(&totals.products),
        discount: parse_decimal(&totals.discount),
        icms: parse_decimal(&totals.icms),
        ipi: parse_decimal(&totals.ipi),
        pis: parse_decimal(&totals.pis),
        cofins: parse_decimal(&totals.cofins),
        ii: parse_decimal(&totals.ii),
        freight: parse_decimal(&totals.freight),
        insurance: parse_decimal(&totals.insurance),

        freight_mode: inf
            .transp
            .as_ref()
            .map(|t| parse_i16(&t.freight_mode)),

        raw_xml: raw.to_vec(),

        items: Vec::new(),
        receivables: Vec::new(),
        payments: Vec::new(),
    };

    if let Some(recipient) = inf.dest {
        let doc = if recipient.cnpj.trim().is_empty() {
            recipient.cpf
        } else {
            recipient.cnpj
        };
        invoice.recipient_tax_id = only_digits(&doc);
        invoice.recipient_name = recipient.name.trim().to_string();
    }

    if let Some(prot) = protocol {
        invoice.authorization_protocol = prot.protocol_number.trim().to_string();
        invoice.authorization_date = normalize_date(&prot.received_at);
        invoice.status_code = parse_i16(&prot.status_code);
    }

    invoice.items = inf.det.iter().map(build_item).collect();

    if let Some(billing) = inf.cobr {
        invoice.receivables = billing
            .receivables
            .iter()
            .map(|dup| ParsedReceivable {
                receivable_number: dup.number.trim().to_string(),
                due_date: normalize_date(&dup.due_date),
                amount: parse_decimal(&dup.amount),
            })
            .collect();
    }

    if let Some(payments) = inf.pag {
        invoice.payments = payments
            .entries
            .iter()
            .map(|entry| {
                let (acquirer_tax_id, card_brand, authorization_code) = match entry.card {
                    Some(ref card) => (
                        only_digits(&card.acquirer_cnpj),
                        card.brand.trim().to_string(),
                        card.authorization_code.trim().to_string(),
                    ),
                    None => (String::new(), String::new(), String::new()),
                };

                ParsedPayment {
                    payment_indicator: if entry.indicator.trim().is_empty() {
                        None
                    } else {
                        Some(parse_i16(&entry.indicator))
                    },
                    payment_method: entry.method.trim().to_string(),
                    amount: parse_decimal(&entry.amount),
                    acquirer_tax_id,
                    card_brand,
                    authorization_code,
                }
            })
            .collect();
    }

    Ok(invoice)
}

fn build_item(det: &Det) -> ParsedItem {
    let prod = &det.prod;

    let (icms_base, icms_value, icms_st_base, icms_st_value) = extract_icms(&det.imposto.icms);

    ParsedItem {
        item_number: parse_i32(&det.item_number),
        code: prod.code.trim().to_string(),
        ean_code: prod.ean_code.trim().to_string(),
        description: prod.description.trim().to_string(),
        ncm: prod.ncm.trim().to_string(),
        cfop: prod.cfop.trim().to_string(),
        unit: prod.unit.trim().to_string(),

        quantity: parse_decimal(&prod.quantity),
        unit_price: parse_decimal(&prod.unit_price),
        gross_total: parse_decimal(&prod.gross_total),

        freight: parse_decimal(&prod.freight),
        insurance: parse_decimal(&prod.insurance),
        discount: parse_decimal(&prod.discount),
        other: parse_decimal(&prod.other),
        total_indicator: parse_i16(&prod.total_indicator),

        icms_base,
        icms_value,
        icms_st_base,
        icms_st_value,
        ipi_value: extract_ipi(det.imposto.ipi.as_ref()),
        pis_value: extract_pis(det.imposto.pis.as_ref()),
        cofins_value: extract_cofins(det.imposto.cofins.as_ref()),
    }
}

/// Pick the first ICMS variant present and read the dimensions it defines.
/// Variants without a base or value (ICMS40, ICMSSN101/102) leave all four
/// dimensions at zero.
fn extract_icms(group: &IcmsGroup) -> (Decimal, Decimal, Decimal, Decimal) {
    let zero = Decimal::ZERO;

    if let Some(v) = &group.icms00 {
        return (parse_decimal(&v.base), parse_decimal(&v.value), zero, zero);
    }
    if let Some(v) = &group.icms20 {
        return (parse_decimal(&v.base), parse_decimal(&v.value), zero, zero);
    }
    if let Some(v) = &group.icms51 {
        return (parse_decimal(&v.base), parse_decimal(&v.value), zero, zero);
    }

    if let Some(v) = &group.icms10 {
        return (
            parse_decimal(&v.base),
            parse_decimal(&v.value),
            parse_decimal(&v.st_base),
            parse_decimal(&v.st_value),
        );
    }
    if let Some(v) = &group.icms30 {
        return (zero, zero, parse_decimal(&v.st_base), parse_decimal(&v.st_value));
    }
    if let Some(v) = &group.icms70 {
        return (
            parse_decimal(&v.base),
            parse_decimal(&v.value),
            parse_decimal(&v.st_base),
            parse_decimal(&v.st_value),
        );
    }
    if let Some(v) = &group.icms90 {
        return (
            parse_decimal(&v.base),
            parse_decimal(&v.value),
            parse_decimal(&v.st_base),
            parse_decimal(&v.st_value),
        );
    }
    if let Some(v) = &group.icms_part {
        return (
            parse_decimal(&v.base),
            parse_decimal(&v.value),
            parse_decimal(&v.st_base),
            parse_decimal(&v.st_value),
        );
    }
    if let Some(v) = &group.icms_sn201 {
        return (zero, zero, parse_decimal(&v.st_base), parse_decimal(&v.st_value));
    }
    if let Some(v) = &group.icms_sn202 {
        return (zero, zero, parse_decimal(&v.st_base), parse_decimal(&v.st_value));
    }
    if let Some(v) = &group.icms_sn500 {
        return (zero, zero, parse_decimal(&v.st_base), parse_decimal(&v.st_value));
    }
    if let Some(v) = &group.icms_sn900 {
        return (
            parse_decimal(&v.base),
            parse_decimal(&v.value),
            parse_decimal(&v.st_base),
            parse_decimal(&v.st_value),
        );
    }

    (zero, zero, zero, zero)
}

fn extract_ipi(ipi: Option<&Ipi>) -> Decimal {
    match ipi.and_then(|i| i.taxed.as_ref()) {
        Some(taxed) => parse_decimal(&taxed.value),
        None => Decimal::ZERO,
    }
}

/// The PIS value comes from whichever taxation sub-element is present,
/// taking the first one whose value field is non-empty.
fn extract_pis(pis: Option<&Pis>) -> Decimal {
    let Some(pis) = pis else {
        return Decimal::ZERO;
    };

    for candidate in [&pis.rate, &pis.quantity, &pis.untaxed, &pis.other] {
        if let Some(v) = candidate {
            if !v.value.trim().is_empty() {
                return parse_decimal(&v.value);
            }
        }
    }

    Decimal::ZERO
}

fn extract_cofins(cofins: Option<&Cofins>) -> Decimal {
    let Some(cofins) = cofins else {
        return Decimal::ZERO;
    };

    for candidate in [
        &cofins.rate,
        &cofins.quantity,
        &cofins.untaxed,
        &cofins.other,
    ] {
        if let Some(v) = candidate {
            if !v.value.trim().is_empty() {
                return parse_decimal(&v.value);
            }
        }
    }

    Decimal::ZERO
}

// ------------------------------- helpers ------------------------------------

/// Keep only ASCII digits; used for access keys, CNPJ/CPF and card acquirers.
pub(crate) fn only_digits(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Monetary strings accept either `,` or `.` as decimal separator;
/// anything unparsable becomes zero.
pub(crate) fn parse_decimal(v: &str) -> Decimal {
    let v = v.trim();
    if v.is_empty() {
        return Decimal::ZERO;
    }
    let v = v.replace(',', ".");
    Decimal::from_str(&v).unwrap_or(Decimal::ZERO)
}

pub(crate) fn parse_i32(v: &str) -> i32 {
    v.trim().parse().unwrap_or(0)
}

pub(crate) fn parse_i16(v: &str) -> i16 {
    v.trim().parse().unwrap_or(0)
}

/// Normalize `2025-11-11T12:34:56-03:00` or `2025-11-11` to a calendar date.
///
/// Datetimes are truncated to the date in their own offset; no timezone
/// conversion happens.
pub(crate) fn normalize_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(prefix) = s.get(..10) {
        if let Ok(date) = NaiveDate::parse_from_str(prefix, "%Y-%m-%d") {
            return Some(date);
        }
    }

    None
}
