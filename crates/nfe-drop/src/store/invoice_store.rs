//! Postgres-backed invoice store

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{info, warn};

use nfe_common::{NfeError, Result};

use crate::invoice::{ParsedInvoice, ParsedItem, ParsedPayment, ParsedReceivable};

use super::{InvoiceStore, SaveOutcome};

/// Stores invoices in PostgreSQL using one transaction per invoice.
#[derive(Clone)]
pub struct PgInvoiceStore {
    pool: PgPool,
}

impl PgInvoiceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InvoiceStore for PgInvoiceStore {
    async fn save(&self, invoice: &ParsedInvoice) -> Result<SaveOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| NfeError::database("begin transaction", e.to_string()))?;

        let invoice_id = match insert_invoice(&mut tx, invoice).await {
            Ok(id) => id,
            Err(e) if is_unique_violation(&e) => {
                // Dropping the transaction rolls it back; the file will be
                // routed to ignored/ by the caller.
                warn!(
                    access_key = %invoice.access_key,
                    "invoice already stored, skipping resubmission"
                );
                return Ok(SaveOutcome::Duplicate);
            }
            Err(e) => {
                return Err(NfeError::database(
                    format!("insert invoice (access_key={})", invoice.access_key),
                    e.to_string(),
                ));
            }
        };

        insert_raw_xml(&mut tx, invoice_id, invoice).await?;
        insert_items(&mut tx, invoice_id, &invoice.items).await?;
        insert_receivables(&mut tx, invoice_id, &invoice.receivables).await?;
        insert_payments(&mut tx, invoice_id, &invoice.payments).await?;

        tx.commit()
            .await
            .map_err(|e| NfeError::database("commit transaction", e.to_string()))?;

        info!(
            invoice_id,
            access_key = %invoice.access_key,
            items = invoice.items.len(),
            receivables = invoice.receivables.len(),
            payments = invoice.payments.len(),
            "invoice persisted"
        );

        Ok(SaveOutcome::Saved { invoice_id })
    }
}

async fn insert_invoice(
    tx: &mut Transaction<'_, Postgres>,
    invoice: &ParsedInvoice,
) -> std::result::Result<i64, sqlx::Error> {
    let row = sqlx::query(
        r#"
        INSERT INTO invoice (
            access_key,
            integrity_hash,
            model,
            series,
            number,
            issue_date,
            operation_type,
            environment_type,
            operation_nature,
            authorization_protocol,
            authorization_date,
            status_code,
            issuer_tax_id,
            issuer_name,
            recipient_tax_id,
            recipient_name,
            total,
            products,
            discount,
            icms,
            ipi,
            pis,
            cofins,
            ii,
            freight,
            insurance,
            freight_mode
        ) VALUES (
            $1, $2, $3, $4, $5, $6,
            $7, $8, $9,
            $10, $11, $12,
            $13, $14, $15, $16,
            $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27
        )
        RETURNING id
        "#,
    )
    .bind(&invoice.access_key)
    .bind(&invoice.integrity_hash)
    .bind(invoice.model)
    .bind(invoice.series)
    .bind(invoice.number)
    .bind(invoice.issue_date)
    .bind(invoice.operation_type)
    .bind(invoice.environment_type)
    .bind(&invoice.operation_nature)
    .bind(opt(&invoice.authorization_protocol))
    .bind(invoice.authorization_date)
    .bind(invoice.status_code)
    .bind(&invoice.issuer_tax_id)
    .bind(&invoice.issuer_name)
    .bind(opt(&invoice.recipient_tax_id))
    .bind(opt(&invoice.recipient_name))
    .bind(invoice.total)
    .bind(invoice.products)
    .bind(invoice.discount)
    .bind(invoice.icms)
    .bind(invoice.ipi)
    .bind(invoice.pis)
    .bind(invoice.cofins)
    .bind(invoice.ii)
    .bind(invoice.freight)
    .bind(invoice.insurance)
    .bind(invoice.freight_mode)
    .fetch_one(&mut **tx)
    .await?;

    row.try_get("id")
}

async fn insert_raw_xml(
    tx: &mut Transaction<'_, Postgres>,
    invoice_id: i64,
    invoice: &ParsedInvoice,
) -> Result<()> {
    // The parser only accepts UTF-8 documents, so the raw bytes always fit
    // a text column unchanged.
    let xml_raw = std::str::from_utf8(&invoice.raw_xml).map_err(|e| {
        NfeError::database(
            format!("insert invoice_xml (invoice_id={})", invoice_id),
            format!("raw XML is not valid UTF-8: {}", e),
        )
    })?;

    sqlx::query(
        r#"
        INSERT INTO invoice_xml (invoice_id, xml_raw, xml_json)
        VALUES ($1, $2, $3)
        "#,
    )
    .bind(invoice_id)
    .bind(xml_raw)
    .bind(Option::<serde_json::Value>::None)
    .execute(&mut **tx)
    .await
    .map_err(|e| {
        NfeError::database(
            format!("insert invoice_xml (invoice_id={})", invoice_id),
            e.to_string(),
        )
    })?;

    Ok(())
}

async fn insert_items(
    tx: &mut Transaction<'_, Postgres>,
    invoice_id: i64,
    items: &[ParsedItem],
) -> Result<()> {
    for item in items {
        sqlx::query(
            r#"
            INSERT INTO invoice_item (
                invoice_id,
                item_number,
                code,
                ean_code,
                description,
                ncm,
                cfop,
                unit,
                quantity,
                unit_price,
                gross_total,
                freight,
                insurance,
                discount,
                other,
                total_indicator,
                icms_base,
                icms_value,
                icms_st_base,
                icms_st_value,
                ipi_value,
                pis_value,
                cofins_value
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8,
                $9, $10, $11, $12, $13, $14, $15, $16,
                $17, $18, $19, $20, $21, $22, $23
            )
            "#,
        )
        .bind(invoice_id)
        .bind(item.item_number)
        .bind(opt(&item.code))
        .bind(opt(&item.ean_code))
        .bind(opt(&item.description))
        .bind(opt(&item.ncm))
        .bind(opt(&item.cfop))
        .bind(opt(&item.unit))
        .bind(item.quantity)
        .bind(item.unit_price)
        .bind(item.gross_total)
        .bind(item.freight)
        .bind(item.insurance)
        .bind(item.discount)
        .bind(item.other)
        .bind(item.total_indicator)
        .bind(item.icms_base)
        .bind(item.icms_value)
        .bind(item.icms_st_base)
        .bind(item.icms_st_value)
        .bind(item.ipi_value)
        .bind(item.pis_value)
        .bind(item.cofins_value)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            NfeError::database(
                format!(
                    "insert invoice_item (invoice_id={}, item_number={})",
                    invoice_id, item.item_number
                ),
                e.to_string(),
            )
        })?;
    }

    Ok(())
}

async fn insert_receivables(
    tx: &mut Transaction<'_, Postgres>,
    invoice_id: i64,
    receivables: &[ParsedReceivable],
) -> Result<()> {
    for receivable in receivables {
        sqlx::query(
            r#"
            INSERT INTO invoice_receivable (
                invoice_id,
                receivable_number,
                due_date,
                amount
            ) VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(invoice_id)
        .bind(opt(&receivable.receivable_number))
        .bind(receivable.due_date)
        .bind(receivable.amount)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            NfeError::database(
                format!(
                    "insert invoice_receivable (invoice_id={}, number={})",
                    invoice_id, receivable.receivable_number
                ),
                e.to_string(),
            )
        })?;
    }

    Ok(())
}

async fn insert_payments(
    tx: &mut Transaction<'_, Postgres>,
    invoice_id: i64,
    payments: &[ParsedPayment],
) -> Result<()> {
    for payment in payments {
        sqlx::query(
            r#"
            INSERT INTO invoice_payment (
                invoice_id,
                payment_indicator,
                payment_method,
                amount,
                acquirer_tax_id,
                card_brand,
                authorization_code
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(invoice_id)
        .bind(payment.payment_indicator)
        .bind(opt(&payment.payment_method))
        .bind(payment.amount)
        .bind(opt(&payment.acquirer_tax_id))
        .bind(opt(&payment.card_brand))
        .bind(opt(&payment.authorization_code))
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            NfeError::database(
                format!(
                    "insert invoice_payment (invoice_id={}, method={})",
                    invoice_id, payment.payment_method
                ),
                e.to_string(),
            )
        })?;
    }

    Ok(())
}

// ------------------------------- helpers ------------------------------------

/// Empty strings become NULL so optional columns stay clean.
fn opt(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Unique-violation detection (SQL state 23505) used for duplicate invoices.
fn is_unique_violation(error: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = error {
        return db_err.is_unique_violation();
    }
    false
}
