use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgExecutor, PgPool, Postgres, Transaction};
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::models::{
    Customer, Invoice, InvoiceItem, InvoiceStatus, InvoiceType, PaymentMethod, RecurringTemplate,
};
use crate::store::{Store, StoreTx};

/// SQLSTATE raised when `lock_timeout` expires.
const LOCK_NOT_AVAILABLE: &str = "55P03";
const UNIQUE_VIOLATION: &str = "23505";

const INVOICE_COLUMNS: &str = r#"
    id, customer_id, recurring_template_id, invoice_type, currency,
    invoice_number, invoice_date, due_date, subtotal, tax_rate, tax_amount,
    total, status, notes, internal_notes, cancellation_reason, payment_date,
    payment_method, payment_reference, payment_notes, payment_proof_path,
    created_at, updated_at
"#;

const TEMPLATE_COLUMNS: &str = r#"
    id, customer_id, title, recurrence_type, recurrence_interval,
    recurrence_unit, total_count, generated_count, start_date,
    next_invoice_date, status, line_items, tax_rate, currency,
    due_date_offset, notes, last_generated_at, created_at, updated_at
"#;

/// Postgres-backed store.
///
/// Each unit of work is a database transaction with a bounded
/// `lock_timeout`, so contention on the sequence row surfaces as a
/// retryable error instead of a hang.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    type Tx = PgTx;

    async fn begin(&self) -> LedgerResult<PgTx> {
        let mut tx = self.pool.begin().await?;

        // SET cannot take bind parameters.
        let statement = format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout.as_millis());
        sqlx::query(&statement).execute(&mut *tx).await?;

        Ok(PgTx { tx })
    }

    async fn find_invoice(&self, id: Uuid) -> LedgerResult<Option<Invoice>> {
        let query = format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = $1");
        let row = sqlx::query_as::<_, InvoiceRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let items = fetch_items(&self.pool, id).await?;
                Ok(Some(row.into_invoice(items)))
            }
            None => Ok(None),
        }
    }

    async fn find_template(&self, id: Uuid) -> LedgerResult<Option<RecurringTemplate>> {
        let query = format!("SELECT {TEMPLATE_COLUMNS} FROM recurring_templates WHERE id = $1");
        let template = sqlx::query_as::<_, RecurringTemplate>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(template)
    }
}

/// Unit of work over a [`PgStore`].
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

/// Maps lock timeouts and unique violations on the sequence/invoice number
/// to allocation errors.
fn map_allocation_error(operation: &str, err: sqlx::Error) -> LedgerError {
    if let sqlx::Error::Database(db_err) = &err {
        match db_err.code().as_deref() {
            Some(LOCK_NOT_AVAILABLE) => {
                warn!("{}: lock timeout on invoice sequence", operation);
                return LedgerError::lock_timeout(format!("{operation}: {db_err}"));
            }
            Some(UNIQUE_VIOLATION) => {
                return LedgerError::allocation(format!("{operation}: {db_err}"));
            }
            _ => {}
        }
    }
    LedgerError::Database(err)
}

#[derive(Debug, FromRow)]
struct InvoiceRow {
    id: Uuid,
    customer_id: Uuid,
    recurring_template_id: Option<Uuid>,
    invoice_type: InvoiceType,
    currency: String,
    invoice_number: String,
    invoice_date: NaiveDate,
    due_date: Option<NaiveDate>,
    subtotal: Decimal,
    tax_rate: Decimal,
    tax_amount: Decimal,
    total: Decimal,
    status: InvoiceStatus,
    notes: Option<String>,
    internal_notes: Option<String>,
    cancellation_reason: Option<String>,
    payment_date: Option<NaiveDate>,
    payment_method: Option<PaymentMethod>,
    payment_reference: Option<String>,
    payment_notes: Option<String>,
    payment_proof_path: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl InvoiceRow {
    fn into_invoice(self, items: Vec<InvoiceItem>) -> Invoice {
        Invoice {
            id: self.id,
            customer_id: self.customer_id,
            recurring_template_id: self.recurring_template_id,
            invoice_type: self.invoice_type,
            currency: self.currency,
            invoice_number: self.invoice_number,
            invoice_date: self.invoice_date,
            due_date: self.due_date,
            subtotal: self.subtotal,
            tax_rate: self.tax_rate,
            tax_amount: self.tax_amount,
            total: self.total,
            status: self.status,
            notes: self.notes,
            internal_notes: self.internal_notes,
            cancellation_reason: self.cancellation_reason,
            payment_date: self.payment_date,
            payment_method: self.payment_method,
            payment_reference: self.payment_reference,
            payment_notes: self.payment_notes,
            payment_proof_path: self.payment_proof_path,
            items,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

async fn fetch_items<'e, E>(executor: E, invoice_id: Uuid) -> LedgerResult<Vec<InvoiceItem>>
where
    E: PgExecutor<'e>,
{
    let items = sqlx::query_as::<_, InvoiceItem>(
        r#"
        SELECT id, invoice_id, description, quantity, unit_price, amount, sort_order
        FROM invoice_items
        WHERE invoice_id = $1
        ORDER BY sort_order ASC
        "#,
    )
    .bind(invoice_id)
    .fetch_all(executor)
    .await?;
    Ok(items)
}

#[async_trait]
impl StoreTx for PgTx {
    async fn customer(&mut self, id: Uuid) -> LedgerResult<Option<Customer>> {
        let customer = sqlx::query_as::<_, Customer>(
            r#"
            SELECT id, name, email, currency, created_at
            FROM customers
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(customer)
    }

    async fn next_sequence(&mut self, year: i32) -> LedgerResult<i64> {
        // The upsert takes the row lock, including on the first call of a year.
        let last_number: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO invoice_sequences (year, last_number)
            VALUES ($1, 1)
            ON CONFLICT (year)
            DO UPDATE SET
                last_number = invoice_sequences.last_number + 1,
                updated_at = NOW()
            RETURNING last_number
            "#,
        )
        .bind(year)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_allocation_error("next_sequence", e))?;
        Ok(last_number)
    }

    async fn insert_invoice(&mut self, invoice: &Invoice) -> LedgerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO invoices (
                id, customer_id, recurring_template_id, invoice_type, currency,
                invoice_number, invoice_date, due_date, subtotal, tax_rate,
                tax_amount, total, status, notes, internal_notes,
                created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17
            )
            "#,
        )
        .bind(invoice.id)
        .bind(invoice.customer_id)
        .bind(invoice.recurring_template_id)
        .bind(invoice.invoice_type)
        .bind(&invoice.currency)
        .bind(&invoice.invoice_number)
        .bind(invoice.invoice_date)
        .bind(invoice.due_date)
        .bind(invoice.subtotal)
        .bind(invoice.tax_rate)
        .bind(invoice.tax_amount)
        .bind(invoice.total)
        .bind(invoice.status)
        .bind(&invoice.notes)
        .bind(&invoice.internal_notes)
        .bind(invoice.created_at)
        .bind(invoice.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_allocation_error("insert_invoice", e))?;
        Ok(())
    }

    async fn update_invoice(&mut self, invoice: &Invoice) -> LedgerResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET
                customer_id = $2,
                invoice_date = $3,
                due_date = $4,
                subtotal = $5,
                tax_rate = $6,
                tax_amount = $7,
                total = $8,
                status = $9,
                notes = $10,
                internal_notes = $11,
                cancellation_reason = $12,
                payment_date = $13,
                payment_method = $14,
                payment_reference = $15,
                payment_notes = $16,
                payment_proof_path = $17,
                updated_at = $18
            WHERE id = $1
            "#,
        )
        .bind(invoice.id)
        .bind(invoice.customer_id)
        .bind(invoice.invoice_date)
        .bind(invoice.due_date)
        .bind(invoice.subtotal)
        .bind(invoice.tax_rate)
        .bind(invoice.tax_amount)
        .bind(invoice.total)
        .bind(invoice.status)
        .bind(&invoice.notes)
        .bind(&invoice.internal_notes)
        .bind(&invoice.cancellation_reason)
        .bind(invoice.payment_date)
        .bind(invoice.payment_method)
        .bind(&invoice.payment_reference)
        .bind(&invoice.payment_notes)
        .bind(&invoice.payment_proof_path)
        .bind(invoice.updated_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::not_found("invoice", invoice.id));
        }
        Ok(())
    }

    async fn delete_invoice(&mut self, id: Uuid) -> LedgerResult<()> {
        sqlx::query("DELETE FROM invoice_items WHERE invoice_id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;

        let result = sqlx::query("DELETE FROM invoices WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::not_found("invoice", id));
        }
        Ok(())
    }

    async fn invoice(&mut self, id: Uuid) -> LedgerResult<Option<Invoice>> {
        let query = format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = $1 FOR UPDATE");
        let row = sqlx::query_as::<_, InvoiceRow>(&query)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;

        match row {
            Some(row) => {
                let items = fetch_items(&mut *self.tx, id).await?;
                Ok(Some(row.into_invoice(items)))
            }
            None => Ok(None),
        }
    }

    async fn replace_items(&mut self, invoice_id: Uuid, items: &[InvoiceItem]) -> LedgerResult<()> {
        sqlx::query("DELETE FROM invoice_items WHERE invoice_id = $1")
            .bind(invoice_id)
            .execute(&mut *self.tx)
            .await?;

        for item in items {
            sqlx::query(
                r#"
                INSERT INTO invoice_items (
                    id, invoice_id, description, quantity, unit_price, amount, sort_order
                ) VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(item.id)
            .bind(invoice_id)
            .bind(&item.description)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.amount)
            .bind(item.sort_order)
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }

    async fn overdue_candidates(&mut self, today: NaiveDate) -> LedgerResult<Vec<Invoice>> {
        let query = format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices \
             WHERE status = 'sent' AND due_date < $1 \
             ORDER BY due_date ASC \
             FOR UPDATE SKIP LOCKED"
        );
        let rows = sqlx::query_as::<_, InvoiceRow>(&query)
            .bind(today)
            .fetch_all(&mut *self.tx)
            .await?;

        let mut invoices = Vec::with_capacity(rows.len());
        for row in rows {
            let items = fetch_items(&mut *self.tx, row.id).await?;
            invoices.push(row.into_invoice(items));
        }
        Ok(invoices)
    }

    async fn insert_template(&mut self, template: &RecurringTemplate) -> LedgerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO recurring_templates (
                id, customer_id, title, recurrence_type, recurrence_interval,
                recurrence_unit, total_count, generated_count, start_date,
                next_invoice_date, status, line_items, tax_rate, currency,
                due_date_offset, notes, last_generated_at, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19
            )
            "#,
        )
        .bind(template.id)
        .bind(template.customer_id)
        .bind(&template.title)
        .bind(template.recurrence_type)
        .bind(template.recurrence_interval)
        .bind(template.recurrence_unit)
        .bind(template.total_count)
        .bind(template.generated_count)
        .bind(template.start_date)
        .bind(template.next_invoice_date)
        .bind(template.status)
        .bind(&template.line_items)
        .bind(template.tax_rate)
        .bind(&template.currency)
        .bind(template.due_date_offset)
        .bind(&template.notes)
        .bind(template.last_generated_at)
        .bind(template.created_at)
        .bind(template.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_template(&mut self, template: &RecurringTemplate) -> LedgerResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE recurring_templates
            SET
                title = $2,
                recurrence_type = $3,
                recurrence_interval = $4,
                recurrence_unit = $5,
                total_count = $6,
                generated_count = $7,
                start_date = $8,
                next_invoice_date = $9,
                status = $10,
                line_items = $11,
                tax_rate = $12,
                currency = $13,
                due_date_offset = $14,
                notes = $15,
                last_generated_at = $16,
                updated_at = $17
            WHERE id = $1
            "#,
        )
        .bind(template.id)
        .bind(&template.title)
        .bind(template.recurrence_type)
        .bind(template.recurrence_interval)
        .bind(template.recurrence_unit)
        .bind(template.total_count)
        .bind(template.generated_count)
        .bind(template.start_date)
        .bind(template.next_invoice_date)
        .bind(template.status)
        .bind(&template.line_items)
        .bind(template.tax_rate)
        .bind(&template.currency)
        .bind(template.due_date_offset)
        .bind(&template.notes)
        .bind(template.last_generated_at)
        .bind(template.updated_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::not_found("recurring template", template.id));
        }
        Ok(())
    }

    async fn template(&mut self, id: Uuid) -> LedgerResult<Option<RecurringTemplate>> {
        let query =
            format!("SELECT {TEMPLATE_COLUMNS} FROM recurring_templates WHERE id = $1 FOR UPDATE");
        let template = sqlx::query_as::<_, RecurringTemplate>(&query)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(template)
    }

    async fn due_templates(&mut self, today: NaiveDate) -> LedgerResult<Vec<RecurringTemplate>> {
        let query = format!(
            "SELECT {TEMPLATE_COLUMNS} FROM recurring_templates \
             WHERE status IN ('active', 'pending') \
               AND recurrence_type <> 'manual' \
               AND next_invoice_date <= $1 \
             ORDER BY next_invoice_date ASC, created_at ASC"
        );
        let templates = sqlx::query_as::<_, RecurringTemplate>(&query)
            .bind(today)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(templates)
    }

    async fn commit(self) -> LedgerResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
