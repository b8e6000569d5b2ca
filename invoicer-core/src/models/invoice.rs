use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Invoice status enumeration.
///
/// `Paid` and `Cancelled` are terminal. `Overdue` is only ever written by
/// the overdue sweep; see [`Invoice::effective_status`] for the computed view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar")]
pub enum InvoiceStatus {
    #[sqlx(rename = "draft")]
    Draft,
    #[sqlx(rename = "sent")]
    Sent,
    #[sqlx(rename = "paid")]
    Paid,
    #[sqlx(rename = "overdue")]
    Overdue,
    #[sqlx(rename = "cancelled")]
    Cancelled,
}

impl InvoiceStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, InvoiceStatus::Paid | InvoiceStatus::Cancelled)
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvoiceStatus::Draft => write!(f, "draft"),
            InvoiceStatus::Sent => write!(f, "sent"),
            InvoiceStatus::Paid => write!(f, "paid"),
            InvoiceStatus::Overdue => write!(f, "overdue"),
            InvoiceStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// How an invoice came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar")]
pub enum InvoiceType {
    #[sqlx(rename = "manual")]
    Manual,
    #[sqlx(rename = "recurring")]
    Recurring,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar")]
pub enum PaymentMethod {
    #[sqlx(rename = "cash")]
    Cash,
    #[sqlx(rename = "bank_transfer")]
    BankTransfer,
    #[sqlx(rename = "credit_card")]
    CreditCard,
    #[sqlx(rename = "other")]
    Other,
}

/// A single billed line. Owned by exactly one invoice and replaced
/// wholesale whenever the draft's items are edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct InvoiceItem {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    /// `quantity * unit_price`, rounded to 2 places.
    pub amount: Decimal,
    /// Position in the order the items were entered.
    pub sort_order: i32,
}

/// Invoice model.
///
/// Maps to the `invoices` table; `items` is loaded from `invoice_items`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    /// Unique identifier for the invoice
    pub id: Uuid,

    /// Owning customer
    pub customer_id: Uuid,

    /// Template this invoice was materialized from, if any
    pub recurring_template_id: Option<Uuid>,

    pub invoice_type: InvoiceType,

    /// Currency code (ISO 4217)
    pub currency: String,

    /// Year-scoped sequence number, assigned once at creation
    pub invoice_number: String,

    pub invoice_date: NaiveDate,
    pub due_date: Option<NaiveDate>,

    pub subtotal: Decimal,

    /// Percentage, 2 fractional digits
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,

    pub status: InvoiceStatus,

    pub notes: Option<String>,
    pub internal_notes: Option<String>,

    pub cancellation_reason: Option<String>,

    pub payment_date: Option<NaiveDate>,
    pub payment_method: Option<PaymentMethod>,
    pub payment_reference: Option<String>,
    pub payment_notes: Option<String>,
    pub payment_proof_path: Option<String>,

    /// Line items ordered by `sort_order`
    pub items: Vec<InvoiceItem>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    /// Status as seen on `today`: a sent invoice past its due date reads as
    /// overdue whether or not the sweep has persisted that yet.
    pub fn effective_status(&self, today: NaiveDate) -> InvoiceStatus {
        match (self.status, self.due_date) {
            (InvoiceStatus::Sent, Some(due)) if due < today => InvoiceStatus::Overdue,
            (status, _) => status,
        }
    }

    pub fn is_draft(&self) -> bool {
        self.status == InvoiceStatus::Draft
    }
}

/// A line as supplied by a caller or stored in a template blueprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemInput {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
}

/// Invoice creation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewInvoice {
    pub customer_id: Uuid,
    /// Falls back to the customer's currency when absent
    pub currency: Option<String>,
    pub invoice_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub tax_rate: Decimal,
    pub notes: Option<String>,
    pub internal_notes: Option<String>,
    pub items: Vec<ItemInput>,
    pub invoice_type: InvoiceType,
    pub recurring_template_id: Option<Uuid>,
}

/// Draft update request. Absent fields keep their current value; a
/// present `items` list replaces the whole item set.
///
/// Nullable fields use `Option<Option<_>>`: `Some(None)` clears them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DraftPatch {
    pub customer_id: Option<Uuid>,
    pub invoice_date: Option<NaiveDate>,
    pub due_date: Option<Option<NaiveDate>>,
    pub tax_rate: Option<Decimal>,
    pub notes: Option<Option<String>>,
    pub internal_notes: Option<Option<String>>,
    pub items: Option<Vec<ItemInput>>,
}

/// Outbound message parameters for send and reminder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub recipient: String,
    pub subject: String,
    pub body: Option<String>,
}

/// Payment details recorded by `mark_paid`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub payment_date: NaiveDate,
    pub method: Option<PaymentMethod>,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub proof_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sent_invoice(due: Option<NaiveDate>) -> Invoice {
        let now = Utc::now();
        Invoice {
            id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            recurring_template_id: None,
            invoice_type: InvoiceType::Manual,
            currency: "IDR".to_string(),
            invoice_number: "INV-2026-0001".to_string(),
            invoice_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            due_date: due,
            subtotal: Decimal::ZERO,
            tax_rate: Decimal::ZERO,
            tax_amount: Decimal::ZERO,
            total: Decimal::ZERO,
            status: InvoiceStatus::Sent,
            notes: None,
            internal_notes: None,
            cancellation_reason: None,
            payment_date: None,
            payment_method: None,
            payment_reference: None,
            payment_notes: None,
            payment_proof_path: None,
            items: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn sent_past_due_reads_as_overdue() {
        let due = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        let invoice = sent_invoice(Some(due));

        assert_eq!(invoice.effective_status(due), InvoiceStatus::Sent);
        assert_eq!(
            invoice.effective_status(due.succ_opt().unwrap()),
            InvoiceStatus::Overdue
        );
    }

    #[test]
    fn no_due_date_never_overdue() {
        let invoice = sent_invoice(None);
        let far = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();
        assert_eq!(invoice.effective_status(far), InvoiceStatus::Sent);
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&InvoiceStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
        assert!(InvoiceStatus::Paid.is_terminal());
        assert!(!InvoiceStatus::Overdue.is_terminal());
    }
}
