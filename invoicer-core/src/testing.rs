//! Shared fixtures for unit tests.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sqlx::types::Json;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use crate::audit::MemoryAuditSink;
use crate::clock::{Clock, FixedClock};
use crate::ledger::InvoiceLedger;
use crate::models::{
    Customer, InvoiceType, ItemInput, NewInvoice, RecurrenceType, RecurringTemplate,
    TemplateStatus,
};
use crate::notify::{EmailJob, QueueNotifier};
use crate::store::MemoryStore;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn item(description: &str, quantity: Decimal, unit_price: Decimal) -> ItemInput {
    ItemInput {
        description: description.to_string(),
        quantity,
        unit_price,
    }
}

/// An active monthly template due on `next`, for inserting directly into
/// a store without validation.
pub fn raw_template(customer_id: Uuid, next: NaiveDate) -> RecurringTemplate {
    let now = Utc::now();
    RecurringTemplate {
        id: Uuid::new_v4(),
        customer_id,
        title: format!("Template due {}", next),
        recurrence_type: RecurrenceType::Monthly,
        recurrence_interval: 1,
        recurrence_unit: None,
        total_count: None,
        generated_count: 0,
        start_date: next,
        next_invoice_date: Some(next),
        status: TemplateStatus::Active,
        line_items: Json(vec![item("Service", dec!(1), dec!(100))]),
        tax_rate: dec!(0),
        currency: "USD".to_string(),
        due_date_offset: None,
        notes: None,
        last_generated_at: None,
        created_at: now,
        updated_at: now,
    }
}

/// A ledger over a fresh memory store with a pinned clock, capturing
/// audit events and queued emails.
pub struct Harness {
    pub store: MemoryStore,
    pub clock: FixedClock,
    pub audit: MemoryAuditSink,
    pub emails: UnboundedReceiver<EmailJob>,
    pub ledger: Arc<InvoiceLedger<MemoryStore>>,
    pub customer_id: Uuid,
}

impl Harness {
    pub async fn on(today: NaiveDate) -> Self {
        let store = MemoryStore::new();
        let clock = FixedClock::on(today);
        let audit = MemoryAuditSink::new();
        let (notifier, emails) = QueueNotifier::channel();

        let customer_id = Uuid::new_v4();
        store
            .add_customer(Customer {
                id: customer_id,
                name: "Acme Corp".to_string(),
                email: Some("billing@acme.test".to_string()),
                currency: Some("USD".to_string()),
                created_at: Utc::now(),
            })
            .await;

        let ledger = Arc::new(InvoiceLedger::new(
            store.clone(),
            Arc::new(clock.clone()),
            Arc::new(audit.clone()),
            Arc::new(notifier),
        ));

        Self {
            store,
            clock,
            audit,
            emails,
            ledger,
            customer_id,
        }
    }

    pub fn new_invoice(&self, items: Vec<ItemInput>, tax_rate: Decimal) -> NewInvoice {
        let today = self.clock.today();
        NewInvoice {
            customer_id: self.customer_id,
            currency: None,
            invoice_date: today,
            due_date: today.checked_add_days(chrono::Days::new(30)),
            tax_rate,
            notes: None,
            internal_notes: None,
            items,
            invoice_type: InvoiceType::Manual,
            recurring_template_id: None,
        }
    }
}
