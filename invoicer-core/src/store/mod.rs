//! Persistence seam for the ledger and scheduler.
//!
//! A [`StoreTx`] is one atomic unit of work. Everything written through it
//! becomes visible only on [`StoreTx::commit`]; dropping it uncommitted
//! discards every staged change, sequence allocations included.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::error::LedgerResult;
use crate::models::{Customer, Invoice, InvoiceItem, RecurringTemplate};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Factory for units of work, plus plain reads of committed state.
#[async_trait]
pub trait Store: Send + Sync {
    type Tx: StoreTx;

    async fn begin(&self) -> LedgerResult<Self::Tx>;

    /// Reads a committed invoice with its items. Takes no row locks and
    /// does not wait for open units of work.
    async fn find_invoice(&self, id: Uuid) -> LedgerResult<Option<Invoice>>;

    /// Reads a committed template without locking it.
    async fn find_template(&self, id: Uuid) -> LedgerResult<Option<RecurringTemplate>>;
}

/// Operations available inside one unit of work.
#[async_trait]
pub trait StoreTx: Send {
    async fn customer(&mut self, id: Uuid) -> LedgerResult<Option<Customer>>;

    /// Increments the year's counter under an exclusive lock and returns
    /// the new value. The first call for a year yields 1.
    async fn next_sequence(&mut self, year: i32) -> LedgerResult<i64>;

    async fn insert_invoice(&mut self, invoice: &Invoice) -> LedgerResult<()>;

    /// Persists the invoice header. Items are written by `replace_items`.
    async fn update_invoice(&mut self, invoice: &Invoice) -> LedgerResult<()>;

    /// Deletes the invoice together with its items.
    async fn delete_invoice(&mut self, id: Uuid) -> LedgerResult<()>;

    /// Loads an invoice with its items, locking it for the rest of the unit.
    async fn invoice(&mut self, id: Uuid) -> LedgerResult<Option<Invoice>>;

    async fn replace_items(&mut self, invoice_id: Uuid, items: &[InvoiceItem]) -> LedgerResult<()>;

    /// Sent invoices whose due date is before `today`.
    async fn overdue_candidates(&mut self, today: NaiveDate) -> LedgerResult<Vec<Invoice>>;

    async fn insert_template(&mut self, template: &RecurringTemplate) -> LedgerResult<()>;

    async fn update_template(&mut self, template: &RecurringTemplate) -> LedgerResult<()>;

    /// Loads a template, locking it for the rest of the unit.
    async fn template(&mut self, id: Uuid) -> LedgerResult<Option<RecurringTemplate>>;

    /// Pending or active, non-manual templates with
    /// `next_invoice_date <= today`, oldest schedule first.
    async fn due_templates(&mut self, today: NaiveDate) -> LedgerResult<Vec<RecurringTemplate>>;

    async fn commit(self) -> LedgerResult<()>;
}
