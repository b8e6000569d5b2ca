//! Recurring invoice templates and the batch that materializes them.
//!
//! - `templates`: create, update and terminate templates
//! - `generation`: turn one template into an invoice, or run every due one
//! - `job`: the periodic loop driving `run_due` and the overdue sweep

pub mod generation;
pub mod job;
pub mod templates;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use crate::ledger::InvoiceLedger;
use crate::store::Store;

pub use generation::{RunReport, TemplateFailure};
pub use job::{JobScheduler, PassSummary};

/// Template service and generator.
///
/// Invoices are created through the shared [`InvoiceLedger`], inside the
/// same unit of work that advances the template.
pub struct RecurringScheduler<S: Store> {
    ledger: Arc<InvoiceLedger<S>>,
}

impl<S: Store> RecurringScheduler<S> {
    pub fn new(ledger: Arc<InvoiceLedger<S>>) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &InvoiceLedger<S> {
        &self.ledger
    }
}
