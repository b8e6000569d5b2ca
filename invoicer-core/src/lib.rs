//! Invoice ledger with recurring generation.
//!
//! [`ledger::InvoiceLedger`] owns the invoice lifecycle,
//! [`scheduler::RecurringScheduler`] materializes recurring templates
//! into invoices, and both persist through a [`store::Store`].

pub mod audit;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod ledger;
pub mod models;
pub mod notify;
pub mod recurrence;
pub mod scheduler;
pub mod sequence;
pub mod store;
pub mod telemetry;
pub mod validation;

#[cfg(test)]
mod testing;

pub use error::{LedgerError, LedgerResult};
