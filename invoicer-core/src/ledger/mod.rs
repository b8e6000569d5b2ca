//! Invoice ledger: lifecycle rules, totals and the service that applies
//! them through the store.

pub mod service;
pub mod state_machine;
pub mod totals;


pub use service::InvoiceLedger;
pub use state_machine::{InvoiceAction, InvoiceOperation, InvoiceStateMachine};
pub use totals::{build_items, round_money, Totals};
