use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{LedgerError, LedgerResult};
use crate::models::InvoiceStatus;

/// Mutating operations on an invoice.
///
/// Every ledger operation goes through [`InvoiceStateMachine::transition`]
/// before touching the store, so the legal moves live in one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceOperation {
    UpdateDraft,
    Delete,
    Send,
    SendReminder,
    MarkPaid,
    Cancel,
    /// Sent → Overdue, applied only by the overdue sweep
    MarkOverdue,
}

impl fmt::Display for InvoiceOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvoiceOperation::UpdateDraft => write!(f, "update"),
            InvoiceOperation::Delete => write!(f, "delete"),
            InvoiceOperation::Send => write!(f, "send"),
            InvoiceOperation::SendReminder => write!(f, "send a reminder for"),
            InvoiceOperation::MarkPaid => write!(f, "mark as paid"),
            InvoiceOperation::Cancel => write!(f, "cancel"),
            InvoiceOperation::MarkOverdue => write!(f, "mark as overdue"),
        }
    }
}

/// User-facing action names offered for an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceAction {
    Edit,
    Send,
    Delete,
    MarkPaid,
    Resend,
    Cancel,
    SendReminder,
}

impl fmt::Display for InvoiceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvoiceAction::Edit => write!(f, "edit"),
            InvoiceAction::Send => write!(f, "send"),
            InvoiceAction::Delete => write!(f, "delete"),
            InvoiceAction::MarkPaid => write!(f, "mark_paid"),
            InvoiceAction::Resend => write!(f, "resend"),
            InvoiceAction::Cancel => write!(f, "cancel"),
            InvoiceAction::SendReminder => write!(f, "send_reminder"),
        }
    }
}

/// Invoice lifecycle.
///
/// - Draft -> Sent (send)
/// - Sent -> Paid | Cancelled, Sent -> Overdue (sweep only)
/// - Overdue -> Paid | Cancelled
/// - Paid, Cancelled: terminal
pub struct InvoiceStateMachine;

impl InvoiceStateMachine {
    pub fn initial_state() -> InvoiceStatus {
        InvoiceStatus::Draft
    }

    /// Status after applying `op` to an invoice in `current`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::StateConflict`] when `op` is not legal from
    /// `current`.
    pub fn transition(current: InvoiceStatus, op: InvoiceOperation) -> LedgerResult<InvoiceStatus> {
        use InvoiceOperation as Op;
        use InvoiceStatus as S;

        match (current, op) {
            (S::Draft, Op::UpdateDraft | Op::Delete) => Ok(S::Draft),
            (S::Draft, Op::Send) => Ok(S::Sent),
            (S::Draft, Op::Cancel) => Err(LedgerError::conflict(
                "draft invoices cannot be cancelled; delete the draft instead",
            )),

            // Re-sending and reminders notify without moving the status.
            (S::Sent | S::Overdue, Op::Send | Op::SendReminder) => Ok(current),
            (S::Sent | S::Overdue, Op::MarkPaid) => Ok(S::Paid),
            (S::Sent | S::Overdue, Op::Cancel) => Ok(S::Cancelled),
            (S::Sent, Op::MarkOverdue) => Ok(S::Overdue),
            (S::Sent | S::Overdue, Op::UpdateDraft) => Err(LedgerError::conflict(format!(
                "only draft invoices can be edited; invoice is {}",
                current
            ))),
            (S::Sent | S::Overdue, Op::Delete) => Err(LedgerError::conflict(
                "only draft invoices can be deleted; use cancel for sent invoices",
            )),

            (S::Paid | S::Cancelled, _) => Err(LedgerError::conflict(format!(
                "invoice is {} and accepts no further changes",
                current
            ))),

            (_, _) => Err(LedgerError::conflict(format!(
                "cannot {} an invoice that is {}",
                op, current
            ))),
        }
    }

    /// Actions to offer for an invoice in `status`.
    pub fn available_actions(status: InvoiceStatus) -> &'static [InvoiceAction] {
        match status {
            InvoiceStatus::Draft => &[InvoiceAction::Edit, InvoiceAction::Send, InvoiceAction::Delete],
            InvoiceStatus::Sent => &[
                InvoiceAction::MarkPaid,
                InvoiceAction::Resend,
                InvoiceAction::Cancel,
            ],
            InvoiceStatus::Overdue => &[
                InvoiceAction::SendReminder,
                InvoiceAction::MarkPaid,
                InvoiceAction::Cancel,
            ],
            InvoiceStatus::Paid | InvoiceStatus::Cancelled => &[],
        }
    }
}
