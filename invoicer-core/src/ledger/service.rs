use chrono::Datelike;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::audit::{AuditEntity, AuditEvent, AuditSink};
use crate::clock::Clock;
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::state_machine::{InvoiceAction, InvoiceOperation, InvoiceStateMachine};
use crate::ledger::totals::{build_items, Totals};
use crate::models::{Delivery, DraftPatch, Invoice, NewInvoice, Payment};
use crate::notify::{EmailJob, EmailKind, Notifier};
use crate::sequence;
use crate::store::{Store, StoreTx};
use crate::validation;

const MAX_SUBJECT_LEN: usize = 255;

/// Invoice lifecycle service.
///
/// Every mutating operation runs in one unit of work: load and lock the
/// invoice, check the transition, write, commit. Audit events and email
/// jobs are emitted only after the commit succeeds.
pub struct InvoiceLedger<S: Store> {
    store: S,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
    notifier: Arc<dyn Notifier>,
}

impl<S: Store> InvoiceLedger<S> {
    /// Creates a new ledger.
    ///
    /// # Arguments
    ///
    /// * `store` - Backing store for invoices, templates and sequences
    /// * `clock` - Source of "today" and timestamps
    /// * `audit` - Receiver of audit events
    /// * `notifier` - Outbound email queue
    pub fn new(
        store: S,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditSink>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            clock,
            audit,
            notifier,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Loads an invoice with its items from committed state, without
    /// taking row locks.
    pub async fn get(&self, id: Uuid) -> LedgerResult<Invoice> {
        self.store
            .find_invoice(id)
            .await?
            .ok_or_else(|| LedgerError::not_found("invoice", id))
    }

    /// Creates a draft invoice.
    ///
    /// Allocates the next number for the current year, materializes the
    /// items and computes totals. Nothing is persisted if any step fails,
    /// and the allocated number is released with the rollback.
    ///
    /// # Arguments
    ///
    /// * `request` - Customer, dates, tax rate and line items
    ///
    /// # Returns
    ///
    /// Returns the stored draft, or a validation / not-found / allocation
    /// error.
    pub async fn create(&self, request: NewInvoice) -> LedgerResult<Invoice> {
        let mut tx = self.store.begin().await?;
        let invoice = self.create_in(&mut tx, request).await?;
        tx.commit().await?;

        info!(
            "Created invoice {} for customer {} ({} {})",
            invoice.invoice_number, invoice.customer_id, invoice.currency, invoice.total
        );
        self.record_created(&invoice);
        Ok(invoice)
    }

    /// Creation steps inside a caller-owned unit of work. The caller
    /// commits and then calls [`Self::record_created`].
    pub(crate) async fn create_in(
        &self,
        tx: &mut S::Tx,
        request: NewInvoice,
    ) -> LedgerResult<Invoice> {
        validation::items(&request.items)?;
        validation::tax_rate(request.tax_rate)?;
        validation::due_date(request.invoice_date, request.due_date)?;
        validation::optional_text("notes", request.notes.as_deref(), validation::MAX_NOTES_LEN)?;
        validation::optional_text(
            "internal notes",
            request.internal_notes.as_deref(),
            validation::MAX_NOTES_LEN,
        )?;
        if let Some(code) = &request.currency {
            validation::currency(code)?;
        }

        let customer = tx
            .customer(request.customer_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("customer", request.customer_id))?;
        let currency = request
            .currency
            .clone()
            .unwrap_or_else(|| customer.billing_currency().to_string())
            .to_ascii_uppercase();

        let id = Uuid::new_v4();
        let items = build_items(id, &request.items)?;
        let totals = Totals::compute(&items, request.tax_rate)?;

        let now = self.clock.now();
        let invoice_number = sequence::allocate(tx, self.clock.today().year()).await?;

        let invoice = Invoice {
            id,
            customer_id: customer.id,
            recurring_template_id: request.recurring_template_id,
            invoice_type: request.invoice_type,
            currency,
            invoice_number,
            invoice_date: request.invoice_date,
            due_date: request.due_date,
            subtotal: totals.subtotal,
            tax_rate: request.tax_rate,
            tax_amount: totals.tax_amount,
            total: totals.total,
            status: InvoiceStateMachine::initial_state(),
            notes: request.notes,
            internal_notes: request.internal_notes,
            cancellation_reason: None,
            payment_date: None,
            payment_method: None,
            payment_reference: None,
            payment_notes: None,
            payment_proof_path: None,
            items,
            created_at: now,
            updated_at: now,
        };

        tx.insert_invoice(&invoice).await?;
        tx.replace_items(invoice.id, &invoice.items).await?;
        Ok(invoice)
    }

    /// Applies `patch` to a draft. A present item list replaces the whole
    /// item set; totals are recomputed either way.
    pub async fn update_draft(&self, id: Uuid, patch: DraftPatch) -> LedgerResult<Invoice> {
        if let Some(items) = &patch.items {
            validation::items(items)?;
        }
        if let Some(rate) = patch.tax_rate {
            validation::tax_rate(rate)?;
        }
        validation::optional_text(
            "notes",
            patch.notes.as_ref().and_then(|n| n.as_deref()),
            validation::MAX_NOTES_LEN,
        )?;
        validation::optional_text(
            "internal notes",
            patch.internal_notes.as_ref().and_then(|n| n.as_deref()),
            validation::MAX_NOTES_LEN,
        )?;

        let mut tx = self.store.begin().await?;
        let mut invoice = load(&mut tx, id).await?;
        InvoiceStateMachine::transition(invoice.status, InvoiceOperation::UpdateDraft)?;

        let mut changed = Vec::new();
        if let Some(customer_id) = patch.customer_id {
            if tx.customer(customer_id).await?.is_none() {
                return Err(LedgerError::not_found("customer", customer_id));
            }
            invoice.customer_id = customer_id;
            changed.push("customer_id");
        }
        if let Some(date) = patch.invoice_date {
            invoice.invoice_date = date;
            changed.push("invoice_date");
        }
        if let Some(date) = patch.due_date {
            invoice.due_date = date;
            changed.push("due_date");
        }
        validation::due_date(invoice.invoice_date, invoice.due_date)?;

        if let Some(rate) = patch.tax_rate {
            invoice.tax_rate = rate;
            changed.push("tax_rate");
        }
        if let Some(notes) = patch.notes {
            invoice.notes = notes;
            changed.push("notes");
        }
        if let Some(notes) = patch.internal_notes {
            invoice.internal_notes = notes;
            changed.push("internal_notes");
        }
        if let Some(items) = &patch.items {
            invoice.items = build_items(invoice.id, items)?;
            tx.replace_items(invoice.id, &invoice.items).await?;
            changed.push("items");
        }

        let totals = Totals::compute(&invoice.items, invoice.tax_rate)?;
        invoice.subtotal = totals.subtotal;
        invoice.tax_amount = totals.tax_amount;
        invoice.total = totals.total;
        invoice.updated_at = self.clock.now();

        tx.update_invoice(&invoice).await?;
        tx.commit().await?;

        self.record(
            AuditEntity::Invoice(invoice.id),
            "updated",
            json!({ "fields": changed, "total": invoice.total }),
        );
        Ok(invoice)
    }

    /// Deletes a draft and its items. Sent invoices must be cancelled.
    pub async fn delete(&self, id: Uuid) -> LedgerResult<()> {
        let mut tx = self.store.begin().await?;
        let invoice = load(&mut tx, id).await?;
        InvoiceStateMachine::transition(invoice.status, InvoiceOperation::Delete)?;

        tx.delete_invoice(invoice.id).await?;
        tx.commit().await?;

        info!("Deleted draft invoice {}", invoice.invoice_number);
        self.record(
            AuditEntity::Invoice(invoice.id),
            "deleted",
            json!({ "invoice_number": invoice.invoice_number }),
        );
        Ok(())
    }

    /// Sends an invoice to the customer.
    ///
    /// A draft moves to `sent`. Sending an already sent or overdue invoice
    /// re-delivers it without changing its status. Each call queues one
    /// email and records one `invoice_sent` event.
    ///
    /// # Arguments
    ///
    /// * `id` - The invoice to send
    /// * `delivery` - Recipient, subject and optional body
    pub async fn send(&self, id: Uuid, delivery: Delivery) -> LedgerResult<Invoice> {
        validate_delivery(&delivery)?;

        let mut tx = self.store.begin().await?;
        let mut invoice = load(&mut tx, id).await?;
        let previous = invoice.status;
        let next = InvoiceStateMachine::transition(previous, InvoiceOperation::Send)?;

        if next != previous {
            invoice.status = next;
            invoice.updated_at = self.clock.now();
            tx.update_invoice(&invoice).await?;
        }
        tx.commit().await?;

        info!(
            "Invoice {} sent to {} ({} -> {})",
            invoice.invoice_number, delivery.recipient, previous, next
        );
        self.record(
            AuditEntity::Invoice(invoice.id),
            "invoice_sent",
            json!({
                "recipient": delivery.recipient,
                "subject": delivery.subject,
                "resend": previous != next,
            }),
        );
        self.enqueue(EmailJob::new(
            &invoice,
            EmailKind::Invoice,
            delivery.recipient,
            delivery.subject,
            delivery.body,
        ))
        .await;
        Ok(invoice)
    }

    /// Queues a payment reminder for a sent or overdue invoice.
    pub async fn send_reminder(&self, id: Uuid, delivery: Delivery) -> LedgerResult<Invoice> {
        validate_delivery(&delivery)?;

        let mut tx = self.store.begin().await?;
        let invoice = load(&mut tx, id).await?;
        InvoiceStateMachine::transition(invoice.status, InvoiceOperation::SendReminder)?;
        tx.commit().await?;

        self.record(
            AuditEntity::Invoice(invoice.id),
            "reminder_sent",
            json!({
                "recipient": delivery.recipient,
                "subject": delivery.subject,
            }),
        );
        self.enqueue(EmailJob::new(
            &invoice,
            EmailKind::Reminder,
            delivery.recipient,
            delivery.subject,
            delivery.body,
        ))
        .await;
        Ok(invoice)
    }

    /// Records payment and moves the invoice to `paid`.
    pub async fn mark_paid(&self, id: Uuid, payment: Payment) -> LedgerResult<Invoice> {
        validation::optional_text(
            "payment reference",
            payment.reference.as_deref(),
            validation::MAX_REFERENCE_LEN,
        )?;
        validation::optional_text(
            "payment notes",
            payment.notes.as_deref(),
            validation::MAX_NOTES_LEN,
        )?;

        let mut tx = self.store.begin().await?;
        let mut invoice = load(&mut tx, id).await?;
        invoice.status = InvoiceStateMachine::transition(invoice.status, InvoiceOperation::MarkPaid)?;
        invoice.payment_date = Some(payment.payment_date);
        invoice.payment_method = payment.method;
        invoice.payment_reference = payment.reference;
        invoice.payment_notes = payment.notes;
        invoice.payment_proof_path = payment.proof_path;
        invoice.updated_at = self.clock.now();

        tx.update_invoice(&invoice).await?;
        tx.commit().await?;

        info!("Invoice {} marked as paid", invoice.invoice_number);
        self.record(
            AuditEntity::Invoice(invoice.id),
            "marked_as_paid",
            json!({
                "payment_date": invoice.payment_date,
                "payment_method": invoice.payment_method,
                "payment_reference": invoice.payment_reference,
            }),
        );
        Ok(invoice)
    }

    /// Cancels a sent or overdue invoice, keeping the reason.
    pub async fn cancel(&self, id: Uuid, reason: &str) -> LedgerResult<Invoice> {
        validation::required_text("cancellation reason", reason, validation::MAX_REASON_LEN)?;

        let mut tx = self.store.begin().await?;
        let mut invoice = load(&mut tx, id).await?;
        invoice.status = InvoiceStateMachine::transition(invoice.status, InvoiceOperation::Cancel)?;
        invoice.cancellation_reason = Some(reason.trim().to_string());
        invoice.updated_at = self.clock.now();

        tx.update_invoice(&invoice).await?;
        tx.commit().await?;

        info!("Invoice {} cancelled", invoice.invoice_number);
        self.record(
            AuditEntity::Invoice(invoice.id),
            "cancelled",
            json!({ "reason": invoice.cancellation_reason }),
        );
        Ok(invoice)
    }

    /// Actions to offer for `invoice`, judged by its status as of today.
    pub fn available_actions(&self, invoice: &Invoice) -> Vec<InvoiceAction> {
        let status = invoice.effective_status(self.clock.today());
        InvoiceStateMachine::available_actions(status).to_vec()
    }

    /// Persists `overdue` for every sent invoice whose due date is before
    /// `today`.
    ///
    /// # Returns
    ///
    /// Returns the number of invoices promoted.
    pub async fn promote_overdue(&self, today: chrono::NaiveDate) -> LedgerResult<usize> {
        let mut tx = self.store.begin().await?;
        let candidates = tx.overdue_candidates(today).await?;

        let now = self.clock.now();
        let mut promoted = Vec::with_capacity(candidates.len());
        for mut invoice in candidates {
            match InvoiceStateMachine::transition(invoice.status, InvoiceOperation::MarkOverdue) {
                Ok(next) => {
                    invoice.status = next;
                    invoice.updated_at = now;
                    tx.update_invoice(&invoice).await?;
                    promoted.push(invoice);
                }
                Err(e) => warn!("Skipping invoice {}: {}", invoice.invoice_number, e),
            }
        }
        tx.commit().await?;

        for invoice in &promoted {
            self.record(
                AuditEntity::Invoice(invoice.id),
                "marked_overdue",
                json!({ "due_date": invoice.due_date }),
            );
        }
        if !promoted.is_empty() {
            info!("Marked {} invoice(s) overdue as of {}", promoted.len(), today);
        }
        Ok(promoted.len())
    }

    pub(crate) fn record_created(&self, invoice: &Invoice) {
        self.record(
            AuditEntity::Invoice(invoice.id),
            "created",
            json!({
                "invoice_number": invoice.invoice_number,
                "invoice_type": invoice.invoice_type,
                "recurring_template_id": invoice.recurring_template_id,
                "currency": invoice.currency,
                "total": invoice.total,
            }),
        );
    }

    pub(crate) fn record(&self, entity: AuditEntity, action: &str, properties: Value) {
        self.audit
            .record_event(AuditEvent::new(entity, action, properties, self.clock.now()));
    }

    /// Email failures never undo a committed operation.
    async fn enqueue(&self, job: EmailJob) {
        let invoice_number = job.invoice_number.clone();
        if let Err(e) = self.notifier.enqueue_email(job).await {
            error!("Failed to queue email for invoice {}: {}", invoice_number, e);
        }
    }
}

async fn load<T: StoreTx>(tx: &mut T, id: Uuid) -> LedgerResult<Invoice> {
    tx.invoice(id)
        .await?
        .ok_or_else(|| LedgerError::not_found("invoice", id))
}

fn validate_delivery(delivery: &Delivery) -> LedgerResult<()> {
    validation::recipient(&delivery.recipient)?;
    validation::required_text("subject", &delivery.subject, MAX_SUBJECT_LEN)
}
