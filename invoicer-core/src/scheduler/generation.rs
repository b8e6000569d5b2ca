use chrono::{Days, NaiveDate};
use serde_json::json;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::audit::AuditEntity;
use crate::error::{LedgerError, LedgerResult};
use crate::models::{Invoice, InvoiceType, NewInvoice, RecurrenceType, TemplateStatus};
use crate::recurrence;
use crate::scheduler::templates::load_template;
use crate::scheduler::RecurringScheduler;
use crate::store::{Store, StoreTx};

/// A template that could not be materialized during a batch run.
#[derive(Debug)]
pub struct TemplateFailure {
    pub template_id: Uuid,
    pub error: LedgerError,
}

/// Outcome of one `run_due` pass.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Invoices created
    pub generated: usize,
    /// Templates that turned out terminal or no longer due once locked
    pub skipped: usize,
    pub failures: Vec<TemplateFailure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    /// On demand; the schedule is left alone
    Manual,
    /// On demand, advancing the schedule
    Scheduled,
    /// From `run_due`; the template must still be due once locked
    Batch,
}

impl<S: Store> RecurringScheduler<S> {
    /// Generates one invoice from a template and advances its schedule.
    ///
    /// Returns `Ok(None)` for completed or terminated templates.
    pub async fn generate(&self, template_id: Uuid) -> LedgerResult<Option<Invoice>> {
        let today = self.ledger.clock().today();
        self.generate_one(template_id, today, Trigger::Scheduled).await
    }

    /// Generates one invoice on demand without touching the schedule:
    /// `generated_count`, `next_invoice_date` and status stay as they are.
    pub async fn generate_manually(&self, template_id: Uuid) -> LedgerResult<Option<Invoice>> {
        let today = self.ledger.clock().today();
        self.generate_one(template_id, today, Trigger::Manual).await
    }

    /// Materializes every template due on `today`.
    ///
    /// # Returns
    ///
    /// Returns the number of invoices created. Failed templates are logged
    /// and left untouched for the next run.
    pub async fn run_due(&self, today: NaiveDate) -> LedgerResult<usize> {
        Ok(self.run_due_report(today).await?.generated)
    }

    /// Like [`Self::run_due`], but reports skips and failures.
    ///
    /// Each template runs in its own unit of work, so one failure rolls
    /// back only that template's invoice, number and schedule update.
    pub async fn run_due_report(&self, today: NaiveDate) -> LedgerResult<RunReport> {
        let due = {
            let mut tx = self.ledger.store().begin().await?;
            let due = tx.due_templates(today).await?;
            due
        };

        if due.is_empty() {
            debug!("No recurring templates due on {}", today);
            return Ok(RunReport::default());
        }
        info!("Found {} recurring template(s) due on {}", due.len(), today);

        let mut report = RunReport::default();
        for template in due {
            match self.generate_one(template.id, today, Trigger::Batch).await {
                Ok(Some(invoice)) => {
                    report.generated += 1;
                    info!(
                        "Generated invoice {} from template {}",
                        invoice.invoice_number, template.id
                    );
                }
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    error!(
                        template_id = %template.id,
                        retryable = e.is_retryable(),
                        "Failed to generate invoice from template {}: {}",
                        template.id,
                        e
                    );
                    report.failures.push(TemplateFailure {
                        template_id: template.id,
                        error: e,
                    });
                }
            }
        }

        Ok(report)
    }

    async fn generate_one(
        &self,
        template_id: Uuid,
        invoice_date: NaiveDate,
        trigger: Trigger,
    ) -> LedgerResult<Option<Invoice>> {
        let mut tx = self.ledger.store().begin().await?;
        let mut template = load_template(&mut tx, template_id).await?;

        if template.status.is_terminal() {
            debug!("Template {} is {}, nothing to generate", template.id, template.status);
            return Ok(None);
        }
        if trigger != Trigger::Manual && template.recurrence_type == RecurrenceType::Manual {
            return Err(LedgerError::conflict(
                "manual templates only generate on demand",
            ));
        }
        if trigger == Trigger::Batch
            && !matches!(template.next_invoice_date, Some(next) if next <= invoice_date)
        {
            debug!("Template {} is no longer due", template.id);
            return Ok(None);
        }

        let due_date = match template.due_date_offset {
            Some(offset) => Some(
                invoice_date
                    .checked_add_days(Days::new(u64::try_from(offset).unwrap_or(0)))
                    .ok_or_else(|| LedgerError::validation("due date is out of calendar range"))?,
            ),
            None => None,
        };

        let request = NewInvoice {
            customer_id: template.customer_id,
            currency: Some(template.currency.clone()),
            invoice_date,
            due_date,
            tax_rate: template.tax_rate,
            notes: template.notes.clone(),
            internal_notes: None,
            items: template.line_items.0.clone(),
            invoice_type: InvoiceType::Recurring,
            recurring_template_id: Some(template.id),
        };
        let invoice = self.ledger.create_in(&mut tx, request).await?;

        let mut completed = false;
        if trigger != Trigger::Manual {
            let now = self.ledger.clock().now();
            template.generated_count += 1;
            template.last_generated_at = Some(now);

            if template.recurrence_type == RecurrenceType::Counted && template.is_exhausted() {
                template.status = TemplateStatus::Completed;
                template.next_invoice_date = None;
                completed = true;
            } else {
                template.next_invoice_date = Some(recurrence::next_for(&template)?);
                if template.status == TemplateStatus::Pending {
                    template.status = TemplateStatus::Active;
                }
            }

            template.updated_at = now;
            tx.update_template(&template).await?;
        }

        tx.commit().await?;

        self.ledger.record_created(&invoice);
        self.ledger.record(
            AuditEntity::RecurringTemplate(template.id),
            "generated",
            json!({
                "invoice_id": invoice.id,
                "invoice_number": invoice.invoice_number,
                "manual": trigger == Trigger::Manual,
                "generated_count": template.generated_count,
                "next_invoice_date": template.next_invoice_date,
            }),
        );
        if completed {
            info!(
                "Template {} completed after {} invoice(s)",
                template.id, template.generated_count
            );
            self.ledger.record(
                AuditEntity::RecurringTemplate(template.id),
                "completed",
                json!({ "generated_count": template.generated_count }),
            );
        }

        Ok(Some(invoice))
    }
}
