use chrono::NaiveDate;
use serde_json::json;
use sqlx::types::Json;
use tracing::info;
use uuid::Uuid;

use crate::audit::AuditEntity;
use crate::error::{LedgerError, LedgerResult};
use crate::models::{
    NewTemplate, RecurrenceType, RecurringTemplate, TemplatePatch, TemplateStatus,
};
use crate::scheduler::RecurringScheduler;
use crate::store::{Store, StoreTx};
use crate::validation;

impl<S: Store> RecurringScheduler<S> {
    /// Loads a committed template without locking it.
    pub async fn template(&self, id: Uuid) -> LedgerResult<RecurringTemplate> {
        self.ledger
            .store()
            .find_template(id)
            .await?
            .ok_or_else(|| LedgerError::not_found("recurring template", id))
    }

    /// Creates a recurring template.
    ///
    /// The first scheduled date is the start date itself. Templates
    /// starting in the future begin as `pending`; manual templates never
    /// carry a next date.
    ///
    /// # Arguments
    ///
    /// * `request` - Schedule, blueprint items and invoice defaults
    ///
    /// # Returns
    ///
    /// Returns the stored template, or a validation / not-found error.
    pub async fn create_template(&self, request: NewTemplate) -> LedgerResult<RecurringTemplate> {
        let clock = self.ledger.clock();
        let now = clock.now();
        let today = clock.today();

        let template = RecurringTemplate {
            id: Uuid::new_v4(),
            customer_id: request.customer_id,
            title: request.title.trim().to_string(),
            recurrence_type: request.recurrence_type,
            recurrence_interval: request.recurrence_interval,
            recurrence_unit: request.recurrence_unit,
            total_count: request.total_count,
            generated_count: 0,
            start_date: request.start_date,
            next_invoice_date: scheduled_start(request.recurrence_type, request.start_date),
            status: status_for_start(request.start_date, today),
            line_items: Json(request.line_items),
            tax_rate: request.tax_rate,
            currency: request.currency.to_ascii_uppercase(),
            due_date_offset: request.due_date_offset,
            notes: request.notes,
            last_generated_at: None,
            created_at: now,
            updated_at: now,
        };
        validate_template(&template)?;

        let mut tx = self.ledger.store().begin().await?;
        if tx.customer(template.customer_id).await?.is_none() {
            return Err(LedgerError::not_found("customer", template.customer_id));
        }
        tx.insert_template(&template).await?;
        tx.commit().await?;

        info!(
            "Created {} template {} ({}) starting {}",
            template.recurrence_type, template.id, template.title, template.start_date
        );
        self.ledger.record(
            AuditEntity::RecurringTemplate(template.id),
            "created",
            json!({
                "title": template.title,
                "recurrence_type": template.recurrence_type,
                "status": template.status,
                "next_invoice_date": template.next_invoice_date,
            }),
        );
        Ok(template)
    }

    /// Applies `patch` to a live template.
    ///
    /// Switching to manual clears the next date. While nothing has been
    /// generated, a new start date also becomes the next date and decides
    /// between `pending` and `active`. Switching from manual back to a
    /// schedule resumes at the start date, or today once invoices exist.
    pub async fn update_template(
        &self,
        id: Uuid,
        patch: TemplatePatch,
    ) -> LedgerResult<RecurringTemplate> {
        let clock = self.ledger.clock();
        let today = clock.today();

        let mut tx = self.ledger.store().begin().await?;
        let mut template = load_template(&mut tx, id).await?;
        if template.status.is_terminal() {
            return Err(LedgerError::conflict(format!(
                "template is {} and can no longer be edited",
                template.status
            )));
        }

        let was_manual = template.recurrence_type == RecurrenceType::Manual;
        let untouched = template.generated_count == 0;

        if let Some(title) = patch.title {
            template.title = title.trim().to_string();
        }
        if let Some(kind) = patch.recurrence_type {
            template.recurrence_type = kind;
        }
        if let Some(interval) = patch.recurrence_interval {
            template.recurrence_interval = interval;
        }
        if let Some(unit) = patch.recurrence_unit {
            template.recurrence_unit = unit;
        }
        if let Some(total) = patch.total_count {
            template.total_count = total;
        }
        if let Some(items) = patch.line_items {
            template.line_items = Json(items);
        }
        if let Some(rate) = patch.tax_rate {
            template.tax_rate = rate;
        }
        if let Some(currency) = patch.currency {
            template.currency = currency.to_ascii_uppercase();
        }
        if let Some(offset) = patch.due_date_offset {
            template.due_date_offset = offset;
        }
        if let Some(notes) = patch.notes {
            template.notes = notes;
        }
        if let Some(start) = patch.start_date {
            template.start_date = start;
            if untouched {
                template.status = status_for_start(start, today);
            }
        }

        if template.recurrence_type == RecurrenceType::Manual {
            template.next_invoice_date = None;
        } else if patch.start_date.is_some() && untouched {
            template.next_invoice_date = Some(template.start_date);
        } else if was_manual {
            template.next_invoice_date = Some(if untouched { template.start_date } else { today });
        }

        validate_template(&template)?;
        if let Some(total) = template.total_count {
            if total < template.generated_count {
                return Err(LedgerError::validation(format!(
                    "total count {} is below the {} invoice(s) already generated",
                    total, template.generated_count
                )));
            }
        }
        if template.recurrence_type == RecurrenceType::Counted && template.is_exhausted() {
            template.status = TemplateStatus::Completed;
            template.next_invoice_date = None;
        }

        template.updated_at = clock.now();
        tx.update_template(&template).await?;
        tx.commit().await?;

        self.ledger.record(
            AuditEntity::RecurringTemplate(template.id),
            "updated",
            json!({
                "status": template.status,
                "next_invoice_date": template.next_invoice_date,
            }),
        );
        Ok(template)
    }

    /// Stops a template for good. Terminating twice is a no-op; a
    /// completed template cannot be terminated.
    pub async fn terminate_template(&self, id: Uuid) -> LedgerResult<RecurringTemplate> {
        let mut tx = self.ledger.store().begin().await?;
        let mut template = load_template(&mut tx, id).await?;

        match template.status {
            TemplateStatus::Terminated => return Ok(template),
            TemplateStatus::Completed => {
                return Err(LedgerError::conflict(
                    "template already completed its schedule",
                ))
            }
            TemplateStatus::Pending | TemplateStatus::Active => {}
        }

        template.status = TemplateStatus::Terminated;
        template.next_invoice_date = None;
        template.updated_at = self.ledger.clock().now();
        tx.update_template(&template).await?;
        tx.commit().await?;

        info!("Terminated template {} ({})", template.id, template.title);
        self.ledger.record(
            AuditEntity::RecurringTemplate(template.id),
            "terminated",
            json!({ "generated_count": template.generated_count }),
        );
        Ok(template)
    }
}

pub(crate) async fn load_template<T: StoreTx>(
    tx: &mut T,
    id: Uuid,
) -> LedgerResult<RecurringTemplate> {
    tx.template(id)
        .await?
        .ok_or_else(|| LedgerError::not_found("recurring template", id))
}

fn scheduled_start(kind: RecurrenceType, start: NaiveDate) -> Option<NaiveDate> {
    match kind {
        RecurrenceType::Manual => None,
        _ => Some(start),
    }
}

fn status_for_start(start: NaiveDate, today: NaiveDate) -> TemplateStatus {
    if start > today {
        TemplateStatus::Pending
    } else {
        TemplateStatus::Active
    }
}

fn validate_template(template: &RecurringTemplate) -> LedgerResult<()> {
    validation::required_text("title", &template.title, validation::MAX_TITLE_LEN)?;
    if template.recurrence_interval < 1 {
        return Err(LedgerError::validation("recurrence interval must be at least 1"));
    }

    match (template.recurrence_type, template.recurrence_unit) {
        (RecurrenceType::Counted, None) => {
            return Err(LedgerError::validation("counted recurrence requires a unit"))
        }
        (RecurrenceType::Counted, Some(_)) | (_, None) => {}
        (kind, Some(_)) => {
            return Err(LedgerError::validation(format!(
                "recurrence unit only applies to counted templates, not {}",
                kind
            )))
        }
    }

    if let Some(total) = template.total_count {
        if template.recurrence_type != RecurrenceType::Counted {
            return Err(LedgerError::validation(
                "total count only applies to counted templates",
            ));
        }
        if total < 1 {
            return Err(LedgerError::validation("total count must be at least 1"));
        }
    }

    if matches!(template.due_date_offset, Some(offset) if offset < 0) {
        return Err(LedgerError::validation("due date offset must not be negative"));
    }

    validation::currency(&template.currency)?;
    validation::tax_rate(template.tax_rate)?;
    validation::items(&template.line_items)?;
    validation::optional_text("notes", template.notes.as_deref(), validation::MAX_NOTES_LEN)
}
