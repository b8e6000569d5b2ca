use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sqlx::types::Json;
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::AuditEntity;
use crate::clock::Clock;
use crate::error::LedgerError;
use crate::models::{
    Delivery, InvoiceStatus, InvoiceType, NewTemplate, RecurrenceType, RecurrenceUnit,
    RecurringTemplate, TemplatePatch, TemplateStatus,
};
use crate::scheduler::{JobScheduler, PassSummary, RecurringScheduler};
use crate::store::{Store, StoreTx};
use crate::testing::{date, item, Harness};

fn scheduler(h: &Harness) -> RecurringScheduler<crate::store::MemoryStore> {
    RecurringScheduler::new(h.ledger.clone())
}

fn new_template(h: &Harness, kind: RecurrenceType, start: NaiveDate) -> NewTemplate {
    NewTemplate {
        customer_id: h.customer_id,
        title: "Monthly retainer".to_string(),
        recurrence_type: kind,
        recurrence_interval: 1,
        recurrence_unit: None,
        total_count: None,
        start_date: start,
        line_items: vec![item("Retainer", dec!(1), dec!(500.00))],
        tax_rate: dec!(11),
        currency: "USD".to_string(),
        due_date_offset: Some(14),
        notes: Some("Thank you".to_string()),
    }
}

fn counted(h: &Harness, unit: RecurrenceUnit, interval: i32, total: i32, start: NaiveDate) -> NewTemplate {
    NewTemplate {
        recurrence_interval: interval,
        recurrence_unit: Some(unit),
        total_count: Some(total),
        ..new_template(h, RecurrenceType::Counted, start)
    }
}

fn set_today(h: &Harness, day: NaiveDate) {
    h.clock.set(day.and_hms_opt(6, 0, 0).unwrap().and_utc());
}

/// `next_invoice_date` is null exactly for manual or finished templates.
fn assert_next_date_invariant(template: &RecurringTemplate) {
    let expect_none = template.recurrence_type == RecurrenceType::Manual
        || template.status.is_terminal();
    assert_eq!(
        template.next_invoice_date.is_none(),
        expect_none,
        "template {:?}/{:?} has next date {:?}",
        template.recurrence_type,
        template.status,
        template.next_invoice_date
    );
}

/// Inserts a template directly, bypassing validation.
async fn insert_raw(h: &Harness, template: &RecurringTemplate) {
    let mut tx = h.store.begin().await.unwrap();
    tx.insert_template(template).await.unwrap();
    tx.commit().await.unwrap();
}

fn raw_template(h: &Harness, next: NaiveDate) -> RecurringTemplate {
    crate::testing::raw_template(h.customer_id, next)
}

#[tokio::test]
async fn test_monthly_generation_advances_schedule() {
    let h = Harness::on(date(2026, 1, 15)).await;
    let s = scheduler(&h);

    let template = s
        .create_template(new_template(&h, RecurrenceType::Monthly, date(2026, 1, 15)))
        .await
        .unwrap();
    assert_eq!(template.status, TemplateStatus::Active);
    assert_eq!(template.next_invoice_date, Some(date(2026, 1, 15)));

    let invoice = s.generate(template.id).await.unwrap().expect("invoice");
    assert_eq!(invoice.invoice_type, InvoiceType::Recurring);
    assert_eq!(invoice.recurring_template_id, Some(template.id));
    assert_eq!(invoice.invoice_date, date(2026, 1, 15));
    assert_eq!(invoice.due_date, Some(date(2026, 1, 29)));
    assert_eq!(invoice.status, InvoiceStatus::Draft);
    assert_eq!(invoice.total, dec!(555.00));
    assert_eq!(invoice.notes.as_deref(), Some("Thank you"));

    let stored = h.store.get_template(template.id).await.unwrap();
    assert_eq!(stored.generated_count, 1);
    assert_eq!(stored.next_invoice_date, Some(date(2026, 2, 15)));
    assert_eq!(stored.status, TemplateStatus::Active);
    assert_eq!(stored.last_generated_at, Some(h.clock.now()));
    assert_next_date_invariant(&stored);

    assert_eq!(
        h.audit.actions_for(AuditEntity::RecurringTemplate(template.id)),
        vec!["created", "generated"]
    );
}

#[tokio::test]
async fn test_month_end_schedule_clamps() {
    let h = Harness::on(date(2026, 1, 31)).await;
    let s = scheduler(&h);
    let template = s
        .create_template(new_template(&h, RecurrenceType::Monthly, date(2026, 1, 31)))
        .await
        .unwrap();

    s.generate(template.id).await.unwrap();
    let stored = h.store.get_template(template.id).await.unwrap();
    assert_eq!(stored.next_invoice_date, Some(date(2026, 2, 28)));

    set_today(&h, date(2026, 2, 28));
    s.generate(template.id).await.unwrap();
    let stored = h.store.get_template(template.id).await.unwrap();
    assert_eq!(stored.next_invoice_date, Some(date(2026, 3, 28)));
}

#[tokio::test]
async fn test_counted_template_completes() {
    let h = Harness::on(date(2026, 1, 1)).await;
    let s = scheduler(&h);
    let template = s
        .create_template(counted(&h, RecurrenceUnit::Week, 2, 3, date(2026, 1, 1)))
        .await
        .unwrap();

    for (day, expected_next) in [
        (date(2026, 1, 1), Some(date(2026, 1, 15))),
        (date(2026, 1, 15), Some(date(2026, 1, 29))),
        (date(2026, 1, 29), None),
    ] {
        set_today(&h, day);
        assert_eq!(s.run_due(day).await.unwrap(), 1);
        let stored = h.store.get_template(template.id).await.unwrap();
        assert_eq!(stored.next_invoice_date, expected_next);
        assert_next_date_invariant(&stored);
    }

    let stored = h.store.get_template(template.id).await.unwrap();
    assert_eq!(stored.status, TemplateStatus::Completed);
    assert_eq!(stored.generated_count, 3);

    set_today(&h, date(2026, 2, 12));
    assert_eq!(s.run_due(date(2026, 2, 12)).await.unwrap(), 0);
    assert!(s.generate(template.id).await.unwrap().is_none());
    assert_eq!(h.store.invoices().await.len(), 3);

    let actions = h.audit.actions_for(AuditEntity::RecurringTemplate(template.id));
    assert_eq!(actions.last().map(String::as_str), Some("completed"));
}

#[tokio::test]
async fn test_last_counted_generation_from_two_of_three() {
    let h = Harness::on(date(2026, 3, 1)).await;
    let s = scheduler(&h);

    let mut template = raw_template(&h, date(2026, 3, 1));
    template.recurrence_type = RecurrenceType::Counted;
    template.recurrence_unit = Some(RecurrenceUnit::Week);
    template.recurrence_interval = 2;
    template.total_count = Some(3);
    template.generated_count = 2;
    insert_raw(&h, &template).await;

    assert_eq!(s.run_due(date(2026, 3, 1)).await.unwrap(), 1);
    let stored = h.store.get_template(template.id).await.unwrap();
    assert_eq!(stored.generated_count, 3);
    assert_eq!(stored.status, TemplateStatus::Completed);
    assert_eq!(stored.next_invoice_date, None);
}

#[tokio::test]
async fn test_failing_template_rolls_back_alone() {
    let h = Harness::on(date(2026, 1, 10)).await;
    let s = scheduler(&h);

    let mut templates = Vec::new();
    for day in 1..=5 {
        let mut template = raw_template(&h, date(2026, 1, day));
        if day == 3 {
            // Counted without a unit: the invoice is created, then the next
            // date cannot be computed.
            template.recurrence_type = RecurrenceType::Counted;
        }
        insert_raw(&h, &template).await;
        templates.push(template);
    }

    let report = s.run_due_report(date(2026, 1, 10)).await.unwrap();
    assert_eq!(report.generated, 4);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].template_id, templates[2].id);
    assert!(matches!(report.failures[0].error, LedgerError::Validation(_)));

    let untouched = h.store.get_template(templates[2].id).await.unwrap();
    assert_eq!(untouched, templates[2]);

    let invoices = h.store.invoices().await;
    let numbers: Vec<_> = invoices.iter().map(|i| i.invoice_number.as_str()).collect();
    assert_eq!(
        numbers,
        vec!["INV-2026-0001", "INV-2026-0002", "INV-2026-0003", "INV-2026-0004"]
    );
    assert!(invoices
        .iter()
        .all(|i| i.recurring_template_id != Some(templates[2].id)));
    assert_eq!(h.store.sequence(2026).await, Some(4));

    for (index, template) in templates.iter().enumerate().filter(|(i, _)| *i != 2) {
        let stored = h.store.get_template(template.id).await.unwrap();
        assert_eq!(stored.generated_count, 1, "template {}", index + 1);
    }
}

#[tokio::test]
async fn test_oversized_blueprint_fails_without_stopping_the_run() {
    let h = Harness::on(date(2026, 1, 10)).await;
    let s = scheduler(&h);

    let mut templates = Vec::new();
    for day in 1..=3 {
        let mut template = raw_template(&h, date(2026, 1, day));
        if day == 2 {
            template.line_items = Json(vec![item("Huge", Decimal::MAX, dec!(2))]);
        }
        insert_raw(&h, &template).await;
        templates.push(template);
    }

    let report = s.run_due_report(date(2026, 1, 10)).await.unwrap();
    assert_eq!(report.generated, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].template_id, templates[1].id);
    assert!(matches!(report.failures[0].error, LedgerError::Validation(_)));

    let numbers: Vec<_> = h
        .store
        .invoices()
        .await
        .into_iter()
        .map(|i| i.invoice_number)
        .collect();
    assert_eq!(numbers, vec!["INV-2026-0001", "INV-2026-0002"]);
    assert_eq!(h.store.get_template(templates[1].id).await.unwrap(), templates[1]);
    assert_eq!(
        h.store.get_template(templates[2].id).await.unwrap().generated_count,
        1
    );
}

#[tokio::test]
async fn test_oversized_blueprint_is_rejected_on_create() {
    let h = Harness::on(date(2026, 1, 15)).await;
    let s = scheduler(&h);

    let mut huge = new_template(&h, RecurrenceType::Monthly, date(2026, 1, 15));
    huge.line_items = vec![item("Huge", dec!(1000000000000000), dec!(100000000000000))];
    let err = s.create_template(huge).await.unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)), "{err}");

    let mut precise = new_template(&h, RecurrenceType::Monthly, date(2026, 1, 15));
    precise.tax_rate = dec!(12.345);
    let err = s.create_template(precise).await.unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)), "{err}");
}

#[tokio::test]
async fn test_run_due_twice_generates_once() {
    let h = Harness::on(date(2026, 4, 1)).await;
    let s = scheduler(&h);
    s.create_template(new_template(&h, RecurrenceType::Weekly, date(2026, 4, 1)))
        .await
        .unwrap();

    assert_eq!(s.run_due(date(2026, 4, 1)).await.unwrap(), 1);
    assert_eq!(s.run_due(date(2026, 4, 1)).await.unwrap(), 0);
    assert_eq!(s.run_due(date(2026, 4, 8)).await.unwrap(), 1);
}

#[tokio::test]
async fn test_pending_template_activates_on_first_run() {
    let h = Harness::on(date(2026, 1, 15)).await;
    let s = scheduler(&h);
    let template = s
        .create_template(new_template(&h, RecurrenceType::BiWeekly, date(2026, 2, 1)))
        .await
        .unwrap();
    assert_eq!(template.status, TemplateStatus::Pending);
    assert_eq!(template.next_invoice_date, Some(date(2026, 2, 1)));

    assert_eq!(s.run_due(date(2026, 1, 15)).await.unwrap(), 0);

    set_today(&h, date(2026, 2, 1));
    assert_eq!(s.run_due(date(2026, 2, 1)).await.unwrap(), 1);
    let stored = h.store.get_template(template.id).await.unwrap();
    assert_eq!(stored.status, TemplateStatus::Active);
    assert_eq!(stored.next_invoice_date, Some(date(2026, 2, 15)));
}

#[tokio::test]
async fn test_manual_generation_leaves_schedule_alone() {
    let h = Harness::on(date(2026, 1, 15)).await;
    let s = scheduler(&h);
    let template = s
        .create_template(new_template(&h, RecurrenceType::Monthly, date(2026, 1, 20)))
        .await
        .unwrap();

    let invoice = s.generate_manually(template.id).await.unwrap().expect("invoice");
    assert_eq!(invoice.invoice_date, date(2026, 1, 15));
    assert_eq!(invoice.recurring_template_id, Some(template.id));

    let stored = h.store.get_template(template.id).await.unwrap();
    assert_eq!(stored.generated_count, 0);
    assert_eq!(stored.next_invoice_date, Some(date(2026, 1, 20)));
    assert_eq!(stored.status, TemplateStatus::Pending);
    assert_eq!(stored.last_generated_at, None);
}

#[tokio::test]
async fn test_manual_templates_only_generate_on_demand() {
    let h = Harness::on(date(2026, 1, 15)).await;
    let s = scheduler(&h);
    let template = s
        .create_template(new_template(&h, RecurrenceType::Manual, date(2026, 1, 1)))
        .await
        .unwrap();
    assert_eq!(template.next_invoice_date, None);
    assert_next_date_invariant(&template);

    assert_eq!(s.run_due(date(2026, 1, 15)).await.unwrap(), 0);
    let err = s.generate(template.id).await.unwrap_err();
    assert!(matches!(err, LedgerError::StateConflict(_)));

    assert!(s.generate_manually(template.id).await.unwrap().is_some());
    assert_eq!(h.store.invoices().await.len(), 1);
}

#[tokio::test]
async fn test_terminated_template_is_inert() {
    let h = Harness::on(date(2026, 1, 15)).await;
    let s = scheduler(&h);
    let template = s
        .create_template(new_template(&h, RecurrenceType::Monthly, date(2026, 1, 1)))
        .await
        .unwrap();

    let terminated = s.terminate_template(template.id).await.unwrap();
    assert_eq!(terminated.status, TemplateStatus::Terminated);
    assert_next_date_invariant(&terminated);

    assert_eq!(s.terminate_template(template.id).await.unwrap(), terminated);
    assert!(s.generate(template.id).await.unwrap().is_none());
    assert!(s.generate_manually(template.id).await.unwrap().is_none());
    assert_eq!(s.run_due(date(2026, 1, 15)).await.unwrap(), 0);
    assert!(h.store.invoices().await.is_empty());

    let err = s
        .update_template(
            template.id,
            TemplatePatch {
                title: Some("Revived".to_string()),
                ..TemplatePatch::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::StateConflict(_)));
}

#[tokio::test]
async fn test_completed_template_cannot_be_terminated() {
    let h = Harness::on(date(2026, 1, 1)).await;
    let s = scheduler(&h);
    let template = s
        .create_template(counted(&h, RecurrenceUnit::Day, 1, 1, date(2026, 1, 1)))
        .await
        .unwrap();
    assert_eq!(s.run_due(date(2026, 1, 1)).await.unwrap(), 1);

    let err = s.terminate_template(template.id).await.unwrap_err();
    assert!(matches!(err, LedgerError::StateConflict(_)));
}

#[tokio::test]
async fn test_update_switches_between_manual_and_scheduled() {
    let h = Harness::on(date(2026, 1, 15)).await;
    let s = scheduler(&h);
    let template = s
        .create_template(new_template(&h, RecurrenceType::Monthly, date(2026, 1, 10)))
        .await
        .unwrap();

    let manual = s
        .update_template(
            template.id,
            TemplatePatch {
                recurrence_type: Some(RecurrenceType::Manual),
                ..TemplatePatch::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(manual.next_invoice_date, None);
    assert_next_date_invariant(&manual);

    let weekly = s
        .update_template(
            template.id,
            TemplatePatch {
                recurrence_type: Some(RecurrenceType::Weekly),
                ..TemplatePatch::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(weekly.next_invoice_date, Some(date(2026, 1, 10)));

    s.generate(template.id).await.unwrap();
    s.update_template(
        template.id,
        TemplatePatch {
            recurrence_type: Some(RecurrenceType::Manual),
            ..TemplatePatch::default()
        },
    )
    .await
    .unwrap();
    let resumed = s
        .update_template(
            template.id,
            TemplatePatch {
                recurrence_type: Some(RecurrenceType::Monthly),
                ..TemplatePatch::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(resumed.next_invoice_date, Some(date(2026, 1, 15)));
}

#[tokio::test]
async fn test_start_date_change_before_first_run() {
    let h = Harness::on(date(2026, 1, 15)).await;
    let s = scheduler(&h);
    let template = s
        .create_template(new_template(&h, RecurrenceType::Monthly, date(2026, 1, 10)))
        .await
        .unwrap();

    let moved = s
        .update_template(
            template.id,
            TemplatePatch {
                start_date: Some(date(2026, 3, 1)),
                ..TemplatePatch::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(moved.next_invoice_date, Some(date(2026, 3, 1)));
    assert_eq!(moved.status, TemplateStatus::Pending);
}

#[tokio::test]
async fn test_template_validation() {
    let h = Harness::on(date(2026, 1, 15)).await;
    let s = scheduler(&h);
    let start = date(2026, 1, 15);

    let mut capped_monthly = new_template(&h, RecurrenceType::Monthly, start);
    capped_monthly.total_count = Some(3);
    let mut unitless = counted(&h, RecurrenceUnit::Month, 1, 3, start);
    unitless.recurrence_unit = None;
    let mut zero_interval = new_template(&h, RecurrenceType::Weekly, start);
    zero_interval.recurrence_interval = 0;
    let mut no_items = new_template(&h, RecurrenceType::Weekly, start);
    no_items.line_items.clear();
    let mut negative_offset = new_template(&h, RecurrenceType::Weekly, start);
    negative_offset.due_date_offset = Some(-1);
    let mut bad_currency = new_template(&h, RecurrenceType::Weekly, start);
    bad_currency.currency = "DOLLARS".to_string();

    for request in [
        capped_monthly,
        unitless,
        zero_interval,
        no_items,
        negative_offset,
        bad_currency,
    ] {
        let err = s.create_template(request).await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)), "{err}");
    }

    let mut stranger = new_template(&h, RecurrenceType::Weekly, start);
    stranger.customer_id = Uuid::new_v4();
    let err = s.create_template(stranger).await.unwrap_err();
    assert!(matches!(err, LedgerError::NotFound { .. }));
}

#[tokio::test]
async fn test_job_pass_generates_and_sweeps() {
    let h = Harness::on(date(2026, 5, 1)).await;
    let s = Arc::new(scheduler(&h));

    let mut request = h.new_invoice(vec![item("Design", dec!(1), dec!(100))], dec!(0));
    request.due_date = Some(date(2026, 4, 30));
    request.invoice_date = date(2026, 4, 1);
    let invoice = h.ledger.create(request).await.unwrap();
    h.ledger
        .send(
            invoice.id,
            Delivery {
                recipient: "billing@acme.test".to_string(),
                subject: "Invoice".to_string(),
                body: None,
            },
        )
        .await
        .unwrap();
    s.create_template(new_template(&h, RecurrenceType::Monthly, date(2026, 5, 1)))
        .await
        .unwrap();

    let job = JobScheduler::new(s.clone(), None);
    let summary = job.run_once().await.unwrap();
    assert_eq!(
        summary,
        PassSummary {
            generated: 1,
            failed: 0,
            marked_overdue: 1,
        }
    );
    assert_eq!(h.ledger.get(invoice.id).await.unwrap().status, InvoiceStatus::Overdue);

    let quiet = JobScheduler::new(s, None).with_overdue_sweep(false);
    assert_eq!(quiet.run_once().await.unwrap(), PassSummary::default());
}

#[tokio::test]
async fn test_job_stops() {
    let h = Harness::on(date(2026, 5, 1)).await;
    let job = Arc::new(JobScheduler::new(
        Arc::new(scheduler(&h)),
        Some(std::time::Duration::from_secs(3600)),
    ));

    let runner = job.clone();
    let handle = tokio::spawn(async move { runner.start().await });
    while !job.is_running().await {
        tokio::task::yield_now().await;
    }
    job.stop().await;

    let result = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .expect("loop exits promptly");
    assert!(result.expect("task").is_ok());
}
