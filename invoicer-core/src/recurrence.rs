//! Recurrence calculator.
//!
//! Pure date arithmetic: no store access, no clock. Each step is taken
//! from the template's last *scheduled* date, never from the time the
//! generation actually ran, so late runs do not shift the schedule.

use chrono::{Days, Months, NaiveDate};

use crate::error::{LedgerError, LedgerResult};
use crate::models::{RecurrenceRule, RecurrenceType, RecurrenceUnit, RecurringTemplate};

/// Computes the date that follows `base` under `rule`.
///
/// Month and year steps clamp to the last day of the target month
/// (Jan 31 + 1 month = Feb 28/29). The clamped date is what gets stored,
/// so it becomes the base of the following step.
///
/// # Errors
///
/// Returns a validation error for `manual` rules, for `counted` rules
/// without a unit, for intervals below 1 and on calendar overflow.
pub fn next_date(rule: &RecurrenceRule, base: NaiveDate) -> LedgerResult<NaiveDate> {
    let interval = u32::try_from(rule.interval)
        .ok()
        .filter(|n| *n >= 1)
        .ok_or_else(|| {
            LedgerError::validation(format!("recurrence interval must be >= 1, got {}", rule.interval))
        })?;

    let next = match rule.kind {
        RecurrenceType::Monthly => add_months(base, interval),
        RecurrenceType::Weekly => add_days(base, 7 * u64::from(interval)),
        RecurrenceType::BiWeekly => add_days(base, 14),
        RecurrenceType::TriWeekly => add_days(base, 21),
        RecurrenceType::Counted => match rule.unit {
            Some(RecurrenceUnit::Day) => add_days(base, u64::from(interval)),
            Some(RecurrenceUnit::Week) => add_days(base, 7 * u64::from(interval)),
            Some(RecurrenceUnit::Month) => add_months(base, interval),
            Some(RecurrenceUnit::Year) => interval
                .checked_mul(12)
                .and_then(|months| add_months(base, months)),
            None => {
                return Err(LedgerError::validation(
                    "counted recurrence requires a unit",
                ))
            }
        },
        RecurrenceType::Manual => {
            return Err(LedgerError::validation(
                "manual recurrence has no next date",
            ))
        }
    };

    next.ok_or_else(|| {
        LedgerError::validation(format!("next date after {} is out of calendar range", base))
    })
}

/// The date the next step is measured from: the current scheduled date if
/// there is one, otherwise the start date.
pub fn base_date(template: &RecurringTemplate) -> NaiveDate {
    template.next_invoice_date.unwrap_or(template.start_date)
}

/// Next scheduled date for `template`.
pub fn next_for(template: &RecurringTemplate) -> LedgerResult<NaiveDate> {
    next_date(&template.rule(), base_date(template))
}

fn add_months(base: NaiveDate, months: u32) -> Option<NaiveDate> {
    base.checked_add_months(Months::new(months))
}

fn add_days(base: NaiveDate, days: u64) -> Option<NaiveDate> {
    base.checked_add_days(Days::new(days))
}
