use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

use crate::models::invoice::ItemInput;

/// Recurrence pattern of a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar")]
pub enum RecurrenceType {
    #[serde(rename = "monthly")]
    #[sqlx(rename = "monthly")]
    Monthly,
    #[serde(rename = "weekly")]
    #[sqlx(rename = "weekly")]
    Weekly,
    #[serde(rename = "bi-weekly")]
    #[sqlx(rename = "bi-weekly")]
    BiWeekly,
    #[serde(rename = "tri-weekly")]
    #[sqlx(rename = "tri-weekly")]
    TriWeekly,
    /// Never scheduled; invoices only come from manual generation
    #[serde(rename = "manual")]
    #[sqlx(rename = "manual")]
    Manual,
    /// `interval × unit` steps, optionally capped by `total_count`
    #[serde(rename = "counted")]
    #[sqlx(rename = "counted")]
    Counted,
}

impl fmt::Display for RecurrenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecurrenceType::Monthly => write!(f, "monthly"),
            RecurrenceType::Weekly => write!(f, "weekly"),
            RecurrenceType::BiWeekly => write!(f, "bi-weekly"),
            RecurrenceType::TriWeekly => write!(f, "tri-weekly"),
            RecurrenceType::Manual => write!(f, "manual"),
            RecurrenceType::Counted => write!(f, "counted"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar")]
pub enum RecurrenceUnit {
    #[sqlx(rename = "day")]
    Day,
    #[sqlx(rename = "week")]
    Week,
    #[sqlx(rename = "month")]
    Month,
    #[sqlx(rename = "year")]
    Year,
}

/// Template lifecycle. `Completed` and `Terminated` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar")]
pub enum TemplateStatus {
    #[sqlx(rename = "pending")]
    Pending,
    #[sqlx(rename = "active")]
    Active,
    #[sqlx(rename = "completed")]
    Completed,
    #[sqlx(rename = "terminated")]
    Terminated,
}

impl TemplateStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TemplateStatus::Completed | TemplateStatus::Terminated)
    }
}

impl fmt::Display for TemplateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateStatus::Pending => write!(f, "pending"),
            TemplateStatus::Active => write!(f, "active"),
            TemplateStatus::Completed => write!(f, "completed"),
            TemplateStatus::Terminated => write!(f, "terminated"),
        }
    }
}

/// The schedule-relevant part of a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceRule {
    pub kind: RecurrenceType,
    pub interval: i32,
    pub unit: Option<RecurrenceUnit>,
    pub total_count: Option<i32>,
}

/// Recurring invoice template.
///
/// This struct maps to the `recurring_templates` table. `line_items` is a
/// JSON blueprint copied verbatim into every generated invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct RecurringTemplate {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub title: String,

    pub recurrence_type: RecurrenceType,
    pub recurrence_interval: i32,
    pub recurrence_unit: Option<RecurrenceUnit>,
    pub total_count: Option<i32>,

    /// Number of scheduled generations so far; manual generation does not count
    pub generated_count: i32,

    pub start_date: NaiveDate,

    /// Null iff the type is manual or the template is completed/terminated
    pub next_invoice_date: Option<NaiveDate>,

    pub status: TemplateStatus,

    pub line_items: Json<Vec<ItemInput>>,
    pub tax_rate: Decimal,
    pub currency: String,

    /// Days between invoice date and due date
    pub due_date_offset: Option<i32>,
    pub notes: Option<String>,

    pub last_generated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RecurringTemplate {
    pub fn rule(&self) -> RecurrenceRule {
        RecurrenceRule {
            kind: self.recurrence_type,
            interval: self.recurrence_interval,
            unit: self.recurrence_unit,
            total_count: self.total_count,
        }
    }

    /// Whether the schedule has reached its configured count.
    pub fn is_exhausted(&self) -> bool {
        matches!(self.total_count, Some(limit) if self.generated_count >= limit)
    }
}

/// Template creation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTemplate {
    pub customer_id: Uuid,
    pub title: String,
    pub recurrence_type: RecurrenceType,
    pub recurrence_interval: i32,
    pub recurrence_unit: Option<RecurrenceUnit>,
    pub total_count: Option<i32>,
    pub start_date: NaiveDate,
    pub line_items: Vec<ItemInput>,
    pub tax_rate: Decimal,
    pub currency: String,
    pub due_date_offset: Option<i32>,
    pub notes: Option<String>,
}

/// Template update request.
///
/// Nullable fields use `Option<Option<_>>`: `None` keeps the value,
/// `Some(None)` clears it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplatePatch {
    pub title: Option<String>,
    pub recurrence_type: Option<RecurrenceType>,
    pub recurrence_interval: Option<i32>,
    pub recurrence_unit: Option<Option<RecurrenceUnit>>,
    pub total_count: Option<Option<i32>>,
    pub start_date: Option<NaiveDate>,
    pub line_items: Option<Vec<ItemInput>>,
    pub tax_rate: Option<Decimal>,
    pub currency: Option<String>,
    pub due_date_offset: Option<Option<i32>>,
    pub notes: Option<Option<String>>,
}
