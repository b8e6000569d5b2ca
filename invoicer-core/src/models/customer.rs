use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Currency used when neither the request nor the customer names one.
pub const DEFAULT_CURRENCY: &str = "IDR";

/// Customer model.
///
/// Customers are managed outside this crate; the ledger only reads them
/// to validate ownership and to default the invoice currency.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Customer {
    /// Unique identifier for the customer
    pub id: Uuid,

    pub name: String,

    pub email: Option<String>,

    /// Preferred billing currency (ISO 4217)
    pub currency: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl Customer {
    pub fn billing_currency(&self) -> &str {
        self.currency.as_deref().unwrap_or(DEFAULT_CURRENCY)
    }
}
