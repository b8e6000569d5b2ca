//! Input checks shared by the ledger and the template service.
//!
//! Every check runs before a unit of work touches the store.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::error::{LedgerError, LedgerResult};
use crate::models::ItemInput;

pub const MAX_DESCRIPTION_LEN: usize = 200;
pub const MAX_NOTES_LEN: usize = 500;
pub const MAX_REFERENCE_LEN: usize = 255;
pub const MAX_REASON_LEN: usize = 200;
pub const MAX_TITLE_LEN: usize = 255;

/// Quantities, prices, rates and amounts are stored with 2 decimals.
pub const MAX_DECIMAL_PLACES: u32 = 2;
/// Largest quantity per line (1,000,000).
pub const MAX_QUANTITY: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);
/// Largest unit price per line (1,000,000,000).
pub const MAX_UNIT_PRICE: Decimal = Decimal::from_parts(1_000_000_000, 0, 0, false, 0);
/// Largest line amount or subtotal (1,000,000,000,000).
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(3_567_587_328, 232, 0, false, 0);

pub fn items(items: &[ItemInput]) -> LedgerResult<()> {
    if items.is_empty() {
        return Err(LedgerError::validation("at least one line item is required"));
    }

    for (index, item) in items.iter().enumerate() {
        let line = index + 1;
        required_text(&format!("item {line} description"), &item.description, MAX_DESCRIPTION_LEN)?;
        if item.quantity <= Decimal::ZERO {
            return Err(LedgerError::validation(format!(
                "item {line} quantity must be greater than zero"
            )));
        }
        if item.quantity > MAX_QUANTITY {
            return Err(LedgerError::validation(format!(
                "item {line} quantity must be at most {MAX_QUANTITY}"
            )));
        }
        if item.unit_price < Decimal::ZERO {
            return Err(LedgerError::validation(format!(
                "item {line} unit price must not be negative"
            )));
        }
        if item.unit_price > MAX_UNIT_PRICE {
            return Err(LedgerError::validation(format!(
                "item {line} unit price must be at most {MAX_UNIT_PRICE}"
            )));
        }
        decimal_places(&format!("item {line} quantity"), item.quantity)?;
        decimal_places(&format!("item {line} unit price"), item.unit_price)?;
    }
    Ok(())
}

/// Tax rate is a percentage between 0 and 100.
pub fn tax_rate(rate: Decimal) -> LedgerResult<()> {
    if rate < Decimal::ZERO || rate > Decimal::ONE_HUNDRED {
        return Err(LedgerError::validation(format!(
            "tax rate must be between 0 and 100, got {rate}"
        )));
    }
    decimal_places("tax rate", rate)
}

/// Rejects values that would be rounded when stored.
pub fn decimal_places(field: &str, value: Decimal) -> LedgerResult<()> {
    if value.normalize().scale() > MAX_DECIMAL_PLACES {
        return Err(LedgerError::validation(format!(
            "{field} must have at most {MAX_DECIMAL_PLACES} decimal places, got {value}"
        )));
    }
    Ok(())
}

pub fn due_date(invoice_date: NaiveDate, due_date: Option<NaiveDate>) -> LedgerResult<()> {
    match due_date {
        Some(due) if due < invoice_date => Err(LedgerError::validation(
            "due date must be on or after the invoice date",
        )),
        _ => Ok(()),
    }
}

/// ISO 4217 style: three ASCII letters.
pub fn currency(code: &str) -> LedgerResult<()> {
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(())
    } else {
        Err(LedgerError::validation(format!(
            "currency must be a 3-letter code, got {code:?}"
        )))
    }
}

pub fn optional_text(field: &str, value: Option<&str>, max: usize) -> LedgerResult<()> {
    match value {
        Some(text) if text.chars().count() > max => Err(LedgerError::validation(format!(
            "{field} must be at most {max} characters"
        ))),
        _ => Ok(()),
    }
}

pub fn required_text(field: &str, value: &str, max: usize) -> LedgerResult<()> {
    if value.trim().is_empty() {
        return Err(LedgerError::validation(format!("{field} is required")));
    }
    optional_text(field, Some(value), max)
}

/// Loose shape check; deliverability is the mailer's concern.
pub fn recipient(address: &str) -> LedgerResult<()> {
    let valid = match address.trim().split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !address.chars().any(char::is_whitespace)
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(LedgerError::validation(format!(
            "recipient {address:?} is not a valid email address"
        )))
    }
}
