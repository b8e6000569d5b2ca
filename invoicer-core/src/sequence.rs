use tracing::debug;

use crate::error::{LedgerError, LedgerResult};
use crate::store::StoreTx;

/// Formats a year-scoped invoice number, e.g. `INV-2026-0001`.
///
/// Numbers above 9999 widen instead of truncating.
pub fn format_invoice_number(year: i32, number: i64) -> String {
    format!("INV-{}-{:04}", year, number)
}

/// Issues the next invoice number for `year` inside the caller's unit of
/// work.
///
/// The counter increment is serialized by the store, and it is rolled back
/// together with everything else if the unit of work is not committed, so
/// a number is never burned by a failed creation.
pub async fn allocate<T>(tx: &mut T, year: i32) -> LedgerResult<String>
where
    T: StoreTx + ?Sized,
{
    let number = tx.next_sequence(year).await?;
    if number < 1 {
        return Err(LedgerError::allocation(format!(
            "sequence for {} returned non-positive value {}",
            year, number
        )));
    }

    let formatted = format_invoice_number(year, number);
    debug!("Allocated invoice number {}", formatted);
    Ok(formatted)
}
