use rust_decimal::{Decimal, RoundingStrategy};
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::models::{InvoiceItem, ItemInput};
use crate::validation::MAX_AMOUNT;

/// Money and tax-rate scale.
const SCALE: u32 = 2;

/// Rounds to 2 places, half away from zero.
pub fn round_money(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(SCALE);
    rounded
}

/// Invoice totals derived from its items and tax rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Totals {
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
}

impl Totals {
    /// `subtotal = Σ amount`, `tax = subtotal × rate / 100`,
    /// `total = subtotal + tax`.
    ///
    /// Always computed from scratch; nothing carries over from a previous
    /// computation. A subtotal above [`MAX_AMOUNT`] is a validation error.
    pub fn compute(items: &[InvoiceItem], tax_rate: Decimal) -> LedgerResult<Self> {
        let sum = items
            .iter()
            .try_fold(Decimal::ZERO, |acc, item| acc.checked_add(item.amount))
            .ok_or_else(|| overflow("subtotal"))?;
        let subtotal = within_limit("subtotal", round_money(sum))?;
        let tax = subtotal
            .checked_mul(tax_rate)
            .and_then(|taxed| taxed.checked_div(Decimal::ONE_HUNDRED))
            .ok_or_else(|| overflow("tax amount"))?;
        let tax_amount = round_money(tax);
        let total = subtotal
            .checked_add(tax_amount)
            .ok_or_else(|| overflow("total"))?;
        Ok(Self {
            subtotal,
            tax_amount,
            total: round_money(total),
        })
    }
}

/// Materializes input lines into items owned by `invoice_id`, numbering
/// them in entry order.
pub fn build_items(invoice_id: Uuid, inputs: &[ItemInput]) -> LedgerResult<Vec<InvoiceItem>> {
    inputs
        .iter()
        .enumerate()
        .map(|(index, input)| -> LedgerResult<InvoiceItem> {
            let field = format!("item {} amount", index + 1);
            let amount = input
                .quantity
                .checked_mul(input.unit_price)
                .ok_or_else(|| overflow(&field))?;
            Ok(InvoiceItem {
                id: Uuid::new_v4(),
                invoice_id,
                description: input.description.trim().to_string(),
                quantity: input.quantity,
                unit_price: input.unit_price,
                amount: within_limit(&field, round_money(amount))?,
                sort_order: index as i32,
            })
        })
        .collect()
}

fn within_limit(field: &str, value: Decimal) -> LedgerResult<Decimal> {
    if value > MAX_AMOUNT {
        return Err(LedgerError::validation(format!(
            "{field} {value} exceeds the maximum of {MAX_AMOUNT}"
        )));
    }
    Ok(value)
}

fn overflow(field: &str) -> LedgerError {
    LedgerError::validation(format!("{field} is too large to compute"))
}
