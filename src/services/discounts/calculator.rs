use rust_decimal::Decimal;

use super::model::{CartItemSnapshot, DiscountType};

/// Converts a matched discount into a monetary amount for one cart line.
#[derive(Debug, Clone, Copy, Default)]
pub struct PerItemDiscountCalculator;

impl PerItemDiscountCalculator {
    pub fn new() -> Self {
        Self
    }

    /// Returns `None` for discount types that do not act on individual items.
    ///
    /// Fixed amounts are returned as configured and are not capped at the
    /// line total.
    pub fn amount(
        &self,
        item: &CartItemSnapshot,
        discount_type: DiscountType,
        value: Decimal,
    ) -> Option<Decimal> {
        match discount_type {
            DiscountType::FixedAmount => Some(value),
            DiscountType::Percentage => Some(item.line_total() * (value / Decimal::ONE_HUNDRED)),
            DiscountType::FreeShipping => None,
        }
    }
}
