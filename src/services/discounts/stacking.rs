use chrono::{DateTime, Utc};

use super::model::Discount;
use crate::errors::{DiscountError, ValidityViolation};

/// Validity-window and stacking checks over the discounts of one checkout,
/// in request order.
#[derive(Debug, Clone, Copy, Default)]
pub struct StackingValidator;

impl StackingValidator {
    pub fn new() -> Self {
        Self
    }

    /// Fails on the first discount outside its window, or on the second
    /// non-stackable discount seen.
    pub fn validate(
        &self,
        discounts: &[Discount],
        now: DateTime<Utc>,
    ) -> Result<(), DiscountError> {
        let mut exclusive: Option<&Discount> = None;

        for discount in discounts {
            check_window(discount, now)?;

            if discount.stackable {
                continue;
            }
            if let Some(first) = exclusive {
                return Err(DiscountError::StackingConflict {
                    first: first.code.clone(),
                    second: discount.code.clone(),
                });
            }
            exclusive = Some(discount);
        }

        Ok(())
    }
}

/// The window is inclusive at both ends.
pub fn check_window(discount: &Discount, now: DateTime<Utc>) -> Result<(), DiscountError> {
    if now < discount.starts_at {
        return Err(DiscountError::ExpiredOrNotYetValid {
            code: discount.code.clone(),
            violation: ValidityViolation::NotYetValid,
        });
    }
    if let Some(ends_at) = discount.ends_at {
        if now > ends_at {
            return Err(DiscountError::ExpiredOrNotYetValid {
                code: discount.code.clone(),
                violation: ValidityViolation::Expired,
            });
        }
    }
    Ok(())
}
