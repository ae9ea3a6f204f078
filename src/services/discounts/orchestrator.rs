use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::calculator::PerItemDiscountCalculator;
use super::model::{
    normalize_code, CartItemSnapshot, CartSnapshot, Discount, DiscountResult, DiscountType,
    ItemDiscount, RuleSpec, UserContext,
};
use super::rules::RuleEvaluator;
use super::stacking::StackingValidator;
use super::usage::UsageLimitValidator;
use crate::clock::Clock;
use crate::errors::DiscountError;
use crate::repositories::DiscountRepository;

/// Preview of what a set of codes does to a cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscountQuote {
    pub subtotal: Decimal,
    pub discount_total: Decimal,
    pub total: Decimal,
    pub free_shipping: bool,
    pub result: DiscountResult,
}

/// Resolves discount codes, validates them as a batch and prices a cart.
#[derive(Clone)]
pub struct DiscountService {
    repository: Arc<dyn DiscountRepository>,
    clock: Arc<dyn Clock>,
    evaluator: RuleEvaluator,
    calculator: PerItemDiscountCalculator,
    stacking: StackingValidator,
    usage: UsageLimitValidator,
}

impl DiscountService {
    pub fn new(repository: Arc<dyn DiscountRepository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            usage: UsageLimitValidator::new(repository.clone()),
            repository,
            clock,
            evaluator: RuleEvaluator::new(),
            calculator: PerItemDiscountCalculator::new(),
            stacking: StackingValidator::new(),
        }
    }

    /// Computes the discounts for `items`.
    ///
    /// Every code is resolved and validated before any item is priced; one
    /// bad code fails the whole batch.
    #[instrument(skip(self, items, user), fields(user_id = %user.user_id, items = items.len()))]
    pub async fn process(
        &self,
        items: &[CartItemSnapshot],
        user: &UserContext,
        codes: &[String],
    ) -> Result<DiscountResult, DiscountError> {
        let codes = normalize_codes(codes);
        if codes.is_empty() {
            return Ok(DiscountResult::default());
        }

        let discounts = self.resolve(&codes).await?;
        for discount in &discounts {
            discount.validate()?;
        }

        self.stacking.validate(&discounts, self.clock.now())?;
        for discount in &discounts {
            self.usage.validate(discount, user.user_id).await?;
        }

        Ok(self.apply(items, user, &discounts))
    }

    /// Runs [`process`](Self::process) over a whole cart and totals it. Has no
    /// side effects.
    pub async fn quote(
        &self,
        cart: &CartSnapshot,
        user: &UserContext,
        codes: &[String],
    ) -> Result<DiscountQuote, DiscountError> {
        let result = self.process(&cart.items, user, codes).await?;
        let subtotal: Decimal = cart.items.iter().map(|i| i.line_total()).sum();
        let discount_total = result.total_discount;

        Ok(DiscountQuote {
            subtotal,
            discount_total,
            total: (subtotal - discount_total).max(Decimal::ZERO),
            free_shipping: result.free_shipping,
            result,
        })
    }

    /// Prices already validated discounts, in order. Discounts are additive:
    /// several may land on the same item.
    pub fn apply(
        &self,
        items: &[CartItemSnapshot],
        user: &UserContext,
        discounts: &[Discount],
    ) -> DiscountResult {
        let mut result = DiscountResult::default();

        for discount in discounts {
            result.applied_discount_ids.push(discount.id);

            if discount.discount_type == DiscountType::FreeShipping {
                result.free_shipping = true;
                continue;
            }

            for rule in &discount.rules {
                if let RuleSpec::Malformed { rule_type, reason } = &rule.spec {
                    warn!(
                        code = %discount.code,
                        rule_id = %rule.id,
                        rule_type = %rule_type,
                        "Malformed discount rule treated as non-match: {}",
                        reason
                    );
                }
            }

            let before = result.item_discounts.len();
            for (item_index, item) in items.iter().enumerate() {
                if !self.evaluator.all_match(&discount.rules, item, user) {
                    continue;
                }
                if let Some(amount) =
                    self.calculator
                        .amount(item, discount.discount_type, discount.value)
                {
                    result.total_discount += amount;
                    result.item_discounts.push(ItemDiscount {
                        item_index,
                        discount_id: discount.id,
                        amount,
                    });
                }
            }

            if result.item_discounts.len() == before {
                debug!(code = %discount.code, "Discount matched no cart items");
            }
        }

        metrics::counter!(
            "discounts.applied",
            result.applied_discount_ids.len() as u64
        );
        result
    }

    async fn resolve(&self, codes: &[String]) -> Result<Vec<Discount>, DiscountError> {
        let mut by_code: HashMap<String, Discount> = self
            .repository
            .find_active_by_codes(codes)
            .await?
            .into_iter()
            .map(|d| (normalize_code(&d.code), d))
            .collect();

        codes
            .iter()
            .map(|code| {
                by_code
                    .remove(code)
                    .ok_or_else(|| DiscountError::UnknownDiscountCode(code.clone()))
            })
            .collect()
    }
}

/// Trims and upper-cases codes, dropping blanks and repeats while keeping the
/// first occurrence's position.
pub fn normalize_codes(codes: &[String]) -> Vec<String> {
    let mut seen = Vec::with_capacity(codes.len());
    for code in codes.iter().map(|c| normalize_code(c)) {
        if !code.is_empty() && !seen.contains(&code) {
            seen.push(code);
        }
    }
    seen
}
