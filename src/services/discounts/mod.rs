//! Discount evaluation: rule matching, batch validation and per-item pricing.

pub mod calculator;
pub mod model;
pub mod orchestrator;
pub mod rules;
pub mod stacking;
pub mod usage;

pub use calculator::PerItemDiscountCalculator;
pub use model::{
    CartItemSnapshot, CartSnapshot, Discount, DiscountResult, DiscountRule, DiscountType,
    ItemDiscount, RuleCondition, UserContext,
};
pub use orchestrator::{DiscountQuote, DiscountService};
pub use rules::RuleEvaluator;
pub use stacking::StackingValidator;
pub use usage::UsageLimitValidator;
