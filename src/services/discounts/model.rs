//! Domain types consumed and produced by the discount engine.
//!
//! Everything here is plain data. Carts and user profiles are read-only
//! inputs; `ItemDiscount` and `DiscountResult` are produced once and never
//! mutated afterwards.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::errors::DiscountError;

/// How a discount turns into money.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DiscountType {
    Percentage,
    FixedAmount,
    FreeShipping,
}

/// A promotional code with its validity window, limits and rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discount {
    pub id: Uuid,
    pub code: String,
    pub discount_type: DiscountType,
    pub value: Decimal,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub stackable: bool,
    pub usage_limit: Option<u32>,
    pub per_user_limit: Option<u32>,
    pub times_used: u32,
    pub is_active: bool,
    #[serde(default)]
    pub rules: Vec<DiscountRule>,
}

impl Discount {
    /// Checks the value invariants: never negative, percentages capped at 100.
    pub fn validate(&self) -> Result<(), DiscountError> {
        if self.value.is_sign_negative() {
            return Err(DiscountError::InvalidDiscount {
                code: self.code.clone(),
                reason: format!("value {} is negative", self.value),
            });
        }
        if self.discount_type == DiscountType::Percentage && self.value > Decimal::ONE_HUNDRED {
            return Err(DiscountError::InvalidDiscount {
                code: self.code.clone(),
                reason: format!("percentage {} exceeds 100", self.value),
            });
        }
        Ok(())
    }
}

/// Normalizes a user-entered code for lookup.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Rule kinds as stored alongside the payload.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RuleType {
    Product,
    Category,
    Brand,
    PurchaseQuantity,
    FirstTimeBuyer,
    CustomerSegment,
}

/// Constraints of a `customer_segment` rule. Every constraint that is set
/// must hold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentCriteria {
    #[serde(default)]
    pub segment: Option<String>,
    #[serde(default)]
    pub new_customers_only: bool,
    #[serde(default)]
    pub max_prior_orders: Option<u32>,
    #[serde(default)]
    pub customer_type: Option<CustomerType>,
    #[serde(default)]
    pub min_total_spend: Option<Decimal>,
}

/// A typed rule condition. Adding a variant forces every `match` over it to
/// handle the new case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleCondition {
    Product {
        product_ids: BTreeSet<Uuid>,
    },
    Category {
        category_ids: BTreeSet<Uuid>,
    },
    Brand {
        brand_ids: BTreeSet<Uuid>,
    },
    PurchaseQuantity {
        #[serde(default)]
        min_quantity: Option<u32>,
        #[serde(default)]
        max_quantity: Option<u32>,
    },
    FirstTimeBuyer {
        is_first_time_buyer: bool,
    },
    CustomerSegment(SegmentCriteria),
}

impl RuleCondition {
    pub fn rule_type(&self) -> RuleType {
        match self {
            Self::Product { .. } => RuleType::Product,
            Self::Category { .. } => RuleType::Category,
            Self::Brand { .. } => RuleType::Brand,
            Self::PurchaseQuantity { .. } => RuleType::PurchaseQuantity,
            Self::FirstTimeBuyer { .. } => RuleType::FirstTimeBuyer,
            Self::CustomerSegment(_) => RuleType::CustomerSegment,
        }
    }

    /// Decodes a stored `(rule_type, payload)` pair.
    ///
    /// The payload is the variant's fields without the `type` tag, which is
    /// how rules are persisted.
    pub fn from_parts(rule_type: &str, payload: &serde_json::Value) -> Result<Self, String> {
        let kind: RuleType = rule_type
            .parse()
            .map_err(|_| format!("unknown rule type '{}'", rule_type))?;

        let condition = match kind {
            RuleType::CustomerSegment => RuleCondition::CustomerSegment(
                serde_json::from_value(payload.clone()).map_err(|e| e.to_string())?,
            ),
            _ => {
                let mut tagged = match payload {
                    serde_json::Value::Object(map) => map.clone(),
                    other => return Err(format!("payload must be an object, got {}", other)),
                };
                tagged.insert(
                    "type".to_string(),
                    serde_json::Value::String(kind.as_ref().to_string()),
                );
                serde_json::from_value(serde_json::Value::Object(tagged))
                    .map_err(|e| e.to_string())?
            }
        };

        if let RuleCondition::PurchaseQuantity {
            min_quantity: Some(min),
            max_quantity: Some(max),
        } = &condition
        {
            if min > max {
                return Err(format!("min_quantity {} exceeds max_quantity {}", min, max));
            }
        }

        Ok(condition)
    }

    /// Encodes the condition into the untagged payload stored next to its type.
    pub fn to_payload(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        if let serde_json::Value::Object(map) = &mut value {
            map.remove("type");
        }
        value
    }
}

/// A rule as loaded from storage. Payloads that failed to decode are kept
/// so the evaluator can fail closed on them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSpec {
    Valid(RuleCondition),
    Malformed { rule_type: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscountRule {
    pub id: Uuid,
    pub spec: RuleSpec,
}

impl DiscountRule {
    pub fn new(condition: RuleCondition) -> Self {
        Self {
            id: Uuid::new_v4(),
            spec: RuleSpec::Valid(condition),
        }
    }

    pub fn from_stored(id: Uuid, rule_type: &str, payload: &serde_json::Value) -> Self {
        let spec = match RuleCondition::from_parts(rule_type, payload) {
            Ok(condition) => RuleSpec::Valid(condition),
            Err(reason) => RuleSpec::Malformed {
                rule_type: rule_type.to_string(),
                reason,
            },
        };
        Self { id, spec }
    }
}

/// One cart line as seen by the pricing engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItemSnapshot {
    pub product_id: Uuid,
    #[serde(default)]
    pub category_ids: BTreeSet<Uuid>,
    #[serde(default)]
    pub brand_id: Option<Uuid>,
    pub quantity: u32,
    pub unit_price: Decimal,
    #[serde(default)]
    pub product_name: String,
    #[serde(default)]
    pub sku: String,
    #[serde(default)]
    pub attributes: serde_json::Value,
}

impl CartItemSnapshot {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartSnapshot {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub currency: String,
    pub items: Vec<CartItemSnapshot>,
}

/// Account roles that influence customer tiering.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum UserRole {
    Customer,
    Premium,
    Vip,
    Admin,
    Moderator,
}

impl UserRole {
    /// Parses a stored role, treating anything unrecognised as a plain customer.
    pub fn parse_lenient(role: &str) -> Self {
        role.trim().parse().unwrap_or(UserRole::Customer)
    }
}

/// Customer label derived from order history and role.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CustomerType {
    New,
    Regular,
    Frequent,
    Loyal,
    Premium,
    Staff,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: Uuid,
    pub role: UserRole,
    pub total_orders: u32,
    pub total_spend: Decimal,
}

/// Monetary reduction attributed to one cart line by one discount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDiscount {
    pub item_index: usize,
    pub discount_id: Uuid,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountResult {
    pub item_discounts: Vec<ItemDiscount>,
    pub total_discount: Decimal,
    pub applied_discount_ids: Vec<Uuid>,
    pub free_shipping: bool,
}

impl DiscountResult {
    pub fn is_empty(&self) -> bool {
        self.applied_discount_ids.is_empty()
    }

    /// Sum of all discounts attributed to the item at `item_index`.
    pub fn discount_for_item(&self, item_index: usize) -> Decimal {
        self.item_discounts
            .iter()
            .filter(|d| d.item_index == item_index)
            .map(|d| d.amount)
            .sum()
    }
}
