use super::model::{
    CartItemSnapshot, CustomerType, DiscountRule, RuleCondition, RuleSpec, SegmentCriteria,
    UserContext, UserRole,
};

/// Derives the customer label used by segment rules.
///
/// Privileged roles win over order history; every other role falls back to
/// bucketing by completed orders: 0 new, 1-3 regular, 4-10 frequent, above
/// that loyal.
pub fn customer_type(user: &UserContext) -> CustomerType {
    match user.role {
        UserRole::Premium | UserRole::Vip => CustomerType::Premium,
        UserRole::Admin | UserRole::Moderator => CustomerType::Staff,
        UserRole::Customer => customer_type_by_orders(user.total_orders),
    }
}

pub fn customer_type_by_orders(total_orders: u32) -> CustomerType {
    match total_orders {
        0 => CustomerType::New,
        1..=3 => CustomerType::Regular,
        4..=10 => CustomerType::Frequent,
        _ => CustomerType::Loyal,
    }
}

/// Pure predicate deciding whether a single rule admits a cart item for a user.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleEvaluator;

impl RuleEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Malformed rules never match.
    pub fn matches(
        &self,
        rule: &DiscountRule,
        item: &CartItemSnapshot,
        user: &UserContext,
    ) -> bool {
        match &rule.spec {
            RuleSpec::Valid(condition) => self.condition_matches(condition, item, user),
            RuleSpec::Malformed { .. } => false,
        }
    }

    /// True when every rule matches. A discount without rules applies to every item.
    pub fn all_match(
        &self,
        rules: &[DiscountRule],
        item: &CartItemSnapshot,
        user: &UserContext,
    ) -> bool {
        rules.iter().all(|rule| self.matches(rule, item, user))
    }

    pub fn condition_matches(
        &self,
        condition: &RuleCondition,
        item: &CartItemSnapshot,
        user: &UserContext,
    ) -> bool {
        match condition {
            RuleCondition::Product { product_ids } => product_ids.contains(&item.product_id),
            RuleCondition::Category { category_ids } => {
                !item.category_ids.is_disjoint(category_ids)
            }
            RuleCondition::Brand { brand_ids } => item
                .brand_id
                .map(|brand| brand_ids.contains(&brand))
                .unwrap_or(false),
            RuleCondition::PurchaseQuantity {
                min_quantity,
                max_quantity,
            } => {
                min_quantity.map_or(true, |min| item.quantity >= min)
                    && max_quantity.map_or(true, |max| item.quantity <= max)
            }
            RuleCondition::FirstTimeBuyer {
                is_first_time_buyer,
            } => !is_first_time_buyer || user.total_orders == 0,
            RuleCondition::CustomerSegment(criteria) => segment_matches(criteria, user),
        }
    }
}

fn segment_matches(criteria: &SegmentCriteria, user: &UserContext) -> bool {
    if criteria.new_customers_only && user.total_orders != 0 {
        return false;
    }

    if let Some(max_orders) = criteria.max_prior_orders {
        if user.total_orders > max_orders {
            return false;
        }
    }

    if let Some(expected) = criteria.customer_type {
        if customer_type(user) != expected {
            return false;
        }
    }

    if let Some(min_spend) = criteria.min_total_spend {
        if user.total_spend < min_spend {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::BTreeSet;
    use uuid::Uuid;

    fn item(quantity: u32) -> CartItemSnapshot {
        CartItemSnapshot {
            product_id: Uuid::new_v4(),
            category_ids: BTreeSet::new(),
            brand_id: None,
            quantity,
            unit_price: dec!(20),
            product_name: "Widget".into(),
            sku: "W-1".into(),
            attributes: serde_json::Value::Null,
        }
    }

    fn user(role: UserRole, total_orders: u32, total_spend: Decimal) -> UserContext {
        UserContext {
            user_id: Uuid::new_v4(),
            role,
            total_orders,
            total_spend,
        }
    }

    fn shopper() -> UserContext {
        user(UserRole::Customer, 0, Decimal::ZERO)
    }

    #[rstest]
    #[case(0, CustomerType::New)]
    #[case(1, CustomerType::Regular)]
    #[case(3, CustomerType::Regular)]
    #[case(4, CustomerType::Frequent)]
    #[case(10, CustomerType::Frequent)]
    #[case(11, CustomerType::Loyal)]
    fn order_count_buckets(#[case] orders: u32, #[case] expected: CustomerType) {
        assert_eq!(
            customer_type(&user(UserRole::Customer, orders, Decimal::ZERO)),
            expected
        );
    }

    #[rstest]
    #[case(UserRole::Premium, CustomerType::Premium)]
    #[case(UserRole::Vip, CustomerType::Premium)]
    #[case(UserRole::Admin, CustomerType::Staff)]
    #[case(UserRole::Moderator, CustomerType::Staff)]
    fn privileged_roles_override_order_history(
        #[case] role: UserRole,
        #[case] expected: CustomerType,
    ) {
        assert_eq!(customer_type(&user(role, 0, Decimal::ZERO)), expected);
        assert_eq!(customer_type(&user(role, 50, Decimal::ZERO)), expected);
    }

    #[test]
    fn product_rule() {
        let evaluator = RuleEvaluator::new();
        let line = item(1);
        let hit = RuleCondition::Product {
            product_ids: BTreeSet::from([line.product_id]),
        };
        let miss = RuleCondition::Product {
            product_ids: BTreeSet::from([Uuid::new_v4()]),
        };
        assert!(evaluator.condition_matches(&hit, &line, &shopper()));
        assert!(!evaluator.condition_matches(&miss, &line, &shopper()));
    }

    #[test]
    fn category_rule_needs_any_overlap() {
        let evaluator = RuleEvaluator::new();
        let shoes = Uuid::new_v4();
        let sale = Uuid::new_v4();
        let mut line = item(1);
        line.category_ids = BTreeSet::from([shoes, sale]);

        let rule = RuleCondition::Category {
            category_ids: BTreeSet::from([sale, Uuid::new_v4()]),
        };
        assert!(evaluator.condition_matches(&rule, &line, &shopper()));

        line.category_ids.clear();
        assert!(!evaluator.condition_matches(&rule, &line, &shopper()));
    }

    #[test]
    fn brand_rule_without_brand_never_matches() {
        let evaluator = RuleEvaluator::new();
        let brand = Uuid::new_v4();
        let rule = RuleCondition::Brand {
            brand_ids: BTreeSet::from([brand]),
        };
        let mut line = item(1);
        assert!(!evaluator.condition_matches(&rule, &line, &shopper()));

        line.brand_id = Some(brand);
        assert!(evaluator.condition_matches(&rule, &line, &shopper()));
    }

    #[rstest]
    #[case(Some(2), Some(5), 1, false)]
    #[case(Some(2), Some(5), 2, true)]
    #[case(Some(2), Some(5), 5, true)]
    #[case(Some(2), Some(5), 6, false)]
    #[case(None, Some(3), 1, true)]
    #[case(Some(10), None, 25, true)]
    fn quantity_range_is_inclusive(
        #[case] min_quantity: Option<u32>,
        #[case] max_quantity: Option<u32>,
        #[case] quantity: u32,
        #[case] expected: bool,
    ) {
        let rule = RuleCondition::PurchaseQuantity {
            min_quantity,
            max_quantity,
        };
        assert_eq!(
            RuleEvaluator::new().condition_matches(&rule, &item(quantity), &shopper()),
            expected
        );
    }

    #[test]
    fn first_time_buyer_rule() {
        let evaluator = RuleEvaluator::new();
        let line = item(1);
        let gated = RuleCondition::FirstTimeBuyer {
            is_first_time_buyer: true,
        };
        let open = RuleCondition::FirstTimeBuyer {
            is_first_time_buyer: false,
        };
        let returning = user(UserRole::Customer, 3, dec!(120));

        assert!(evaluator.condition_matches(&gated, &line, &shopper()));
        assert!(!evaluator.condition_matches(&gated, &line, &returning));
        assert!(evaluator.condition_matches(&open, &line, &returning));
    }

    #[test]
    fn segment_rule_requires_every_constraint() {
        let evaluator = RuleEvaluator::new();
        let line = item(1);
        let rule = RuleCondition::CustomerSegment(SegmentCriteria {
            segment: Some("big-spenders".into()),
            customer_type: Some(CustomerType::Frequent),
            min_total_spend: Some(dec!(500)),
            max_prior_orders: Some(8),
            ..Default::default()
        });

        let matches = |shopper: UserContext| evaluator.condition_matches(&rule, &line, &shopper);

        assert!(matches(user(UserRole::Customer, 6, dec!(750))));
        // below spend threshold
        assert!(!matches(user(UserRole::Customer, 6, dec!(499))));
        // over the order ceiling
        assert!(!matches(user(UserRole::Customer, 9, dec!(900))));
        // vip is tiered as premium, not frequent
        assert!(!matches(user(UserRole::Vip, 6, dec!(900))));
    }

    #[test]
    fn segment_rule_for_new_customers() {
        let evaluator = RuleEvaluator::new();
        let rule = RuleCondition::CustomerSegment(SegmentCriteria {
            new_customers_only: true,
            ..Default::default()
        });
        assert!(evaluator.condition_matches(&rule, &item(1), &shopper()));
        assert!(!evaluator.condition_matches(
            &rule,
            &item(1),
            &user(UserRole::Customer, 1, dec!(10))
        ));
    }

    #[test]
    fn malformed_rule_fails_closed() {
        let rule = DiscountRule {
            id: Uuid::new_v4(),
            spec: RuleSpec::Malformed {
                rule_type: "product".into(),
                reason: "missing product_ids".into(),
            },
        };
        assert!(!RuleEvaluator::new().matches(&rule, &item(1), &shopper()));
    }

    #[test]
    fn rules_combine_with_and() {
        let evaluator = RuleEvaluator::new();
        let line = item(3);
        let product = DiscountRule::new(RuleCondition::Product {
            product_ids: BTreeSet::from([line.product_id]),
        });
        let bulk = DiscountRule::new(RuleCondition::PurchaseQuantity {
            min_quantity: Some(5),
            max_quantity: None,
        });

        assert!(evaluator.all_match(&[product.clone()], &line, &shopper()));
        assert!(!evaluator.all_match(&[product, bulk], &line, &shopper()));
        assert!(evaluator.all_match(&[], &line, &shopper()));
    }
}
