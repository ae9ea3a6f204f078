//! Property-based tests for discount evaluation.
//!
//! These tests use proptest to verify invariants across a wide range of inputs,
//! helping to catch edge cases that unit tests might miss.

mod common;

use common::{discount, item, Shop};
use proptest::prelude::*;
use rust_decimal::Decimal;
use storefront_checkout::errors::DiscountError;
use storefront_checkout::services::commerce::models::OrderItemSnapshot;
use storefront_checkout::services::discounts::model::{DiscountType, UserContext, UserRole};
use storefront_checkout::services::discounts::orchestrator::normalize_codes;
use storefront_checkout::services::discounts::PerItemDiscountCalculator;
use uuid::Uuid;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn price_strategy() -> impl Strategy<Value = Decimal> {
    (0i64..100_000).prop_map(|cents| Decimal::new(cents, 2))
}

fn code_strategy() -> impl Strategy<Value = String> {
    "[A-Z0-9]{4,10}"
}

fn user() -> UserContext {
    UserContext {
        user_id: Uuid::new_v4(),
        role: UserRole::Customer,
        total_orders: 1,
        total_spend: Decimal::new(2500, 2),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn any_unknown_code_fails_the_batch(
        known in prop::collection::btree_set(code_strategy(), 0..4),
        unknown in "[a-z]{3}-UNKNOWN",
        insert_at in 0usize..5,
    ) {
        let rt = runtime();
        let outcome = rt.block_on(async {
            let shop = Shop::new();
            for code in &known {
                shop.add_discount(discount(code, DiscountType::Percentage, Decimal::TEN)).await;
            }
            let mut codes: Vec<String> = known.iter().cloned().collect();
            let at = insert_at.min(codes.len());
            codes.insert(at, unknown.clone());
            shop.discounts.process(&[item(Decimal::ONE_HUNDRED, 1)], &user(), &codes).await
        });

        match outcome {
            Err(DiscountError::UnknownDiscountCode(code)) => {
                prop_assert_eq!(code, unknown.to_uppercase());
            }
            other => prop_assert!(false, "expected UnknownDiscountCode, got {:?}", other),
        }
    }

    #[test]
    fn at_most_one_exclusive_discount_is_applied(
        stackable in prop::collection::vec(any::<bool>(), 1..6),
    ) {
        let rt = runtime();
        let (outcome, exclusive_ids) = rt.block_on(async {
            let shop = Shop::new();
            let mut codes = Vec::new();
            let mut exclusive_ids = Vec::new();
            for (i, flag) in stackable.iter().enumerate() {
                let mut promo =
                    discount(&format!("CODE{}", i), DiscountType::FixedAmount, Decimal::ONE);
                promo.stackable = *flag;
                if !flag {
                    exclusive_ids.push(promo.id);
                }
                codes.push(promo.code.clone());
                shop.add_discount(promo).await;
            }
            let outcome = shop
                .discounts
                .process(&[item(Decimal::TEN, 1)], &user(), &codes)
                .await;
            (outcome, exclusive_ids)
        });

        match outcome {
            Ok(result) => {
                let applied_exclusive = result
                    .applied_discount_ids
                    .iter()
                    .filter(|id| exclusive_ids.contains(id))
                    .count();
                prop_assert!(applied_exclusive <= 1);
                prop_assert!(exclusive_ids.len() <= 1);
            }
            Err(DiscountError::StackingConflict { .. }) => prop_assert!(exclusive_ids.len() > 1),
            Err(other) => prop_assert!(false, "unexpected error {:?}", other),
        }
    }

    #[test]
    fn undiscounted_snapshot_keeps_line_total(
        unit_price in price_strategy(),
        quantity in 1u32..500,
    ) {
        let line = item(unit_price, quantity);
        let snapshot = OrderItemSnapshot::capture(&line, Decimal::ZERO);

        prop_assert_eq!(snapshot.discount_amount, Decimal::ZERO);
        prop_assert_eq!(snapshot.line_total - snapshot.discount_amount, snapshot.line_total);
        prop_assert_eq!(snapshot.line_total, line.line_total());
    }

    #[test]
    fn percentage_never_exceeds_line_total(
        unit_price in price_strategy(),
        quantity in 1u32..100,
        percent in 0u32..=100,
    ) {
        let line = item(unit_price, quantity);
        let amount = PerItemDiscountCalculator::new()
            .amount(&line, DiscountType::Percentage, Decimal::from(percent))
            .unwrap();

        prop_assert!(amount >= Decimal::ZERO);
        prop_assert!(amount <= line.line_total());
    }

    #[test]
    fn code_normalization_is_idempotent(
        codes in prop::collection::vec("[ a-zA-Z0-9]{0,8}", 0..8),
    ) {
        let once = normalize_codes(&codes);
        let twice = normalize_codes(&once);
        prop_assert_eq!(&once, &twice);
        prop_assert!(once.iter().all(|c| !c.is_empty() && c.trim() == c));
    }
}
