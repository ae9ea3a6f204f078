//! Discount evaluation through the public `DiscountService` API.

mod common;

use std::collections::BTreeSet;

use assert_matches::assert_matches;
use common::{discount, item, with_rule, Shop};
use rstest::rstest;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use storefront_checkout::errors::DiscountError;
use storefront_checkout::services::discounts::model::{
    CartSnapshot, CustomerType, DiscountRule, DiscountType, RuleCondition, SegmentCriteria,
    UserContext, UserRole,
};
use uuid::Uuid;

fn shopper(role: UserRole, total_orders: u32, total_spend: Decimal) -> UserContext {
    UserContext {
        user_id: Uuid::new_v4(),
        role,
        total_orders,
        total_spend,
    }
}

fn cart(items: Vec<storefront_checkout::services::discounts::CartItemSnapshot>) -> CartSnapshot {
    CartSnapshot {
        id: Uuid::new_v4(),
        user_id: None,
        currency: "USD".into(),
        items,
    }
}

#[tokio::test]
async fn stackable_discounts_add_up_per_item() {
    let shop = Shop::new();
    let shoes = Uuid::new_v4();
    let mut boots = item(dec!(60.00), 1);
    boots.category_ids = BTreeSet::from([shoes]);
    let socks = item(dec!(10.00), 2);

    shop.add_discount(discount("ALL10", DiscountType::Percentage, dec!(10)))
        .await;
    let shoe_promo = shop
        .add_discount(with_rule(
            discount("SHOES5", DiscountType::FixedAmount, dec!(5)),
            RuleCondition::Category {
                category_ids: BTreeSet::from([shoes]),
            },
        ))
        .await;

    let quote = shop
        .discounts
        .quote(
            &cart(vec![boots, socks]),
            &shopper(UserRole::Customer, 2, dec!(80)),
            &["all10".into(), "shoes5".into()],
        )
        .await
        .unwrap();

    assert_eq!(quote.subtotal, dec!(80.00));
    // 6.00 + 2.00 from ALL10, 5.00 from SHOES5 on the boots only
    assert_eq!(quote.discount_total, dec!(13.00));
    assert_eq!(quote.total, dec!(67.00));
    assert_eq!(quote.result.discount_for_item(0), dec!(11.00));
    assert_eq!(quote.result.discount_for_item(1), dec!(2.00));
    assert!(quote
        .result
        .item_discounts
        .iter()
        .filter(|d| d.discount_id == shoe_promo)
        .all(|d| d.item_index == 0));
}

#[tokio::test]
async fn free_shipping_sets_flag_without_item_amounts() {
    let shop = Shop::new();
    let ship = shop
        .add_discount(discount("SHIPFREE", DiscountType::FreeShipping, dec!(0)))
        .await;

    let result = shop
        .discounts
        .process(
            &[item(dec!(15.00), 1)],
            &shopper(UserRole::Customer, 0, dec!(0)),
            &["SHIPFREE".into()],
        )
        .await
        .unwrap();

    assert!(result.free_shipping);
    assert!(result.item_discounts.is_empty());
    assert_eq!(result.total_discount, dec!(0));
    assert_eq!(result.applied_discount_ids, vec![ship]);
}

#[tokio::test]
async fn malformed_stored_rule_fails_closed() {
    let shop = Shop::new();
    let mut broken = discount("BROKEN", DiscountType::Percentage, dec!(50));
    broken.rules.push(DiscountRule::from_stored(
        Uuid::new_v4(),
        "purchase_quantity",
        &json!({"min_quantity": 5, "max_quantity": 2}),
    ));
    let id = shop.add_discount(broken).await;

    let result = shop
        .discounts
        .process(
            &[item(dec!(10.00), 3)],
            &shopper(UserRole::Customer, 0, dec!(0)),
            &["BROKEN".into()],
        )
        .await
        .unwrap();

    assert!(result.item_discounts.is_empty());
    assert_eq!(result.applied_discount_ids, vec![id]);
}

#[tokio::test]
async fn codes_are_trimmed_and_deduplicated() {
    let shop = Shop::new();
    let id = shop
        .add_discount(discount("SAVE5", DiscountType::FixedAmount, dec!(5)))
        .await;

    let result = shop
        .discounts
        .process(
            &[item(dec!(20.00), 1)],
            &shopper(UserRole::Customer, 0, dec!(0)),
            &[" save5 ".into(), "SAVE5".into(), "   ".into()],
        )
        .await
        .unwrap();

    assert_eq!(result.applied_discount_ids, vec![id]);
    assert_eq!(result.total_discount, dec!(5));
}

#[tokio::test]
async fn inactive_code_is_unknown() {
    let shop = Shop::new();
    let mut retired = discount("RETIRED", DiscountType::Percentage, dec!(30));
    retired.is_active = false;
    shop.add_discount(retired).await;

    assert_matches!(
        shop.discounts
            .process(
                &[item(dec!(20.00), 1)],
                &shopper(UserRole::Customer, 0, dec!(0)),
                &["RETIRED".into()],
            )
            .await,
        Err(DiscountError::UnknownDiscountCode(code)) if code == "RETIRED"
    );
}

#[tokio::test]
async fn misconfigured_percentage_is_rejected() {
    let shop = Shop::new();
    shop.add_discount(discount("TOOMUCH", DiscountType::Percentage, dec!(150)))
        .await;

    let outcome = shop
        .discounts
        .process(
            &[item(dec!(20.00), 1)],
            &shopper(UserRole::Customer, 0, dec!(0)),
            &["TOOMUCH".into()],
        )
        .await;
    assert_matches!(outcome, Err(DiscountError::InvalidDiscount { .. }));
}

#[rstest]
#[case(UserRole::Customer, 0, CustomerType::New, true)]
#[case(UserRole::Customer, 3, CustomerType::Regular, true)]
#[case(UserRole::Customer, 4, CustomerType::Regular, false)]
#[case(UserRole::Customer, 11, CustomerType::Loyal, true)]
#[case(UserRole::Vip, 0, CustomerType::Premium, true)]
#[case(UserRole::Vip, 0, CustomerType::New, false)]
#[case(UserRole::Moderator, 20, CustomerType::Staff, true)]
#[tokio::test]
async fn segment_rule_follows_customer_tiering(
    #[case] role: UserRole,
    #[case] total_orders: u32,
    #[case] wanted: CustomerType,
    #[case] applies: bool,
) {
    let shop = Shop::new();
    shop.add_discount(with_rule(
        discount("TIER", DiscountType::Percentage, dec!(10)),
        RuleCondition::CustomerSegment(SegmentCriteria {
            customer_type: Some(wanted),
            ..SegmentCriteria::default()
        }),
    ))
    .await;

    let result = shop
        .discounts
        .process(
            &[item(dec!(100.00), 1)],
            &shopper(role, total_orders, dec!(0)),
            &["TIER".into()],
        )
        .await
        .unwrap();

    let expected = if applies { dec!(10.00) } else { dec!(0) };
    assert_eq!(result.total_discount, expected);
}

#[tokio::test]
async fn segment_min_spend_and_order_cap() {
    let shop = Shop::new();
    shop.add_discount(with_rule(
        discount("BIGSPENDER", DiscountType::FixedAmount, dec!(7)),
        RuleCondition::CustomerSegment(SegmentCriteria {
            min_total_spend: Some(dec!(500)),
            max_prior_orders: Some(5),
            ..SegmentCriteria::default()
        }),
    ))
    .await;
    let items = [item(dec!(30.00), 1)];
    let codes = ["BIGSPENDER".to_string()];

    let eligible = shop
        .discounts
        .process(&items, &shopper(UserRole::Customer, 5, dec!(500)), &codes)
        .await
        .unwrap();
    assert_eq!(eligible.total_discount, dec!(7));

    let too_many_orders = shop
        .discounts
        .process(&items, &shopper(UserRole::Customer, 6, dec!(900)), &codes)
        .await
        .unwrap();
    assert_eq!(too_many_orders.total_discount, dec!(0));

    let low_spend = shop
        .discounts
        .process(&items, &shopper(UserRole::Customer, 1, dec!(499.99)), &codes)
        .await
        .unwrap();
    assert_eq!(low_spend.total_discount, dec!(0));
}

#[tokio::test]
async fn evaluation_is_repeatable() {
    let shop = Shop::new();
    let brand = Uuid::new_v4();
    let mut branded = item(dec!(12.50), 4);
    branded.brand_id = Some(brand);
    shop.add_discount(with_rule(
        discount("BRAND", DiscountType::Percentage, dec!(15)),
        RuleCondition::Brand {
            brand_ids: BTreeSet::from([brand]),
        },
    ))
    .await;
    shop.add_discount(with_rule(
        discount("BULK", DiscountType::FixedAmount, dec!(2)),
        RuleCondition::PurchaseQuantity {
            min_quantity: Some(3),
            max_quantity: None,
        },
    ))
    .await;

    let items = vec![branded, item(dec!(1.00), 1)];
    let user = shopper(UserRole::Customer, 1, dec!(20));
    let codes = vec!["BRAND".to_string(), "BULK".to_string()];

    let first = shop.discounts.process(&items, &user, &codes).await.unwrap();
    let second = shop.discounts.process(&items, &user, &codes).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.total_discount, dec!(9.50));
}
