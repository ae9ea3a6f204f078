//! SeaORM entities for discounts, orders and the storefront tables read at
//! checkout.

pub mod commerce;
pub mod discount;
pub mod discount_rule;
pub mod discount_usage;
pub mod order;
pub mod order_discount;
pub mod order_item;
