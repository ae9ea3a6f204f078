use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::discounts::model::{CartItemSnapshot, UserContext, UserRole};

pub const ORDER_STATUS_PENDING: &str = "pending";
pub const PAYMENT_STATUS_AWAITING: &str = "awaiting_payment";

/// Order statuses counted as prior completed orders when profiling a customer.
pub const COMPLETED_ORDER_STATUSES: [&str; 2] = ["completed", "delivered"];

/// Customer data needed at checkout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerProfile {
    pub id: Uuid,
    pub email: String,
    pub role: UserRole,
    pub total_orders: u32,
    pub total_spend: Decimal,
}

impl CustomerProfile {
    pub fn context(&self) -> UserContext {
        UserContext {
            user_id: self.id,
            role: self.role,
            total_orders: self.total_orders,
            total_spend: self.total_spend,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: Option<String>,
    pub address_line_1: String,
    pub address_line_2: Option<String>,
    pub city: String,
    pub province: String,
    pub country_code: String,
    pub postal_code: String,
    pub is_default: bool,
}

/// Immutable copy of a cart line taken at checkout time. Later catalog edits
/// never reach it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItemSnapshot {
    pub product_id: Uuid,
    pub product_name: String,
    pub sku: String,
    pub unit_price: Decimal,
    pub quantity: u32,
    pub line_total: Decimal,
    pub discount_amount: Decimal,
    pub attributes: serde_json::Value,
}

impl OrderItemSnapshot {
    pub fn capture(item: &CartItemSnapshot, discount_amount: Decimal) -> Self {
        Self {
            product_id: item.product_id,
            product_name: item.product_name.clone(),
            sku: item.sku.clone(),
            unit_price: item.unit_price,
            quantity: item.quantity,
            line_total: item.line_total(),
            discount_amount,
            attributes: item.attributes.clone(),
        }
    }

    pub fn net_total(&self) -> Decimal {
        self.line_total - self.discount_amount
    }
}

/// Order header as handed to the repository for the atomic write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrder {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: Uuid,
    pub cart_id: Uuid,
    pub shipping_address_id: Uuid,
    pub payment_method_id: String,
    pub currency: String,
    pub subtotal: Decimal,
    pub discount_total: Decimal,
    pub total: Decimal,
    pub free_shipping: bool,
    pub created_at: DateTime<Utc>,
}

impl NewOrder {
    pub fn order_number_for(id: Uuid) -> String {
        let simple = id.simple().to_string();
        format!("ORD-{}", simple.get(..8).unwrap_or(&simple).to_uppercase())
    }
}

/// Order header as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: Uuid,
    pub cart_id: Uuid,
    pub shipping_address_id: Uuid,
    pub payment_method_id: String,
    pub status: String,
    pub payment_status: String,
    pub currency: String,
    pub subtotal: Decimal,
    pub discount_total: Decimal,
    pub total: Decimal,
    pub free_shipping: bool,
    pub payment_intent_id: Option<String>,
    pub payment_client_secret: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl OrderRecord {
    pub fn pending(order: &NewOrder) -> Self {
        Self {
            id: order.id,
            order_number: order.order_number.clone(),
            user_id: order.user_id,
            cart_id: order.cart_id,
            shipping_address_id: order.shipping_address_id,
            payment_method_id: order.payment_method_id.clone(),
            status: ORDER_STATUS_PENDING.to_string(),
            payment_status: PAYMENT_STATUS_AWAITING.to_string(),
            currency: order.currency.clone(),
            subtotal: order.subtotal,
            discount_total: order.discount_total,
            total: order.total,
            free_shipping: order.free_shipping,
            payment_intent_id: None,
            payment_client_secret: None,
            created_at: order.created_at,
        }
    }
}

/// An order together with its line snapshots and applied discounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedOrder {
    pub order: OrderRecord,
    pub items: Vec<OrderItemSnapshot>,
    pub applied_discount_ids: Vec<Uuid>,
}

/// Successful checkout outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCreated {
    pub order_id: Uuid,
    pub order_number: String,
    pub total_price: Decimal,
    pub discount_total: Decimal,
    pub currency: String,
    pub payment_intent_id: String,
    pub client_secret: Option<String>,
    pub applied_discount_ids: Vec<Uuid>,
}
