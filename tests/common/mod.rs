#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use storefront_checkout::clock::{Clock, FixedClock};
use storefront_checkout::events::{self, Event};
use storefront_checkout::repositories::InMemoryStore;
use storefront_checkout::services::commerce::models::{CustomerProfile, ShippingAddress};
use storefront_checkout::services::commerce::{CheckoutRequest, CheckoutService, CheckoutSettings};
use storefront_checkout::services::discounts::model::{
    CartItemSnapshot, CartSnapshot, Discount, DiscountRule, DiscountType, RuleCondition, UserRole,
};
use storefront_checkout::services::discounts::DiscountService;
use storefront_checkout::services::payments::{
    PaymentGatewayClient, PaymentGatewayError, PaymentIntent, PaymentIntentRequest,
};
use tokio::sync::mpsc;
use uuid::Uuid;

pub fn start_of_june() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
}

/// What the fake gateway does with the next intent requests.
#[derive(Debug, Clone)]
pub enum GatewayBehavior {
    Succeed,
    Fail(PaymentGatewayError),
    Delay(Duration),
}

/// Payment gateway double that records every call.
#[derive(Debug)]
pub struct FakeGateway {
    behavior: Mutex<GatewayBehavior>,
    created: AtomicUsize,
    requests: Mutex<Vec<PaymentIntentRequest>>,
    cancelled: Mutex<Vec<String>>,
}

impl FakeGateway {
    pub fn new(behavior: GatewayBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            created: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
        }
    }

    pub fn set_behavior(&self, behavior: GatewayBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<PaymentIntentRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGatewayClient for FakeGateway {
    async fn create_payment_intent(
        &self,
        request: PaymentIntentRequest,
    ) -> Result<PaymentIntent, PaymentGatewayError> {
        self.requests.lock().unwrap().push(request);
        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            GatewayBehavior::Fail(err) => return Err(err),
            GatewayBehavior::Delay(delay) => tokio::time::sleep(delay).await,
            GatewayBehavior::Succeed => {}
        }
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PaymentIntent {
            id: format!("pi_test_{}", n),
            client_secret: Some(format!("pi_test_{}_secret", n)),
            status: "requires_payment_method".into(),
        })
    }

    async fn cancel_payment_intent(&self, intent_id: String) -> Result<(), PaymentGatewayError> {
        self.cancelled.lock().unwrap().push(intent_id);
        Ok(())
    }
}

/// A storefront backed by the in-memory store and the fake gateway.
pub struct Shop {
    pub store: InMemoryStore,
    pub gateway: Arc<FakeGateway>,
    pub clock: FixedClock,
    pub service: CheckoutService,
    pub discounts: DiscountService,
    pub events: mpsc::Receiver<Event>,
}

impl Shop {
    pub fn new() -> Self {
        Self::with_settings(CheckoutSettings::default())
    }

    pub fn with_settings(settings: CheckoutSettings) -> Self {
        let store = InMemoryStore::new();
        let gateway = Arc::new(FakeGateway::new(GatewayBehavior::Succeed));
        let clock = FixedClock::new(start_of_june());
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let (sender, events) = events::channel(256);

        let discounts = DiscountService::new(Arc::new(store.clone()), shared_clock.clone());
        let service = CheckoutService::new(
            Arc::new(store.clone()),
            discounts.clone(),
            Arc::new(store.clone()),
            gateway.clone(),
            shared_clock,
            Arc::new(sender),
            settings,
        );

        Self {
            store,
            gateway,
            clock,
            service,
            discounts,
            events,
        }
    }

    /// Adds a customer with a default shipping address.
    pub async fn add_customer(&self, total_orders: u32) -> Uuid {
        let id = Uuid::new_v4();
        self.store
            .insert_customer(CustomerProfile {
                id,
                email: format!("{}@example.com", id.simple()),
                role: UserRole::Customer,
                total_orders,
                total_spend: Decimal::from(total_orders) * Decimal::from(40),
            })
            .await;
        self.store
            .insert_address(ShippingAddress {
                id: Uuid::new_v4(),
                user_id: id,
                name: None,
                address_line_1: "500 Market St".into(),
                address_line_2: None,
                city: "San Francisco".into(),
                province: "CA".into(),
                country_code: "US".into(),
                postal_code: "94105".into(),
                is_default: true,
            })
            .await;
        id
    }

    pub async fn add_cart(&self, user_id: Uuid, items: Vec<CartItemSnapshot>) -> Uuid {
        let id = Uuid::new_v4();
        self.store
            .insert_cart(CartSnapshot {
                id,
                user_id: Some(user_id),
                currency: "USD".into(),
                items,
            })
            .await;
        id
    }

    pub async fn add_discount(&self, discount: Discount) -> Uuid {
        let id = discount.id;
        self.store.insert_discount(discount).await;
        id
    }

    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut seen = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            seen.push(event);
        }
        seen
    }
}

pub fn request(user_id: Uuid, cart_id: Uuid, codes: &[&str]) -> CheckoutRequest {
    CheckoutRequest {
        user_id,
        cart_id,
        address_id: None,
        payment_method_id: "pm_card_visa".into(),
        discount_codes: codes.iter().map(|c| c.to_string()).collect(),
    }
}

pub fn item(unit_price: Decimal, quantity: u32) -> CartItemSnapshot {
    CartItemSnapshot {
        product_id: Uuid::new_v4(),
        category_ids: BTreeSet::new(),
        brand_id: None,
        quantity,
        unit_price,
        product_name: "Widget".into(),
        sku: format!("SKU-{}", quantity),
        attributes: serde_json::json!({}),
    }
}

/// Stackable, unlimited discount valid since the start of 2024.
pub fn discount(code: &str, discount_type: DiscountType, value: Decimal) -> Discount {
    Discount {
        id: Uuid::new_v4(),
        code: code.into(),
        discount_type,
        value,
        starts_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ends_at: None,
        stackable: true,
        usage_limit: None,
        per_user_limit: None,
        times_used: 0,
        is_active: true,
        rules: vec![],
    }
}

pub fn with_rule(mut discount: Discount, condition: RuleCondition) -> Discount {
    discount.rules.push(DiscountRule::new(condition));
    discount
}
