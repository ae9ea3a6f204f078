//! In-process store implementing every repository trait.
//!
//! A [`CheckoutUnit`] from this store holds the store lock from `begin` until
//! it is committed or rolled back, so concurrent checkouts are serialized the
//! same way a row lock on the discount would serialize them. Writes are
//! staged on the unit and only applied on commit.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{CheckoutLookup, CheckoutUnit, DiscountRepository, OrderRepository, OrderWriteError};
use crate::errors::{ServiceError, UsageScope};
use crate::services::commerce::models::{
    CustomerProfile, NewOrder, OrderItemSnapshot, OrderRecord, PersistedOrder, ShippingAddress,
};
use crate::services::discounts::model::{normalize_code, CartSnapshot, Discount};
use crate::services::payments::PaymentIntent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct UsageRecord {
    discount_id: Uuid,
    user_id: Uuid,
    order_id: Uuid,
}

#[derive(Debug, Default)]
struct StoreState {
    discounts: HashMap<Uuid, Discount>,
    usages: Vec<UsageRecord>,
    customers: HashMap<Uuid, CustomerProfile>,
    carts: HashMap<Uuid, CartSnapshot>,
    addresses: HashMap<Uuid, ShippingAddress>,
    orders: HashMap<Uuid, PersistedOrder>,
    fail_next_write: bool,
    fail_next_commit: bool,
}

impl StoreState {
    fn committed_usages(&self, discount_id: Uuid, user_id: Uuid) -> u64 {
        self.usages
            .iter()
            .filter(|u| u.discount_id == discount_id && u.user_id == user_id)
            .count() as u64
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_discount(&self, discount: Discount) {
        self.state.lock().await.discounts.insert(discount.id, discount);
    }

    pub async fn insert_customer(&self, customer: CustomerProfile) {
        self.state.lock().await.customers.insert(customer.id, customer);
    }

    pub async fn insert_cart(&self, cart: CartSnapshot) {
        self.state.lock().await.carts.insert(cart.id, cart);
    }

    pub async fn insert_address(&self, address: ShippingAddress) {
        self.state.lock().await.addresses.insert(address.id, address);
    }

    /// Records a prior use of a discount by a user, as an earlier order would.
    pub async fn record_usage(&self, discount_id: Uuid, user_id: Uuid) {
        self.state.lock().await.usages.push(UsageRecord {
            discount_id,
            user_id,
            order_id: Uuid::new_v4(),
        });
    }

    pub async fn discount(&self, discount_id: Uuid) -> Option<Discount> {
        self.state.lock().await.discounts.get(&discount_id).cloned()
    }

    pub async fn orders(&self) -> Vec<PersistedOrder> {
        let state = self.state.lock().await;
        let mut orders: Vec<_> = state.orders.values().cloned().collect();
        orders.sort_by_key(|o| o.order.created_at);
        orders
    }

    pub async fn order_count(&self) -> usize {
        self.state.lock().await.orders.len()
    }

    /// Makes the next `create_order_atomic` fail with a storage error.
    pub async fn fail_next_write(&self) {
        self.state.lock().await.fail_next_write = true;
    }

    /// Makes the next commit fail after all writes were staged.
    pub async fn fail_next_commit(&self) {
        self.state.lock().await.fail_next_commit = true;
    }
}

#[async_trait]
impl DiscountRepository for InMemoryStore {
    async fn find_active_by_codes(&self, codes: &[String]) -> Result<Vec<Discount>, ServiceError> {
        let state = self.state.lock().await;
        Ok(state
            .discounts
            .values()
            .filter(|d| d.is_active && codes.contains(&normalize_code(&d.code)))
            .cloned()
            .collect())
    }

    async fn count_user_usages(
        &self,
        discount_id: Uuid,
        user_id: Uuid,
    ) -> Result<u64, ServiceError> {
        Ok(self.state.lock().await.committed_usages(discount_id, user_id))
    }
}

#[async_trait]
impl CheckoutLookup for InMemoryStore {
    async fn find_customer(&self, user_id: Uuid) -> Result<Option<CustomerProfile>, ServiceError> {
        Ok(self.state.lock().await.customers.get(&user_id).cloned())
    }

    async fn find_cart(&self, cart_id: Uuid) -> Result<Option<CartSnapshot>, ServiceError> {
        Ok(self.state.lock().await.carts.get(&cart_id).cloned())
    }

    async fn find_address(
        &self,
        address_id: Uuid,
    ) -> Result<Option<ShippingAddress>, ServiceError> {
        Ok(self.state.lock().await.addresses.get(&address_id).cloned())
    }

    async fn find_default_address(
        &self,
        user_id: Uuid,
    ) -> Result<Option<ShippingAddress>, ServiceError> {
        let state = self.state.lock().await;
        Ok(state
            .addresses
            .values()
            .find(|a| a.user_id == user_id && a.is_default)
            .cloned())
    }
}

#[async_trait]
impl OrderRepository for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn CheckoutUnit>, ServiceError> {
        let guard = self.state.clone().lock_owned().await;
        Ok(Box::new(MemoryCheckoutUnit {
            guard,
            orders: Vec::new(),
            usages: Vec::new(),
            bumps: Vec::new(),
        }))
    }

    async fn find_order(&self, order_id: Uuid) -> Result<Option<PersistedOrder>, ServiceError> {
        Ok(self.state.lock().await.orders.get(&order_id).cloned())
    }
}

/// Staged writes over a locked store.
pub struct MemoryCheckoutUnit {
    guard: OwnedMutexGuard<StoreState>,
    orders: Vec<PersistedOrder>,
    usages: Vec<UsageRecord>,
    bumps: Vec<Uuid>,
}

impl MemoryCheckoutUnit {
    fn staged_bumps(&self, discount_id: Uuid) -> u32 {
        self.bumps.iter().filter(|id| **id == discount_id).count() as u32
    }

    fn staged_usages(&self, discount_id: Uuid, user_id: Uuid) -> u64 {
        self.usages
            .iter()
            .filter(|u| u.discount_id == discount_id && u.user_id == user_id)
            .count() as u64
    }
}

#[async_trait]
impl CheckoutUnit for MemoryCheckoutUnit {
    async fn create_order_atomic(
        &mut self,
        order: &NewOrder,
        items: &[OrderItemSnapshot],
        applied_discount_ids: &[Uuid],
    ) -> Result<PersistedOrder, OrderWriteError> {
        if std::mem::take(&mut self.guard.fail_next_write) {
            return Err(ServiceError::database_error_message("order write failed").into());
        }

        let mut bumps = Vec::with_capacity(applied_discount_ids.len());
        let mut usages = Vec::with_capacity(applied_discount_ids.len());
        for discount_id in applied_discount_ids {
            let discount = self.guard.discounts.get(discount_id).ok_or_else(|| {
                ServiceError::NotFound(format!("Discount {} not found", discount_id))
            })?;

            let used = discount.times_used + self.staged_bumps(*discount_id);
            if discount.usage_limit.map_or(false, |limit| used >= limit) {
                return Err(OrderWriteError::UsageLimitReached {
                    code: discount.code.clone(),
                    scope: UsageScope::Global,
                });
            }

            if let Some(limit) = discount.per_user_limit {
                let prior = self.guard.committed_usages(*discount_id, order.user_id)
                    + self.staged_usages(*discount_id, order.user_id);
                if prior >= u64::from(limit) {
                    return Err(OrderWriteError::UsageLimitReached {
                        code: discount.code.clone(),
                        scope: UsageScope::PerUser,
                    });
                }
            }

            bumps.push(*discount_id);
            usages.push(UsageRecord {
                discount_id: *discount_id,
                user_id: order.user_id,
                order_id: order.id,
            });
        }

        let persisted = PersistedOrder {
            order: OrderRecord::pending(order),
            items: items.to_vec(),
            applied_discount_ids: applied_discount_ids.to_vec(),
        };
        self.bumps.extend(bumps);
        self.usages.extend(usages);
        self.orders.push(persisted.clone());
        Ok(persisted)
    }

    async fn attach_payment_intent(
        &mut self,
        order_id: Uuid,
        intent: &PaymentIntent,
    ) -> Result<(), ServiceError> {
        let staged = self
            .orders
            .iter_mut()
            .find(|o| o.order.id == order_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        staged.order.payment_intent_id = Some(intent.id.clone());
        staged.order.payment_client_secret = intent.client_secret.clone();
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), ServiceError> {
        let MemoryCheckoutUnit {
            mut guard,
            orders,
            usages,
            bumps,
        } = *self;

        if std::mem::take(&mut guard.fail_next_commit) {
            return Err(ServiceError::database_error_message("commit failed"));
        }

        for discount_id in bumps {
            if let Some(discount) = guard.discounts.get_mut(&discount_id) {
                discount.times_used += 1;
            }
        }
        guard.usages.extend(usages);
        for order in orders {
            guard.orders.insert(order.order.id, order);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), ServiceError> {
        Ok(())
    }
}
