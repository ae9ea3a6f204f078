//! Storage contracts used by the pricing engine and checkout orchestrator,
//! with SeaORM-backed and in-memory implementations.

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::{ServiceError, UsageScope};
use crate::services::commerce::models::{
    CustomerProfile, NewOrder, OrderItemSnapshot, PersistedOrder, ShippingAddress,
};
use crate::services::discounts::model::{CartSnapshot, Discount};
use crate::services::payments::PaymentIntent;

pub mod checkout_lookup;
pub mod discount_repository;
pub mod memory;
pub mod order_repository;

pub use checkout_lookup::SeaOrmCheckoutLookup;
pub use discount_repository::SeaOrmDiscountRepository;
pub use memory::InMemoryStore;
pub use order_repository::SeaOrmOrderRepository;

/// Read access to discounts and their usage history.
#[async_trait]
pub trait DiscountRepository: Send + Sync {
    /// Loads the active discounts whose code is in `codes`, rules included.
    /// Codes are expected to be normalized already.
    async fn find_active_by_codes(&self, codes: &[String]) -> Result<Vec<Discount>, ServiceError>;

    /// Number of committed orders in which `user_id` used `discount_id`.
    async fn count_user_usages(&self, discount_id: Uuid, user_id: Uuid)
        -> Result<u64, ServiceError>;
}

/// Lookups into the customer, cart and address subsystems.
#[async_trait]
pub trait CheckoutLookup: Send + Sync {
    async fn find_customer(&self, user_id: Uuid) -> Result<Option<CustomerProfile>, ServiceError>;

    async fn find_cart(&self, cart_id: Uuid) -> Result<Option<CartSnapshot>, ServiceError>;

    async fn find_address(&self, address_id: Uuid)
        -> Result<Option<ShippingAddress>, ServiceError>;

    async fn find_default_address(
        &self,
        user_id: Uuid,
    ) -> Result<Option<ShippingAddress>, ServiceError>;
}

/// Failure of the atomic order write.
#[derive(Debug, thiserror::Error)]
pub enum OrderWriteError {
    #[error("discount {code} reached its {scope} usage limit")]
    UsageLimitReached { code: String, scope: UsageScope },

    #[error(transparent)]
    Storage(#[from] ServiceError),
}

/// Order persistence. Every write goes through a [`CheckoutUnit`], which is
/// either committed as a whole or rolled back as a whole.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn CheckoutUnit>, ServiceError>;

    async fn find_order(&self, order_id: Uuid) -> Result<Option<PersistedOrder>, ServiceError>;
}

/// One all-or-nothing checkout write. Dropping a unit without committing
/// discards everything written through it.
#[async_trait]
pub trait CheckoutUnit: Send {
    /// Writes the order, its item snapshots and applied-discount links, and
    /// bumps each discount's usage counter only while it is below its limit.
    async fn create_order_atomic(
        &mut self,
        order: &NewOrder,
        items: &[OrderItemSnapshot],
        applied_discount_ids: &[Uuid],
    ) -> Result<PersistedOrder, OrderWriteError>;

    async fn attach_payment_intent(
        &mut self,
        order_id: Uuid,
        intent: &PaymentIntent,
    ) -> Result<(), ServiceError>;

    async fn commit(self: Box<Self>) -> Result<(), ServiceError>;

    async fn rollback(self: Box<Self>) -> Result<(), ServiceError>;
}
