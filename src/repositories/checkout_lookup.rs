use async_trait::async_trait;
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use std::sync::Arc;
use uuid::Uuid;

use super::CheckoutLookup;
use crate::entities::commerce::{cart, cart_item, customer, customer_address};
use crate::entities::order;
use crate::errors::ServiceError;
use crate::services::commerce::models::{CustomerProfile, ShippingAddress, COMPLETED_ORDER_STATUSES};
use crate::services::discounts::model::{CartSnapshot, UserRole};

/// Reads customers, carts and addresses from the storefront tables.
#[derive(Debug, Clone)]
pub struct SeaOrmCheckoutLookup {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmCheckoutLookup {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CheckoutLookup for SeaOrmCheckoutLookup {
    async fn find_customer(&self, user_id: Uuid) -> Result<Option<CustomerProfile>, ServiceError> {
        let Some(model) = customer::Entity::find_by_id(user_id).one(&*self.db).await? else {
            return Ok(None);
        };

        let completed = order::Entity::find()
            .filter(order::Column::UserId.eq(user_id))
            .filter(order::Column::Status.is_in(COMPLETED_ORDER_STATUSES))
            .all(&*self.db)
            .await?;

        let total_spend = completed.iter().map(|o| o.total).sum::<Decimal>();

        Ok(Some(CustomerProfile {
            id: model.id,
            email: model.email,
            role: UserRole::parse_lenient(&model.role),
            total_orders: u32::try_from(completed.len()).unwrap_or(u32::MAX),
            total_spend,
        }))
    }

    async fn find_cart(&self, cart_id: Uuid) -> Result<Option<CartSnapshot>, ServiceError> {
        let Some(model) = cart::Entity::find_by_id(cart_id).one(&*self.db).await? else {
            return Ok(None);
        };

        let items = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .order_by_asc(cart_item::Column::Position)
            .all(&*self.db)
            .await?;

        Ok(Some(CartSnapshot {
            id: model.id,
            user_id: model.customer_id,
            currency: model.currency,
            items: items.iter().map(cart_item::Model::snapshot).collect(),
        }))
    }

    async fn find_address(
        &self,
        address_id: Uuid,
    ) -> Result<Option<ShippingAddress>, ServiceError> {
        Ok(customer_address::Entity::find_by_id(address_id)
            .one(&*self.db)
            .await?
            .map(ShippingAddress::from))
    }

    async fn find_default_address(
        &self,
        user_id: Uuid,
    ) -> Result<Option<ShippingAddress>, ServiceError> {
        Ok(customer_address::Entity::find()
            .filter(customer_address::Column::CustomerId.eq(user_id))
            .filter(customer_address::Column::IsDefaultShipping.eq(true))
            .order_by_asc(customer_address::Column::CreatedAt)
            .one(&*self.db)
            .await?
            .map(ShippingAddress::from))
    }
}
