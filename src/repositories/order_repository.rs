//! Order persistence over a SeaORM transaction.
//!
//! The usage counter of each applied discount is bumped with a single
//! conditional `UPDATE ... WHERE usage_limit IS NULL OR times_used <
//! usage_limit`; zero affected rows means another checkout took the last
//! use. The per-user count is read after that update, inside the same
//! transaction. Discounts are claimed in ascending id order.

use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use sea_orm::sea_query::{Condition, Expr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{CheckoutUnit, OrderRepository, OrderWriteError};
use crate::entities::{discount, discount_usage, order, order_discount, order_item};
use crate::errors::{ServiceError, UsageScope};
use crate::services::commerce::models::{
    NewOrder, OrderItemSnapshot, OrderRecord, PersistedOrder, ORDER_STATUS_PENDING,
    PAYMENT_STATUS_AWAITING,
};
use crate::services::payments::PaymentIntent;

#[derive(Debug, Clone)]
pub struct SeaOrmOrderRepository {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmOrderRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

impl From<order::Model> for OrderRecord {
    fn from(model: order::Model) -> Self {
        Self {
            id: model.id,
            order_number: model.order_number,
            user_id: model.user_id,
            cart_id: model.cart_id,
            shipping_address_id: model.shipping_address_id,
            payment_method_id: model.payment_method_id,
            status: model.status,
            payment_status: model.payment_status,
            currency: model.currency,
            subtotal: model.subtotal,
            discount_total: model.discount_total,
            total: model.total,
            free_shipping: model.free_shipping,
            payment_intent_id: model.payment_intent_id,
            payment_client_secret: model.payment_client_secret,
            created_at: model.created_at,
        }
    }
}

impl From<order_item::Model> for OrderItemSnapshot {
    fn from(model: order_item::Model) -> Self {
        Self {
            product_id: model.product_id,
            product_name: model.product_name,
            sku: model.sku,
            unit_price: model.unit_price,
            quantity: u32::try_from(model.quantity).unwrap_or(0),
            line_total: model.line_total,
            discount_amount: model.discount_amount,
            attributes: model.attributes,
        }
    }
}

fn position(index: usize) -> Result<i32, ServiceError> {
    i32::try_from(index).map_err(|_| ServiceError::ValidationError("too many rows".into()))
}

#[async_trait]
impl OrderRepository for SeaOrmOrderRepository {
    async fn begin(&self) -> Result<Box<dyn CheckoutUnit>, ServiceError> {
        let txn = self.db.begin().await?;
        counter!("checkout_db.transaction.started", 1);
        Ok(Box::new(SeaOrmCheckoutUnit { txn }))
    }

    async fn find_order(&self, order_id: Uuid) -> Result<Option<PersistedOrder>, ServiceError> {
        let Some(model) = order::Entity::find_by_id(order_id).one(&*self.db).await? else {
            return Ok(None);
        };

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::Position)
            .all(&*self.db)
            .await?;
        let applied = order_discount::Entity::find()
            .filter(order_discount::Column::OrderId.eq(order_id))
            .order_by_asc(order_discount::Column::Position)
            .all(&*self.db)
            .await?;

        Ok(Some(PersistedOrder {
            order: model.into(),
            items: items.into_iter().map(OrderItemSnapshot::from).collect(),
            applied_discount_ids: applied.into_iter().map(|d| d.discount_id).collect(),
        }))
    }
}

/// Open database transaction for one checkout.
pub struct SeaOrmCheckoutUnit {
    txn: DatabaseTransaction,
}

impl SeaOrmCheckoutUnit {
    async fn claim_usage(
        &self,
        discount_id: Uuid,
        order: &NewOrder,
    ) -> Result<(), OrderWriteError> {
        let bumped = discount::Entity::update_many()
            .col_expr(
                discount::Column::TimesUsed,
                Expr::col(discount::Column::TimesUsed).add(1),
            )
            .col_expr(discount::Column::UpdatedAt, Expr::value(order.created_at))
            .filter(discount::Column::Id.eq(discount_id))
            .filter(
                Condition::any()
                    .add(discount::Column::UsageLimit.is_null())
                    .add(
                        Expr::col(discount::Column::TimesUsed)
                            .lt(Expr::col(discount::Column::UsageLimit)),
                    ),
            )
            .exec(&self.txn)
            .await
            .map_err(ServiceError::from)?;

        let current = discount::Entity::find_by_id(discount_id)
            .one(&self.txn)
            .await
            .map_err(ServiceError::from)?
            .ok_or_else(|| ServiceError::NotFound(format!("Discount {} not found", discount_id)))?;

        if bumped.rows_affected == 0 {
            debug!(code = %current.code, "usage counter already at limit");
            return Err(OrderWriteError::UsageLimitReached {
                code: current.code,
                scope: UsageScope::Global,
            });
        }

        if let Some(limit) = current.per_user_limit {
            let prior = discount_usage::Entity::find()
                .filter(discount_usage::Column::DiscountId.eq(discount_id))
                .filter(discount_usage::Column::UserId.eq(order.user_id))
                .count(&self.txn)
                .await
                .map_err(ServiceError::from)?;
            if prior >= u64::try_from(limit).unwrap_or(0) {
                return Err(OrderWriteError::UsageLimitReached {
                    code: current.code,
                    scope: UsageScope::PerUser,
                });
            }
        }

        discount_usage::ActiveModel {
            id: Set(Uuid::new_v4()),
            discount_id: Set(discount_id),
            user_id: Set(order.user_id),
            order_id: Set(order.id),
            used_at: Set(order.created_at),
        }
        .insert(&self.txn)
        .await
        .map_err(ServiceError::from)?;

        Ok(())
    }
}

#[async_trait]
impl CheckoutUnit for SeaOrmCheckoutUnit {
    async fn create_order_atomic(
        &mut self,
        order: &NewOrder,
        items: &[OrderItemSnapshot],
        applied_discount_ids: &[Uuid],
    ) -> Result<PersistedOrder, OrderWriteError> {
        order::ActiveModel {
            id: Set(order.id),
            order_number: Set(order.order_number.clone()),
            user_id: Set(order.user_id),
            cart_id: Set(order.cart_id),
            shipping_address_id: Set(order.shipping_address_id),
            payment_method_id: Set(order.payment_method_id.clone()),
            status: Set(ORDER_STATUS_PENDING.to_string()),
            payment_status: Set(PAYMENT_STATUS_AWAITING.to_string()),
            currency: Set(order.currency.clone()),
            subtotal: Set(order.subtotal),
            discount_total: Set(order.discount_total),
            total: Set(order.total),
            free_shipping: Set(order.free_shipping),
            payment_intent_id: Set(None),
            payment_client_secret: Set(None),
            created_at: Set(order.created_at),
            updated_at: Set(order.created_at),
        }
        .insert(&self.txn)
        .await
        .map_err(ServiceError::from)?;

        for (index, item) in items.iter().enumerate() {
            let quantity = i32::try_from(item.quantity)
                .map_err(|_| ServiceError::ValidationError("quantity out of range".into()))?;
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order.id),
                position: Set(position(index)?),
                product_id: Set(item.product_id),
                product_name: Set(item.product_name.clone()),
                sku: Set(item.sku.clone()),
                quantity: Set(quantity),
                unit_price: Set(item.unit_price),
                line_total: Set(item.line_total),
                discount_amount: Set(item.discount_amount),
                attributes: Set(item.attributes.clone()),
            }
            .insert(&self.txn)
            .await
            .map_err(ServiceError::from)?;
        }

        // Counters are claimed in id order so concurrent checkouts take row
        // locks in the same sequence.
        let mut claim_order = applied_discount_ids.to_vec();
        claim_order.sort_unstable();
        for discount_id in &claim_order {
            self.claim_usage(*discount_id, order).await?;
        }

        for (index, discount_id) in applied_discount_ids.iter().enumerate() {
            order_discount::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order.id),
                discount_id: Set(*discount_id),
                position: Set(position(index)?),
            }
            .insert(&self.txn)
            .await
            .map_err(ServiceError::from)?;
        }

        Ok(PersistedOrder {
            order: OrderRecord::pending(order),
            items: items.to_vec(),
            applied_discount_ids: applied_discount_ids.to_vec(),
        })
    }

    async fn attach_payment_intent(
        &mut self,
        order_id: Uuid,
        intent: &PaymentIntent,
    ) -> Result<(), ServiceError> {
        let updated = order::Entity::update_many()
            .col_expr(order::Column::PaymentIntentId, Expr::value(Some(intent.id.clone())))
            .col_expr(
                order::Column::PaymentClientSecret,
                Expr::value(intent.client_secret.clone()),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .exec(&self.txn)
            .await?;

        if updated.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!("Order {} not found", order_id)));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), ServiceError> {
        self.txn.commit().await.map_err(|e| {
            warn!(error = %e, "checkout transaction failed to commit");
            ServiceError::DatabaseError(e)
        })?;
        counter!("checkout_db.transaction.committed", 1);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), ServiceError> {
        self.txn.rollback().await?;
        counter!("checkout_db.transaction.rolled_back", 1);
        Ok(())
    }
}
