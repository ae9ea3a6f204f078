use async_trait::async_trait;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::DiscountRepository;
use crate::entities::{discount, discount_rule, discount_usage};
use crate::errors::ServiceError;
use crate::services::discounts::model::{Discount, DiscountRule};

/// Discount reads backed by the `discounts`, `discount_rules` and
/// `discount_usages` tables.
#[derive(Debug, Clone)]
pub struct SeaOrmDiscountRepository {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmDiscountRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

/// Negative counters in storage are read as zero.
pub(crate) fn non_negative(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

pub(crate) fn to_domain(model: discount::Model, rules: Vec<discount_rule::Model>) -> Discount {
    Discount {
        id: model.id,
        code: model.code,
        discount_type: model.discount_type.into(),
        value: model.value,
        starts_at: model.starts_at,
        ends_at: model.ends_at,
        stackable: model.stackable,
        usage_limit: model.usage_limit.map(non_negative),
        per_user_limit: model.per_user_limit.map(non_negative),
        times_used: non_negative(model.times_used),
        is_active: model.is_active,
        rules: rules
            .into_iter()
            .map(|r| DiscountRule::from_stored(r.id, &r.rule_type, &r.payload))
            .collect(),
    }
}

#[async_trait]
impl DiscountRepository for SeaOrmDiscountRepository {
    async fn find_active_by_codes(&self, codes: &[String]) -> Result<Vec<Discount>, ServiceError> {
        if codes.is_empty() {
            return Ok(Vec::new());
        }

        let discounts = discount::Entity::find()
            // Rows written outside the entity layer may not be normalized.
            .filter(Expr::expr(Expr::cust("UPPER(TRIM(code))")).is_in(codes.iter().cloned()))
            .filter(discount::Column::IsActive.eq(true))
            .all(&*self.db)
            .await?;

        let ids: Vec<Uuid> = discounts.iter().map(|d| d.id).collect();
        let mut rules_by_discount: HashMap<Uuid, Vec<discount_rule::Model>> = HashMap::new();
        if !ids.is_empty() {
            let rules = discount_rule::Entity::find()
                .filter(discount_rule::Column::DiscountId.is_in(ids))
                .order_by_asc(discount_rule::Column::CreatedAt)
                .all(&*self.db)
                .await?;
            for rule in rules {
                rules_by_discount.entry(rule.discount_id).or_default().push(rule);
            }
        }

        Ok(discounts
            .into_iter()
            .map(|model| {
                let rules = rules_by_discount.remove(&model.id).unwrap_or_default();
                to_domain(model, rules)
            })
            .collect())
    }

    async fn count_user_usages(
        &self,
        discount_id: Uuid,
        user_id: Uuid,
    ) -> Result<u64, ServiceError> {
        let count = discount_usage::Entity::find()
            .filter(discount_usage::Column::DiscountId.eq(discount_id))
            .filter(discount_usage::Column::UserId.eq(user_id))
            .count(&*self.db)
            .await?;
        Ok(count)
    }
}
