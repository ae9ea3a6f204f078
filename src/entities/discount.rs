use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::ActiveValue;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::discounts::model::{normalize_code, DiscountType};

/// Discount code entity. `code` is stored trimmed and upper-cased.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "discounts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub code: String,
    pub discount_type: DiscountKind,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub value: Decimal,
    pub starts_at: DateTime<Utc>,
    #[sea_orm(nullable)]
    pub ends_at: Option<DateTime<Utc>>,
    pub stackable: bool,
    #[sea_orm(nullable)]
    pub usage_limit: Option<i32>,
    #[sea_orm(nullable)]
    pub per_user_limit: Option<i32>,
    pub times_used: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::discount_rule::Entity")]
    Rules,
    #[sea_orm(has_many = "super::discount_usage::Entity")]
    Usages,
}

impl Related<super::discount_rule::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Rules.def()
    }
}

impl Related<super::discount_usage::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Usages.def()
    }
}

#[async_trait::async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C: ConnectionTrait>(self, _db: &C, _insert: bool) -> Result<Self, DbErr> {
        let mut active_model = self;
        if let ActiveValue::Set(code) = &active_model.code {
            let normalized = normalize_code(code);
            if normalized != *code {
                active_model.code = ActiveValue::Set(normalized);
            }
        }
        Ok(active_model)
    }
}

/// Discount type column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
pub enum DiscountKind {
    #[sea_orm(string_value = "percentage")]
    Percentage,
    #[sea_orm(string_value = "fixed_amount")]
    FixedAmount,
    #[sea_orm(string_value = "free_shipping")]
    FreeShipping,
}

impl From<DiscountKind> for DiscountType {
    fn from(kind: DiscountKind) -> Self {
        match kind {
            DiscountKind::Percentage => DiscountType::Percentage,
            DiscountKind::FixedAmount => DiscountType::FixedAmount,
            DiscountKind::FreeShipping => DiscountType::FreeShipping,
        }
    }
}

impl From<DiscountType> for DiscountKind {
    fn from(kind: DiscountType) -> Self {
        match kind {
            DiscountType::Percentage => DiscountKind::Percentage,
            DiscountType::FixedAmount => DiscountKind::FixedAmount,
            DiscountType::FreeShipping => DiscountKind::FreeShipping,
        }
    }
}
