use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::services::discounts::model::CartItemSnapshot;

/// Cart line. `category_ids` holds a JSON array of category UUIDs.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "cart_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub cart_id: Uuid,
    pub position: i32,
    pub product_id: Uuid,
    pub product_name: String,
    pub sku: String,
    #[sea_orm(column_type = "Json")]
    pub category_ids: Json,
    #[sea_orm(nullable)]
    pub brand_id: Option<Uuid>,
    pub quantity: i32,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub unit_price: Decimal,
    #[sea_orm(column_type = "Json")]
    pub attributes: Json,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::cart::Entity",
        from = "Column::CartId",
        to = "super::cart::Column::Id"
    )]
    Cart,
}

impl Related<super::cart::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Cart.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Category set of the line. Entries that are not UUIDs are skipped.
    pub fn categories(&self) -> BTreeSet<Uuid> {
        self.category_ids
            .as_array()
            .map(|values| {
                values
                    .iter()
                    .filter_map(|v| v.as_str().and_then(|s| Uuid::parse_str(s).ok()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> CartItemSnapshot {
        CartItemSnapshot {
            product_id: self.product_id,
            category_ids: self.categories(),
            brand_id: self.brand_id,
            quantity: u32::try_from(self.quantity).unwrap_or(0),
            unit_price: self.unit_price,
            product_name: self.product_name.clone(),
            sku: self.sku.clone(),
            attributes: self.attributes.clone(),
        }
    }
}
