use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Purchasable SKU of a product (a specific color/size combination).
///
/// Variants are soft-deleted via `is_active = false` so historical order
/// items keep a valid reference. `carrier_variant_id` is assigned by the
/// catalog sync flow once the variant exists on the carrier platform; a
/// variant without one cannot be checked out.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "product_variants")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub product_id: Uuid,
    #[sea_orm(nullable)]
    pub color: Option<String>,
    #[sea_orm(nullable)]
    pub size: Option<String>,
    pub sku: String,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub price: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))", nullable)]
    pub sale_price: Option<Decimal>,
    pub stock_quantity: i32,
    /// Shipping weight in kilograms.
    pub weight: f64,
    /// Tax rate in percent; lines without one fall back to the flat policy.
    #[sea_orm(column_type = "Decimal(Some((8, 4)))", nullable)]
    pub tax_rate: Option<Decimal>,
    pub is_default: bool,
    pub is_active: bool,
    #[sea_orm(nullable)]
    pub carrier_variant_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id"
    )]
    Product,
    #[sea_orm(has_many = "super::product_image::Entity")]
    Images,
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl Related<super::product_image::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Images.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Sale price only counts when strictly below the list price.
    pub fn effective_sale_price(&self) -> Option<Decimal> {
        self.sale_price.filter(|sale| *sale < self.price)
    }

    /// Unit price a buyer pays for this variant.
    pub fn unit_price(&self) -> Decimal {
        self.effective_sale_price().unwrap_or(self.price)
    }
}
