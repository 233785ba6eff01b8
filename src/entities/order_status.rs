use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const OPEN: &str = "open";
pub const PENDING_PAYMENT: &str = "pending payment";
pub const PAID: &str = "paid";
pub const SHIPPED: &str = "shipped";
pub const CANCELED: &str = "canceled";

/// Reference titles seeded at startup.
pub const SEEDED_TITLES: [&str; 5] = [OPEN, PENDING_PAYMENT, PAID, SHIPPED, CANCELED];

/// Titles an order never leaves through payment settlement.
pub const SETTLEMENT_FINAL_TITLES: [&str; 2] = [SHIPPED, CANCELED];

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "order_statuses")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order::Entity")]
    Orders,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Orders.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
