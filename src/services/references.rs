use crate::{
    db::DbPool,
    entities::{order_status, payment, product},
};
use async_trait::async_trait;
use sea_orm::{ColumnTrait, DbErr, EntityTrait, PaginatorTrait, QueryFilter};
use std::sync::Arc;
use uuid::Uuid;

/// Existence checks for the records an order refers to
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReferenceValidator: Send + Sync {
    async fn order_status_exists(&self, id: Uuid) -> Result<bool, DbErr>;
    async fn payment_exists(&self, id: Uuid) -> Result<bool, DbErr>;
    /// Soft-deleted products do not count as existing.
    async fn product_exists(&self, id: Uuid) -> Result<bool, DbErr>;
}

#[derive(Clone)]
pub struct DatabaseReferenceValidator {
    db_pool: Arc<DbPool>,
}

impl DatabaseReferenceValidator {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl ReferenceValidator for DatabaseReferenceValidator {
    async fn order_status_exists(&self, id: Uuid) -> Result<bool, DbErr> {
        let count = order_status::Entity::find_by_id(id)
            .count(&*self.db_pool)
            .await?;
        Ok(count > 0)
    }

    async fn payment_exists(&self, id: Uuid) -> Result<bool, DbErr> {
        let count = payment::Entity::find_by_id(id)
            .count(&*self.db_pool)
            .await?;
        Ok(count > 0)
    }

    async fn product_exists(&self, id: Uuid) -> Result<bool, DbErr> {
        let count = product::Entity::find_by_id(id)
            .filter(product::Column::DeletedAt.is_null())
            .count(&*self.db_pool)
            .await?;
        Ok(count > 0)
    }
}
