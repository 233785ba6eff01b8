use crate::{
    db::DbPool,
    entities::{order::LineItemSnapshot, product},
    errors::ServiceError,
};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use std::sync::Arc;
use tracing::{error, instrument};
use uuid::Uuid;

/// Captures product price and title for order line items.
#[derive(Clone)]
pub struct ProductSnapshotResolver {
    db_pool: Arc<DbPool>,
}

impl ProductSnapshotResolver {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Snapshots a live product. Soft-deleted products resolve as not found.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn resolve(
        &self,
        product_id: Uuid,
        quantity: u32,
    ) -> Result<LineItemSnapshot, ServiceError> {
        let product = product::Entity::find_by_id(product_id)
            .filter(product::Column::DeletedAt.is_null())
            .one(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, product_id = %product_id, "Failed to fetch product");
                ServiceError::DatabaseError(e)
            })?
            .ok_or_else(|| ServiceError::not_found("Product"))?;

        Ok(LineItemSnapshot {
            product_id: product.id,
            quantity,
            unit_price: product.price,
            product_title: product.title,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{establish_connection_with_config, run_migrations, DbConfig};
    use assert_matches::assert_matches;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use sea_orm::{ActiveModelTrait, Set};

    async fn resolver_with(deleted: bool) -> (ProductSnapshotResolver, Uuid) {
        let db = establish_connection_with_config(&DbConfig {
            url: "sqlite::memory:".into(),
            max_connections: 1,
            ..Default::default()
        })
        .await
        .unwrap();
        run_migrations(&db).await.unwrap();

        let id = Uuid::new_v4();
        let now = Utc::now();
        product::ActiveModel {
            id: Set(id),
            title: Set("Dog food".into()),
            price: Set(dec!(450)),
            description: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            deleted_at: Set(deleted.then_some(now)),
        }
        .insert(&db)
        .await
        .unwrap();

        (ProductSnapshotResolver::new(Arc::new(db)), id)
    }

    #[tokio::test]
    async fn captures_price_and_title() {
        let (resolver, id) = resolver_with(false).await;
        let snapshot = resolver.resolve(id, 2).await.unwrap();
        assert_eq!(snapshot.unit_price, dec!(450));
        assert_eq!(snapshot.product_title, "Dog food");
        assert_eq!(snapshot.line_total(), dec!(900));
    }

    #[tokio::test]
    async fn soft_deleted_products_do_not_resolve() {
        let (resolver, id) = resolver_with(true).await;
        assert_matches!(resolver.resolve(id, 1).await, Err(ServiceError::NotFound(_)));
    }
}
