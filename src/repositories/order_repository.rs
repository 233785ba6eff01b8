use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, DatabaseConnection, EntityTrait,
    LoaderTrait, Order as SortOrder, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::order::{
    ActiveModel as OrderActiveModel, Column, Entity as Order, LineItemSnapshot, LineItems,
    Model as OrderModel, OrderAddress,
};
use crate::entities::{order_status, payment, user};
use crate::errors::ServiceError;
use crate::services::pricing::OrderTotals;

use super::{OrderScope, PoolHandle, Repository};

/// Fields written when an order is placed
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: Uuid,
    pub order_status_id: Uuid,
    pub payment_id: Uuid,
    pub items: Vec<LineItemSnapshot>,
    pub address: OrderAddress,
    pub totals: OrderTotals,
}

/// Full replacement of an order's mutable fields
#[derive(Debug, Clone)]
pub struct OrderChanges {
    pub order_status_id: Uuid,
    pub payment_id: Uuid,
    pub items: Vec<LineItemSnapshot>,
    pub address: OrderAddress,
    pub totals: OrderTotals,
}

/// Sortable listing columns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSortField {
    Id,
}

impl OrderSortField {
    /// Unknown names apply no ordering.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "id" => Some(OrderSortField::Id),
            _ => None,
        }
    }
}

/// Order together with its eagerly loaded references
#[derive(Debug, Clone)]
pub struct OrderDetails {
    pub order: OrderModel,
    pub user: Option<user::Model>,
    pub status: Option<order_status::Model>,
    pub payment: Option<payment::Model>,
}

/// Repository for order operations
#[derive(Debug)]
pub struct OrderRepository {
    pool: PoolHandle,
}

impl OrderRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            pool: PoolHandle::new(db),
        }
    }

    /// Inserts a new order under a fresh time-ordered identifier
    pub async fn create(&self, new_order: NewOrder) -> Result<OrderModel, ServiceError> {
        let now = Utc::now();
        let id = Uuid::now_v7();

        OrderActiveModel {
            id: Set(id),
            user_id: Set(new_order.user_id),
            order_status_id: Set(new_order.order_status_id),
            payment_id: Set(new_order.payment_id),
            products: Set(LineItems(new_order.items)),
            address: Set(new_order.address),
            subtotal: Set(new_order.totals.subtotal),
            delivery_fee: Set(new_order.totals.delivery_fee),
            total_amount: Set(new_order.totals.total),
            created_at: Set(now),
            updated_at: Set(now),
            shipped_at: Set(None),
        }
        .insert(self.pool.db())
        .await
        .map_err(ServiceError::DatabaseError)
    }

    /// Overwrites the mutable fields of an order; returns the number of rows touched
    pub async fn update(&self, id: Uuid, changes: OrderChanges) -> Result<u64, ServiceError> {
        let active = OrderActiveModel {
            id: NotSet,
            user_id: NotSet,
            order_status_id: Set(changes.order_status_id),
            payment_id: Set(changes.payment_id),
            products: Set(LineItems(changes.items)),
            address: Set(changes.address),
            subtotal: Set(changes.totals.subtotal),
            delivery_fee: Set(changes.totals.delivery_fee),
            total_amount: Set(changes.totals.total),
            created_at: NotSet,
            updated_at: Set(Utc::now()),
            shipped_at: NotSet,
        };

        let result = Order::update_many()
            .set(active)
            .filter(Column::Id.eq(id))
            .exec(self.pool.db())
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok(result.rows_affected)
    }

    /// Moves an order to `paid_status_id` unless it currently sits in one of `blocked_status_ids`.
    /// Returns the number of rows touched.
    pub async fn settle(
        &self,
        id: Uuid,
        paid_status_id: Uuid,
        blocked_status_ids: &[Uuid],
    ) -> Result<u64, ServiceError> {
        let mut query = Order::update_many()
            .set(OrderActiveModel {
                order_status_id: Set(paid_status_id),
                updated_at: Set(Utc::now()),
                ..Default::default()
            })
            .filter(Column::Id.eq(id));

        if !blocked_status_ids.is_empty() {
            query = query.filter(Column::OrderStatusId.is_not_in(blocked_status_ids.to_vec()));
        }

        let result = query
            .exec(self.pool.db())
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok(result.rows_affected)
    }

    /// Find an order by ID
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<OrderModel>, ServiceError> {
        Order::find_by_id(id)
            .one(self.pool.db())
            .await
            .map_err(ServiceError::DatabaseError)
    }

    /// Find an order visible in `scope`, with its references loaded
    pub async fn find_details(
        &self,
        id: Uuid,
        scope: OrderScope,
    ) -> Result<Option<OrderDetails>, ServiceError> {
        let mut query = Order::find_by_id(id);
        if let OrderScope::OwnedBy(user_id) = scope {
            query = query.filter(Column::UserId.eq(user_id));
        }

        let order = query
            .one(self.pool.db())
            .await
            .map_err(ServiceError::DatabaseError)?;

        match order {
            Some(order) => Ok(self.with_relations(vec![order]).await?.pop()),
            None => Ok(None),
        }
    }

    /// Paginated listing; `page` is 1-based
    pub async fn list(
        &self,
        scope: OrderScope,
        page: u64,
        limit: u64,
        sort: Option<(OrderSortField, bool)>,
    ) -> Result<(Vec<OrderDetails>, u64), ServiceError> {
        let mut query = Order::find();
        if let OrderScope::OwnedBy(user_id) = scope {
            query = query.filter(Column::UserId.eq(user_id));
        }
        if let Some((OrderSortField::Id, desc)) = sort {
            let direction = if desc { SortOrder::Desc } else { SortOrder::Asc };
            query = query.order_by(Column::Id, direction);
        }

        let paginator = query.paginate(self.pool.db(), limit.max(1));

        let total = paginator
            .num_items()
            .await
            .map_err(ServiceError::DatabaseError)?;

        let orders = paginator
            .fetch_page(page.max(1) - 1)
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok((self.with_relations(orders).await?, total))
    }

    async fn with_relations(
        &self,
        orders: Vec<OrderModel>,
    ) -> Result<Vec<OrderDetails>, ServiceError> {
        let db = self.pool.db();
        let users = orders
            .load_one(user::Entity, db)
            .await
            .map_err(ServiceError::DatabaseError)?;
        let statuses = orders
            .load_one(order_status::Entity, db)
            .await
            .map_err(ServiceError::DatabaseError)?;
        let payments = orders
            .load_one(payment::Entity, db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok(orders
            .into_iter()
            .zip(users)
            .zip(statuses)
            .zip(payments)
            .map(|(((order, user), status), payment)| OrderDetails {
                order,
                user,
                status,
                payment,
            })
            .collect())
    }
}
