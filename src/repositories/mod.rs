//! Persistence access for orders.

use std::sync::Arc;
use uuid::Uuid;

use crate::db::DbPool;

pub mod order_repository;

/// Which orders a caller may see
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderScope {
    All,
    OwnedBy(Uuid),
}

/// Access to the shared connection pool
pub trait Repository {
    fn db(&self) -> &DbPool;
}

/// Pool handle embedded by concrete repositories
#[derive(Debug, Clone)]
pub struct PoolHandle {
    pool: Arc<DbPool>,
}

impl PoolHandle {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }
}

impl Repository for PoolHandle {
    fn db(&self) -> &DbPool {
        &self.pool
    }
}
