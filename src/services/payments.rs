use crate::{
    db::DbPool,
    entities::payment::{self, PaymentDetails, PaymentKind},
    errors::ServiceError,
};
use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreatePaymentRequest {
    pub details: PaymentDetails,
}

/// Payment as returned to clients; card data is masked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PaymentView {
    pub uuid: Uuid,
    pub kind: PaymentKind,
    pub details: PaymentDetails,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<payment::Model> for PaymentView {
    fn from(model: payment::Model) -> Self {
        Self {
            uuid: model.id,
            kind: model.kind,
            details: model.details.redacted(),
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Clone)]
pub struct PaymentService {
    db_pool: Arc<DbPool>,
}

impl PaymentService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    #[instrument(skip(self, request), fields(kind = %request.details.kind()))]
    pub async fn create(&self, request: CreatePaymentRequest) -> Result<PaymentView, ServiceError> {
        request.details.validate()?;

        let now = Utc::now();
        let model = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            kind: Set(request.details.kind()),
            details: Set(request.details),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db_pool)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to store payment");
            ServiceError::DatabaseError(e)
        })?;

        info!(payment_id = %model.id, kind = %model.kind, "Payment registered");
        Ok(model.into())
    }

    #[instrument(skip(self))]
    pub async fn get(&self, payment_id: Uuid) -> Result<PaymentView, ServiceError> {
        payment::Entity::find_by_id(payment_id)
            .one(&*self.db_pool)
            .await?
            .map(PaymentView::from)
            .ok_or_else(|| ServiceError::not_found("Payment"))
    }
}
