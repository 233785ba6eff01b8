use crate::{
    auth::CallerContext,
    db::DbPool,
    entities::{
        order::{LineItemSnapshot, OrderAddress},
        order_status,
        payment::{self, PaymentKind},
    },
    errors::{FieldError, ServiceError},
    repositories::order_repository::{
        NewOrder, OrderChanges, OrderDetails, OrderRepository, OrderSortField,
    },
    services::{
        checkout::CheckoutGateway,
        notifications::StatusNotifier,
        pricing::{compute_totals, OrderTotals},
        products::ProductSnapshotResolver,
        references::ReferenceValidator,
    },
};
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::EntityTrait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

pub const DEFAULT_PAGE: u64 = 1;
pub const DEFAULT_LIMIT: u64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct OrderLineRequest {
    /// Product identifier
    #[serde(alias = "product_uuid")]
    pub uuid: Uuid,
    #[validate(range(min = 1, message = "The quantity must be at least 1"))]
    pub quantity: u32,
}

/// Body of order submission and update
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct OrderRequest {
    pub order_status_uuid: Uuid,
    pub payment_uuid: Uuid,
    #[validate(length(min = 1, message = "The products field is required"))]
    pub products: Vec<OrderLineRequest>,
    pub address: OrderAddress,
}

/// Result of placing an order. A failed checkout does not undo the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OrderSubmission {
    pub order_uuid: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OrderUpdated {
    pub order_uuid: Uuid,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListOrdersQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    /// Only `id` is sortable; listings are always ordered by id
    #[serde(rename = "sortBy", alias = "sort_by")]
    pub sort_by: Option<String>,
    /// `true`, `1`, `yes` or `on` sort descending
    pub desc: Option<String>,
}

impl ListOrdersQuery {
    pub fn page(&self) -> u64 {
        self.page.unwrap_or(DEFAULT_PAGE).max(1)
    }

    pub fn limit(&self) -> u64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).max(1)
    }

    /// Sort column and direction. Missing or unknown names sort by id.
    pub fn sort(&self) -> (OrderSortField, bool) {
        let field = self
            .sort_by
            .as_deref()
            .and_then(OrderSortField::parse)
            .unwrap_or(OrderSortField::Id);
        (field, self.desc.as_deref().map(parse_flag).unwrap_or(false))
    }
}

pub fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderUserView {
    pub uuid: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderPaymentView {
    pub uuid: Uuid,
    pub kind: payment::PaymentKind,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderView {
    pub uuid: Uuid,
    pub user_uuid: Uuid,
    pub user: Option<OrderUserView>,
    pub order_status: Option<String>,
    pub payment: Option<OrderPaymentView>,
    pub products: Vec<LineItemSnapshot>,
    pub address: OrderAddress,
    #[schema(value_type = String)]
    pub subtotal: Decimal,
    #[schema(value_type = String)]
    pub delivery_fee: Decimal,
    #[schema(value_type = String)]
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub shipped_at: Option<DateTime<Utc>>,
}

impl From<OrderDetails> for OrderView {
    fn from(details: OrderDetails) -> Self {
        let order = details.order;
        Self {
            uuid: order.id,
            user_uuid: order.user_id,
            user: details.user.map(|u| OrderUserView {
                uuid: u.id,
                first_name: u.first_name,
                last_name: u.last_name,
                email: u.email,
            }),
            order_status: details.status.map(|s| s.title),
            payment: details.payment.map(|p| OrderPaymentView {
                uuid: p.id,
                kind: p.kind,
            }),
            products: order.products.0,
            address: order.address,
            subtotal: order.subtotal,
            delivery_fee: order.delivery_fee,
            amount: order.total_amount,
            created_at: order.created_at,
            updated_at: order.updated_at,
            shipped_at: order.shipped_at,
        }
    }
}

/// One page of orders
#[derive(Debug, Clone)]
pub struct OrderPage {
    pub items: Vec<OrderView>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
}

/// Priced, validated form of an [`OrderRequest`], with everything the
/// post-write steps need already loaded
struct PreparedOrder {
    items: Vec<LineItemSnapshot>,
    totals: OrderTotals,
    status_title: String,
    payment_kind: PaymentKind,
}

fn push_field_errors(prefix: &str, errors: &ValidationErrors, out: &mut Vec<FieldError>) {
    for (field, failures) in errors.field_errors() {
        for failure in failures {
            let name = if prefix.is_empty() {
                field.to_string()
            } else {
                format!("{}.{}", prefix, field)
            };
            let message = failure
                .message
                .as_ref()
                .map(|m| m.to_string())
                .unwrap_or_else(|| format!("The {} field is invalid", name));
            out.push(FieldError::new(name, message));
        }
    }
}

/// Places and amends orders
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    repository: Arc<OrderRepository>,
    references: Arc<dyn ReferenceValidator>,
    products: ProductSnapshotResolver,
    checkout: Arc<CheckoutGateway>,
    notifier: StatusNotifier,
}

impl OrderService {
    pub fn new(
        db_pool: Arc<DbPool>,
        references: Arc<dyn ReferenceValidator>,
        checkout: Arc<CheckoutGateway>,
        notifier: StatusNotifier,
    ) -> Self {
        Self {
            repository: Arc::new(OrderRepository::new(db_pool.clone())),
            products: ProductSnapshotResolver::new(db_pool.clone()),
            db_pool,
            references,
            checkout,
            notifier,
        }
    }

    /// Validates, prices and persists an order, then routes card payments to checkout
    #[instrument(skip(self, ctx, request), fields(user_id = %ctx.user_id))]
    pub async fn submit_order(
        &self,
        ctx: &CallerContext,
        request: OrderRequest,
    ) -> Result<OrderSubmission, ServiceError> {
        let prepared = self.prepare(&request).await?;

        let order = self
            .repository
            .create(NewOrder {
                user_id: ctx.user_id,
                order_status_id: request.order_status_uuid,
                payment_id: request.payment_uuid,
                items: prepared.items,
                address: request.address,
                totals: prepared.totals,
            })
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to persist order");
                e
            })?;

        counter!("petshop_orders_created_total", 1);
        info!(order_id = %order.id, total = %order.total_amount, "Order placed");

        self.notifier
            .notify(order.id, &prepared.status_title, Utc::now())
            .await;

        let mut submission = OrderSubmission {
            order_uuid: order.id,
            payment_url: None,
            payment_error: None,
        };

        if prepared.payment_kind.requires_checkout() {
            match self.checkout.create_session(&order).await {
                Ok(url) => submission.payment_url = Some(url),
                Err(e) => submission.payment_error = Some(e.to_string()),
            }
        }

        Ok(submission)
    }

    /// Replaces line items, address, status and payment of an existing order.
    /// Payment routing is not repeated.
    #[instrument(skip(self, ctx, request), fields(order_id = %order_id, user_id = %ctx.user_id))]
    pub async fn update_order(
        &self,
        ctx: &CallerContext,
        order_id: Uuid,
        request: OrderRequest,
    ) -> Result<OrderUpdated, ServiceError> {
        let prepared = self.prepare(&request).await?;

        if !ctx.is_admin {
            let owned = self
                .repository
                .find_by_id(order_id)
                .await?
                .map_or(false, |o| o.user_id == ctx.user_id);
            if !owned {
                return Err(ServiceError::not_found("Order"));
            }
        }

        let updated = self
            .repository
            .update(
                order_id,
                OrderChanges {
                    order_status_id: request.order_status_uuid,
                    payment_id: request.payment_uuid,
                    items: prepared.items,
                    address: request.address,
                    totals: prepared.totals,
                },
            )
            .await?;

        if updated == 0 {
            return Err(ServiceError::not_found("Order"));
        }

        counter!("petshop_orders_updated_total", 1);
        info!(order_id = %order_id, total = %prepared.totals.total, "Order updated");

        self.notifier
            .notify(order_id, &prepared.status_title, Utc::now())
            .await;

        Ok(OrderUpdated {
            order_uuid: order_id,
        })
    }

    #[instrument(skip(self, ctx), fields(order_id = %order_id))]
    pub async fn get_order(
        &self,
        ctx: &CallerContext,
        order_id: Uuid,
    ) -> Result<OrderView, ServiceError> {
        self.repository
            .find_details(order_id, ctx.scope())
            .await?
            .map(OrderView::from)
            .ok_or_else(|| ServiceError::not_found("Order"))
    }

    #[instrument(skip(self, ctx, query), fields(user_id = %ctx.user_id))]
    pub async fn list_orders(
        &self,
        ctx: &CallerContext,
        query: &ListOrdersQuery,
    ) -> Result<OrderPage, ServiceError> {
        let page = query.page();
        let limit = query.limit();
        let (orders, total) = self
            .repository
            .list(ctx.scope(), page, limit, Some(query.sort()))
            .await?;

        Ok(OrderPage {
            items: orders.into_iter().map(OrderView::from).collect(),
            total,
            page,
            limit,
        })
    }

    /// Everything that must hold before a write: well-formed input, existing
    /// references, resolvable products.
    async fn prepare(&self, request: &OrderRequest) -> Result<PreparedOrder, ServiceError> {
        let mut field_errors = Vec::new();
        if let Err(errors) = request.validate() {
            push_field_errors("", &errors, &mut field_errors);
        }
        if let Err(errors) = request.address.validate() {
            push_field_errors("address", &errors, &mut field_errors);
        }
        for (i, line) in request.products.iter().enumerate() {
            if let Err(errors) = line.validate() {
                push_field_errors(&format!("products.{}", i), &errors, &mut field_errors);
            }
        }
        if !field_errors.is_empty() {
            field_errors.sort_by(|a, b| a.field.cmp(&b.field));
            return Err(ServiceError::InvalidReferences(field_errors));
        }

        self.check_references(request).await?;

        let status_title = order_status::Entity::find_by_id(request.order_status_uuid)
            .one(&*self.db_pool)
            .await?
            .map(|s| s.title)
            .ok_or_else(|| {
                ServiceError::InvalidReferences(vec![FieldError::new(
                    "order_status_uuid",
                    "The selected order status does not exist",
                )])
            })?;
        let payment_kind = payment::Entity::find_by_id(request.payment_uuid)
            .one(&*self.db_pool)
            .await?
            .map(|p| p.kind)
            .ok_or_else(|| {
                ServiceError::InvalidReferences(vec![FieldError::new(
                    "payment_uuid",
                    "The selected payment does not exist",
                )])
            })?;

        let mut items = Vec::with_capacity(request.products.len());
        for (i, line) in request.products.iter().enumerate() {
            match self.products.resolve(line.uuid, line.quantity).await {
                Ok(snapshot) => items.push(snapshot),
                Err(ServiceError::NotFound(_)) => {
                    return Err(ServiceError::InvalidReferences(vec![FieldError::new(
                        format!("products.{}.uuid", i),
                        "The selected product does not exist",
                    )]))
                }
                Err(e) => return Err(e),
            }
        }

        let totals = compute_totals(&items);
        Ok(PreparedOrder {
            items,
            totals,
            status_title,
            payment_kind,
        })
    }

    async fn check_references(&self, request: &OrderRequest) -> Result<(), ServiceError> {
        let mut missing = Vec::new();

        if !self
            .references
            .order_status_exists(request.order_status_uuid)
            .await?
        {
            missing.push(FieldError::new(
                "order_status_uuid",
                "The selected order status does not exist",
            ));
        }
        if !self.references.payment_exists(request.payment_uuid).await? {
            missing.push(FieldError::new(
                "payment_uuid",
                "The selected payment does not exist",
            ));
        }
        for (i, line) in request.products.iter().enumerate() {
            if !self.references.product_exists(line.uuid).await? {
                missing.push(FieldError::new(
                    format!("products.{}.uuid", i),
                    "The selected product does not exist",
                ));
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::InvalidReferences(missing))
        }
    }

}
