use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use uuid::Uuid;

use crate::{
    auth::CallerContext,
    errors::ServiceError,
    services::orders::{ListOrdersQuery, OrderRequest, OrderSubmission, OrderUpdated, OrderView},
    ApiResponse, AppState, PaginatedResponse,
};

pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders).post(create_order))
        .route("/:uuid", get(get_order).put(update_order))
}

/// Place an order
#[utoipa::path(
    post,
    path = "/api/v1/order",
    summary = "Place order",
    description = "Validates references, prices the line items and stores the order. \
        Card payments additionally receive a hosted checkout URL, or the checkout error text.",
    request_body = OrderRequest,
    responses(
        (status = 201, description = "Order placed", body = ApiResponse<OrderSubmission>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 422, description = "Validation error", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    ctx: CallerContext,
    Json(request): Json<OrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderSubmission>>), ServiceError> {
    let submission = state.orders.submit_order(&ctx, request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(submission))))
}

/// Replace an order's line items, address, status and payment
#[utoipa::path(
    put,
    path = "/api/v1/order/{uuid}",
    summary = "Update order",
    params(("uuid" = Uuid, Path, description = "Order id")),
    request_body = OrderRequest,
    responses(
        (status = 200, description = "Order updated", body = ApiResponse<OrderUpdated>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Validation error", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn update_order(
    State(state): State<AppState>,
    ctx: CallerContext,
    Path(uuid): Path<Uuid>,
    Json(request): Json<OrderRequest>,
) -> Result<Json<ApiResponse<OrderUpdated>>, ServiceError> {
    let updated = state.orders.update_order(&ctx, uuid, request).await?;
    Ok(Json(ApiResponse::success(updated)))
}

/// Fetch one order
#[utoipa::path(
    get,
    path = "/api/v1/order/{uuid}",
    summary = "Get order",
    params(("uuid" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order", body = ApiResponse<OrderView>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    ctx: CallerContext,
    Path(uuid): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderView>>, ServiceError> {
    let order = state.orders.get_order(&ctx, uuid).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// List orders; admins see every order, other callers only their own
#[utoipa::path(
    get,
    path = "/api/v1/order",
    summary = "List orders",
    params(ListOrdersQuery),
    responses(
        (status = 200, description = "Page of orders", body = ApiResponse<PaginatedResponse<OrderView>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    ctx: CallerContext,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<ApiResponse<PaginatedResponse<OrderView>>>, ServiceError> {
    let page = state.orders.list_orders(&ctx, &query).await?;
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        page.items, page.total, page.page, page.limit,
    ))))
}
