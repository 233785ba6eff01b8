use axum::{
    extract::{Path, Query, State},
    routing::get,
    Router,
};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::{errors::ServiceError, AppState};

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CallbackQuery {
    pub session_id: String,
    pub order_uuid: Uuid,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SessionQuery {
    pub session_id: String,
}

/// Provider redirect targets. These carry no caller identity.
pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/checkout/callback", get(checkout_callback))
        .route("/stripe/payment/:order_uuid", get(stripe_payment_callback))
}

/// Settle an order after the hosted checkout redirects back
#[utoipa::path(
    get,
    path = "/api/v1/checkout/callback",
    summary = "Checkout callback",
    params(CallbackQuery),
    responses(
        (status = 200, description = "Confirmation text", body = String, content_type = "text/plain"),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Session belongs to another order", body = crate::errors::ErrorResponse),
        (status = 502, description = "Checkout provider unavailable", body = crate::errors::ErrorResponse),
    ),
    tag = "checkout"
)]
pub async fn checkout_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Result<&'static str, ServiceError> {
    state
        .checkout
        .handle_callback(&query.session_id, query.order_uuid)
        .await
}

#[utoipa::path(
    get,
    path = "/api/v1/stripe/payment/{order_uuid}",
    summary = "Checkout callback (path form)",
    params(("order_uuid" = Uuid, Path, description = "Order id"), SessionQuery),
    responses(
        (status = 200, description = "Confirmation text", body = String, content_type = "text/plain"),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 502, description = "Checkout provider unavailable", body = crate::errors::ErrorResponse),
    ),
    tag = "checkout"
)]
pub async fn stripe_payment_callback(
    State(state): State<AppState>,
    Path(order_uuid): Path<Uuid>,
    Query(query): Query<SessionQuery>,
) -> Result<&'static str, ServiceError> {
    state
        .checkout
        .handle_callback(&query.session_id, order_uuid)
        .await
}
