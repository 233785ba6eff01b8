use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use uuid::Uuid;

use crate::{
    auth::CallerContext,
    errors::ServiceError,
    services::payments::{CreatePaymentRequest, PaymentView},
    ApiResponse, AppState,
};

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_payment))
        .route("/:uuid", get(get_payment))
}

/// Register a payment method for later orders
#[utoipa::path(
    post,
    path = "/api/v1/payment",
    summary = "Create payment",
    request_body = CreatePaymentRequest,
    responses(
        (status = 201, description = "Payment stored", body = ApiResponse<PaymentView>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 422, description = "Validation error", body = crate::errors::ErrorResponse),
    ),
    tag = "payments"
)]
pub async fn create_payment(
    State(state): State<AppState>,
    _ctx: CallerContext,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<ApiResponse<PaymentView>>), ServiceError> {
    let payment = state.payments.create(request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(payment))))
}

#[utoipa::path(
    get,
    path = "/api/v1/payment/{uuid}",
    summary = "Get payment",
    params(("uuid" = Uuid, Path, description = "Payment id")),
    responses(
        (status = 200, description = "Payment with masked card data", body = ApiResponse<PaymentView>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Payment not found", body = crate::errors::ErrorResponse),
    ),
    tag = "payments"
)]
pub async fn get_payment(
    State(state): State<AppState>,
    _ctx: CallerContext,
    Path(uuid): Path<Uuid>,
) -> Result<Json<ApiResponse<PaymentView>>, ServiceError> {
    let payment = state.payments.get(uuid).await?;
    Ok(Json(ApiResponse::success(payment)))
}
