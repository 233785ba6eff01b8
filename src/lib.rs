//! Pet Shop API Library
//!
//! Order workflow of the pet shop backend: order placement and amendment,
//! payment routing, hosted card checkout and asynchronous status notifications.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod handlers;
pub mod message_queue;
pub mod migrator;
pub mod openapi;
pub mod repositories;
pub mod services;
pub mod tracing;

use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use chrono::Utc;
use http::HeaderValue;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, timeout::TimeoutLayer};
use utoipa::ToSchema;

use crate::message_queue::MessageQueue;
use crate::services::{
    checkout::{CheckoutGateway, CheckoutProvider},
    notifications::StatusNotifier,
    orders::OrderService,
    payments::PaymentService,
    references::DatabaseReferenceValidator,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub orders: Arc<OrderService>,
    pub checkout: Arc<CheckoutGateway>,
    pub payments: Arc<PaymentService>,
}

impl AppState {
    /// Wires the services on top of a database, a checkout provider and the notification queue
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        provider: Arc<dyn CheckoutProvider>,
        queue: Arc<dyn MessageQueue>,
    ) -> Self {
        let notifier = StatusNotifier::new(queue, config.notification_max_retries);
        let checkout = Arc::new(CheckoutGateway::new(
            provider,
            db.clone(),
            notifier.clone(),
            config.checkout_currency.clone(),
            config.checkout_callback_url.clone(),
        ));
        let orders = Arc::new(OrderService::new(
            db.clone(),
            Arc::new(DatabaseReferenceValidator::new(db.clone())),
            checkout.clone(),
            notifier,
        ));
        let payments = Arc::new(PaymentService::new(db.clone()));

        Self {
            db,
            config,
            orders,
            checkout,
            payments,
        }
    }
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            meta: Some(ResponseMeta::capture()),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, total: u64, page: u64, limit: u64) -> Self {
        let limit = limit.max(1);
        Self {
            items,
            total,
            page,
            limit,
            total_pages: total.div_ceil(limit),
        }
    }
}

/// Versioned API. Caller identity is read from trusted headers only when `trust_identity` is set.
pub fn api_v1_routes(trust_identity: bool) -> Router<AppState> {
    let mut authenticated = Router::new()
        .nest("/order", handlers::orders::order_routes())
        .nest("/payment", handlers::payments::payment_routes());

    if trust_identity {
        authenticated =
            authenticated.layer(axum::middleware::from_fn(auth::identity_header_middleware));
    }

    Router::new()
        .merge(authenticated)
        .merge(handlers::checkout::checkout_routes())
}

/// Full HTTP surface with tracing, compression, timeout, CORS and request-id layers
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);
    let trust_identity = state.config.trust_identity_headers;

    Router::new()
        .route("/", get(|| async { "petshop-api up" }))
        .route("/health", get(health_check))
        .nest("/api/v1", api_v1_routes(trust_identity))
        .merge(openapi::swagger_ui())
        .layer(crate::tracing::configure_http_tracing())
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(cors)
        .layer(axum::middleware::from_fn(
            crate::tracing::request_id_middleware,
        ))
        .with_state(state)
}

fn cors_layer(cfg: &config::AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = cfg
        .cors_allowed_origins
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    if !origins.is_empty() {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any)
    } else if cfg.is_development() {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
    }
}

async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<ApiResponse<Value>>) {
    let db_status = match state.db.ping().await {
        Ok(_) => "healthy",
        Err(e) => {
            ::tracing::warn!(error = %e, "Database ping failed");
            "unhealthy"
        }
    };

    let code = if db_status == "healthy" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let health_data = json!({
        "status": db_status,
        "checks": { "database": db_status },
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
    });

    (code, Json(ApiResponse::success(health_data)))
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn success_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-123"), async {
                ApiResponse::success("ok")
            })
            .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-123"));
        DateTime::parse_from_rfc3339(&meta.timestamp).expect("timestamp should parse");
    }

    #[test]
    fn total_pages_rounds_up() {
        let page = PaginatedResponse::new(vec![1, 2, 3], 21, 1, 10);
        assert_eq!(page.total_pages, 3);

        let empty = PaginatedResponse::<u8>::new(Vec::new(), 0, 1, 10);
        assert_eq!(empty.total_pages, 0);
    }
}
