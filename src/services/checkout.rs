//! Hosted checkout for card payments.
//!
//! [`CheckoutGateway`] creates a provider-hosted payment page for an order and
//! settles the order when the provider redirects back to the callback endpoint.
//! Provider failures are returned as [`CheckoutError`] values carrying a
//! [`CheckoutErrorKind`], never as opaque strings.

use crate::{
    db::DbPool,
    entities::{order, order_status},
    errors::ServiceError,
    repositories::order_repository::OrderRepository,
    services::notifications::StatusNotifier,
};
use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Returned by the callback once the session has been processed
pub const CONFIRMATION_MESSAGE: &str = "Your order has been placed and payment paid.";

/// Name of the single line item sent to the provider
pub const CHECKOUT_PRODUCT_NAME: &str = "Buy product";

/// Placeholder the provider substitutes with the session id on redirect
pub const SESSION_ID_PLACEHOLDER: &str = "{CHECKOUT_SESSION_ID}";

const PAID: &str = "paid";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutErrorKind {
    Card,
    InvalidRequest,
    Authentication,
    ApiConnection,
    Api,
}

impl CheckoutErrorKind {
    pub fn label(&self) -> &'static str {
        match self {
            CheckoutErrorKind::Card => "Card error",
            CheckoutErrorKind::InvalidRequest => "Invalid request error",
            CheckoutErrorKind::Authentication => "Authentication error",
            CheckoutErrorKind::ApiConnection => "API connection error",
            CheckoutErrorKind::Api => "API error",
        }
    }

    /// Maps the provider's `error.type` field
    pub fn from_provider_type(error_type: &str) -> Self {
        match error_type {
            "card_error" => CheckoutErrorKind::Card,
            "invalid_request_error" => CheckoutErrorKind::InvalidRequest,
            "authentication_error" => CheckoutErrorKind::Authentication,
            "api_connection_error" => CheckoutErrorKind::ApiConnection,
            _ => CheckoutErrorKind::Api,
        }
    }

    /// Fallback when the error body could not be parsed
    pub fn from_status(status: reqwest::StatusCode) -> Self {
        match status.as_u16() {
            401 | 403 => CheckoutErrorKind::Authentication,
            402 => CheckoutErrorKind::Card,
            400 | 404 | 409 | 422 => CheckoutErrorKind::InvalidRequest,
            _ => CheckoutErrorKind::Api,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize, ToSchema)]
#[error("{}: {}", .kind.label(), .message)]
pub struct CheckoutError {
    pub kind: CheckoutErrorKind,
    pub message: String,
}

impl CheckoutError {
    pub fn new(kind: CheckoutErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for CheckoutError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_decode() {
            CheckoutErrorKind::Api
        } else {
            CheckoutErrorKind::ApiConnection
        };
        CheckoutError::new(kind, err.to_string())
    }
}

/// Provider-side checkout session
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub payment_status: String,
    #[serde(default)]
    pub client_reference_id: Option<String>,
}

impl CheckoutSession {
    pub fn is_paid(&self) -> bool {
        self.payment_status == PAID
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSessionRequest {
    pub order_id: Uuid,
    /// Payable amount in the currency's minor unit
    pub unit_amount: i64,
    pub currency: String,
    pub product_name: String,
    pub success_url: String,
    pub cancel_url: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CheckoutProvider: Send + Sync {
    async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<CheckoutSession, CheckoutError>;

    async fn retrieve_session(&self, session_id: String) -> Result<CheckoutSession, CheckoutError>;
}

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    error: ProviderErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorDetail {
    #[serde(rename = "type", default)]
    error_type: String,
    #[serde(default)]
    message: Option<String>,
}

/// Stripe-compatible REST client
#[derive(Clone)]
pub struct StripeCheckoutProvider {
    client: reqwest::Client,
    api_base: String,
    secret_key: Option<String>,
}

impl StripeCheckoutProvider {
    pub fn new(
        api_base: impl Into<String>,
        secret_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("checkout client: {}", e)))?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            secret_key,
        })
    }

    fn secret_key(&self) -> Result<&str, CheckoutError> {
        self.secret_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                CheckoutError::new(CheckoutErrorKind::Authentication, "No API key provided")
            })
    }

    fn sessions_url(&self, session_id: Option<&str>) -> Result<url::Url, CheckoutError> {
        let mut url = url::Url::parse(&format!("{}/v1/checkout/sessions", self.api_base))
            .map_err(|e| CheckoutError::new(CheckoutErrorKind::ApiConnection, e.to_string()))?;
        if let Some(id) = session_id {
            url.path_segments_mut()
                .map_err(|_| {
                    CheckoutError::new(CheckoutErrorKind::ApiConnection, "Invalid API base URL")
                })?
                .push(id);
        }
        Ok(url)
    }

    async fn parse_response(response: reqwest::Response) -> Result<CheckoutSession, CheckoutError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<CheckoutSession>().await?);
        }

        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ProviderErrorBody>(&body) {
            Ok(parsed) => Err(CheckoutError::new(
                CheckoutErrorKind::from_provider_type(&parsed.error.error_type),
                parsed
                    .error
                    .message
                    .unwrap_or_else(|| format!("Provider responded with {}", status)),
            )),
            Err(_) => Err(CheckoutError::new(
                CheckoutErrorKind::from_status(status),
                format!("Provider responded with {}", status),
            )),
        }
    }
}

#[async_trait]
impl CheckoutProvider for StripeCheckoutProvider {
    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<CheckoutSession, CheckoutError> {
        let key = self.secret_key()?;
        let order_id = request.order_id.to_string();
        let unit_amount = request.unit_amount.to_string();
        let form = [
            ("mode", "payment"),
            ("success_url", request.success_url.as_str()),
            ("cancel_url", request.cancel_url.as_str()),
            ("client_reference_id", order_id.as_str()),
            ("metadata[order_uuid]", order_id.as_str()),
            ("line_items[0][quantity]", "1"),
            ("line_items[0][price_data][currency]", request.currency.as_str()),
            ("line_items[0][price_data][unit_amount]", unit_amount.as_str()),
            (
                "line_items[0][price_data][product_data][name]",
                request.product_name.as_str(),
            ),
        ];

        let response = self
            .client
            .post(self.sessions_url(None)?)
            .bearer_auth(key)
            .form(&form)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    #[instrument(skip(self))]
    async fn retrieve_session(&self, session_id: String) -> Result<CheckoutSession, CheckoutError> {
        let key = self.secret_key()?;
        let response = self
            .client
            .get(self.sessions_url(Some(&session_id))?)
            .bearer_auth(key)
            .send()
            .await?;

        Self::parse_response(response).await
    }
}

/// Converts a decimal amount to the provider's minor unit (cents)
pub fn to_minor_units(amount: Decimal) -> Option<i64> {
    (amount * Decimal::ONE_HUNDRED).round().to_i64()
}

/// Builds the redirect URL the provider sends the buyer back to
pub fn callback_url(base: &str, order_id: Uuid) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!(
        "{}{}order_uuid={}&session_id={}",
        base, separator, order_id, SESSION_ID_PLACEHOLDER
    )
}

/// Card-payment checkout and settlement
#[derive(Clone)]
pub struct CheckoutGateway {
    provider: Arc<dyn CheckoutProvider>,
    db_pool: Arc<DbPool>,
    orders: Arc<OrderRepository>,
    notifier: StatusNotifier,
    currency: String,
    callback_url: String,
}

impl CheckoutGateway {
    pub fn new(
        provider: Arc<dyn CheckoutProvider>,
        db_pool: Arc<DbPool>,
        notifier: StatusNotifier,
        currency: impl Into<String>,
        callback_url: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            orders: Arc::new(OrderRepository::new(db_pool.clone())),
            db_pool,
            notifier,
            currency: currency.into(),
            callback_url: callback_url.into(),
        }
    }

    /// Opens a hosted checkout session for `order` and returns its redirect URL
    #[instrument(skip(self, order), fields(order_id = %order.id))]
    pub async fn create_session(&self, order: &order::Model) -> Result<String, CheckoutError> {
        let payable = order.subtotal + order.delivery_fee;
        let unit_amount = to_minor_units(payable).ok_or_else(|| {
            CheckoutError::new(CheckoutErrorKind::InvalidRequest, "Amount out of range")
        })?;

        let return_url = callback_url(&self.callback_url, order.id);
        let request = CreateSessionRequest {
            order_id: order.id,
            unit_amount,
            currency: self.currency.clone(),
            product_name: CHECKOUT_PRODUCT_NAME.to_string(),
            success_url: return_url.clone(),
            cancel_url: return_url,
        };

        let result = self.provider.create_session(request).await.and_then(|session| {
            session.url.filter(|u| !u.is_empty()).ok_or_else(|| {
                CheckoutError::new(CheckoutErrorKind::Api, "Checkout session has no redirect URL")
            })
        });

        match &result {
            Ok(_) => {
                counter!("petshop_checkout_sessions_total", 1, "outcome" => "created");
                info!(order_id = %order.id, "Checkout session created");
            }
            Err(e) => {
                counter!("petshop_checkout_sessions_total", 1, "outcome" => "failed");
                warn!(order_id = %order.id, error = %e, "Checkout session creation failed");
            }
        }
        result
    }

    /// Reconciles a provider redirect with the order. Settling twice is harmless.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn handle_callback(
        &self,
        session_id: &str,
        order_id: Uuid,
    ) -> Result<&'static str, ServiceError> {
        let session = self
            .provider
            .retrieve_session(session_id.to_string())
            .await
            .map_err(|e| {
                warn!(error = %e, order_id = %order_id, "Checkout session lookup failed");
                ServiceError::ExternalServiceError(e.to_string())
            })?;

        if let Some(reference) = session.client_reference_id.as_deref() {
            if reference != order_id.to_string() {
                return Err(ServiceError::ValidationError(
                    "Checkout session does not belong to this order".to_string(),
                ));
            }
        }

        if !session.is_paid() {
            info!(
                order_id = %order_id,
                payment_status = %session.payment_status,
                "Checkout session not paid; order left unchanged"
            );
            return Ok(CONFIRMATION_MESSAGE);
        }

        let paid = self.status_by_title(order_status::PAID).await?.ok_or_else(|| {
            error!("Order status `paid` is missing from reference data");
            ServiceError::InternalError("order status `paid` is not configured".to_string())
        })?;

        let mut blocked = Vec::with_capacity(order_status::SETTLEMENT_FINAL_TITLES.len());
        for title in order_status::SETTLEMENT_FINAL_TITLES {
            if let Some(status) = self.status_by_title(title).await? {
                blocked.push(status.id);
            }
        }

        let updated = self.orders.settle(order_id, paid.id, &blocked).await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to settle order");
            e
        })?;

        if updated == 0 {
            if self.orders.find_by_id(order_id).await?.is_none() {
                return Err(ServiceError::not_found("Order"));
            }
            info!(order_id = %order_id, "Order already shipped or canceled; settlement skipped");
            return Ok(CONFIRMATION_MESSAGE);
        }

        info!(order_id = %order_id, "Order settled");
        self.notifier.notify(order_id, order_status::PAID, Utc::now()).await;
        Ok(CONFIRMATION_MESSAGE)
    }

    async fn status_by_title(
        &self,
        title: &str,
    ) -> Result<Option<order_status::Model>, ServiceError> {
        order_status::Entity::find()
            .filter(order_status::Column::Title.eq(title))
            .one(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, title, "Failed to look up order status");
                ServiceError::DatabaseError(e)
            })
    }
}
