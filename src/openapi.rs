use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Pet Shop API",
        version = "0.1.0",
        description = r#"
# Pet Shop ordering API

Order placement and amendment, payment registration and hosted card checkout.

## Identity

Caller identity is supplied by the upstream gateway through the `x-user-id`
and `x-user-admin` headers. Non-admin callers only see their own orders.

## Card payments

Orders paid by card receive a hosted checkout `payment_url`. The provider
redirects the buyer to `/api/v1/checkout/callback`, which settles the order.

## Errors

```json
{
  "error": "Unprocessable Entity",
  "message": "Validation failed",
  "errors": [{"field": "products.0.uuid", "message": "The selected product does not exist"}],
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "orders", description = "Order placement, amendment and listing"),
        (name = "payments", description = "Payment methods"),
        (name = "checkout", description = "Hosted checkout callbacks")
    ),
    paths(
        crate::handlers::orders::create_order,
        crate::handlers::orders::update_order,
        crate::handlers::orders::get_order,
        crate::handlers::orders::list_orders,
        crate::handlers::payments::create_payment,
        crate::handlers::payments::get_payment,
        crate::handlers::checkout::checkout_callback,
        crate::handlers::checkout::stripe_payment_callback,
    ),
    components(
        schemas(
            crate::services::orders::OrderRequest,
            crate::services::orders::OrderLineRequest,
            crate::services::orders::OrderSubmission,
            crate::services::orders::OrderUpdated,
            crate::services::orders::OrderView,
            crate::services::payments::CreatePaymentRequest,
            crate::services::payments::PaymentView,
            crate::entities::payment::PaymentDetails,
            crate::entities::payment::PaymentKind,
            crate::entities::order::OrderAddress,
            crate::entities::order::LineItemSnapshot,
            crate::errors::ErrorResponse,
            crate::errors::FieldError
        )
    )
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_order_and_callback_paths() {
        let json = serde_json::to_string(&ApiDocV1::openapi()).unwrap();
        assert!(json.contains("Pet Shop API"));
        assert!(json.contains("/api/v1/order/{uuid}"));
        assert!(json.contains("/api/v1/checkout/callback"));
    }
}
