//! Integration tests for the hosted checkout callback and order settlement.

mod common;

use axum::http::{Method, StatusCode};
use common::{response_json, response_text, TestApp};
use petshop_api::entities::{order, order_status, user};
use petshop_api::services::checkout::CONFIRMATION_MESSAGE;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, EntityTrait, ModelTrait, Set};
use serde_json::json;
use uuid::Uuid;

struct PlacedOrder {
    id: Uuid,
    session_id: String,
}

async fn place_card_order(app: &TestApp, user: &user::Model) -> PlacedOrder {
    let food = app.seed_product("Dog food", dec!(100)).await;
    let payment = app.seed_card_payment().await;
    let open = app.status(order_status::OPEN).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/order",
            Some(json!({
                "order_status_uuid": open.id,
                "payment_uuid": payment.id,
                "products": [{"uuid": food.id, "quantity": 2}],
                "address": {"billing": "1 Main St", "shipping": "1 Main St"}
            })),
            Some(user),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = response_json(response).await;
    let id = Uuid::parse_str(body["data"]["order_uuid"].as_str().unwrap()).unwrap();
    let session_id = app.provider.session_for(id).expect("checkout session").id;
    app.drain_notifications().await;

    PlacedOrder { id, session_id }
}

async fn status_title(app: &TestApp, order_id: Uuid) -> String {
    let order = order::Entity::find_by_id(order_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    order_status::Entity::find_by_id(order.order_status_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap()
        .title
}

fn callback_uri(session_id: &str, order_id: Uuid) -> String {
    format!(
        "/api/v1/checkout/callback?session_id={}&order_uuid={}",
        session_id, order_id
    )
}

#[tokio::test]
async fn paid_session_settles_the_order_idempotently() {
    let app = TestApp::new().await;
    let user = app.seed_user("jane@example.com", false).await;
    let placed = place_card_order(&app, &user).await;
    app.provider.mark_paid(&placed.session_id);

    for _ in 0..2 {
        let response = app
            .request(Method::GET, &callback_uri(&placed.session_id, placed.id), None, None)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_text(response).await, CONFIRMATION_MESSAGE);
        assert_eq!(status_title(&app, placed.id).await, "paid");
    }

    let notifications = app.drain_notifications().await;
    assert!(!notifications.is_empty());
    assert!(notifications
        .iter()
        .all(|n| n.payload["message"] == "Your order payment is successfully"));
}

#[tokio::test]
async fn unpaid_session_leaves_the_order_unchanged() {
    let app = TestApp::new().await;
    let user = app.seed_user("jane@example.com", false).await;
    let placed = place_card_order(&app, &user).await;

    let response = app
        .request(Method::GET, &callback_uri(&placed.session_id, placed.id), None, None)
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_text(response).await, CONFIRMATION_MESSAGE);
    assert_eq!(status_title(&app, placed.id).await, "open");
    assert!(app.drain_notifications().await.is_empty());
}

#[tokio::test]
async fn settlement_never_reopens_a_shipped_order() {
    let app = TestApp::new().await;
    let user = app.seed_user("jane@example.com", false).await;
    let placed = place_card_order(&app, &user).await;
    let shipped = app.status(order_status::SHIPPED).await;

    order::ActiveModel {
        id: Set(placed.id),
        order_status_id: Set(shipped.id),
        ..Default::default()
    }
    .update(&*app.state.db)
    .await
    .unwrap();
    app.provider.mark_paid(&placed.session_id);

    let response = app
        .request(Method::GET, &callback_uri(&placed.session_id, placed.id), None, None)
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(status_title(&app, placed.id).await, "shipped");
    assert!(app.drain_notifications().await.is_empty());
}

#[tokio::test]
async fn missing_paid_status_is_an_opaque_internal_error() {
    let app = TestApp::new().await;
    let user = app.seed_user("jane@example.com", false).await;
    let placed = place_card_order(&app, &user).await;
    app.provider.mark_paid(&placed.session_id);

    app.status(order_status::PAID)
        .await
        .delete(&*app.state.db)
        .await
        .unwrap();

    let response = app
        .request(Method::GET, &callback_uri(&placed.session_id, placed.id), None, None)
        .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = response_json(response).await;
    assert_eq!(body["message"], "Internal server error");
    assert!(!body.to_string().contains("paid"));
    assert_eq!(status_title(&app, placed.id).await, "open");
    assert!(app.drain_notifications().await.is_empty());
}

#[tokio::test]
async fn path_form_of_the_callback_is_supported() {
    let app = TestApp::new().await;
    let user = app.seed_user("jane@example.com", false).await;
    let placed = place_card_order(&app, &user).await;
    app.provider.mark_paid(&placed.session_id);

    let response = app
        .request(
            Method::GET,
            &format!(
                "/api/v1/stripe/payment/{}?session_id={}",
                placed.id, placed.session_id
            ),
            None,
            None,
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(status_title(&app, placed.id).await, "paid");
}

#[tokio::test]
async fn session_of_another_order_is_rejected() {
    let app = TestApp::new().await;
    let user = app.seed_user("jane@example.com", false).await;
    let first = place_card_order(&app, &user).await;
    let second = place_card_order(&app, &user).await;
    app.provider.mark_paid(&first.session_id);

    let response = app
        .request(Method::GET, &callback_uri(&first.session_id, second.id), None, None)
        .await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(status_title(&app, second.id).await, "open");
}

#[tokio::test]
async fn unknown_session_is_an_upstream_error() {
    let app = TestApp::new().await;
    let response = app
        .request(Method::GET, &callback_uri("cs_missing", Uuid::now_v7()), None, None)
        .await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(
        response_json(response).await["message"],
        "Upstream service error"
    );
}
