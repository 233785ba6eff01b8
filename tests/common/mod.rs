#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use petshop_api::{
    config::AppConfig,
    db,
    entities::{
        order_status,
        payment::{self, CardDetails, CashOnDeliveryDetails, PaymentDetails},
        product, user,
    },
    message_queue::{InMemoryMessageQueue, Message, MessageQueue},
    services::{
        checkout::{
            CheckoutError, CheckoutErrorKind, CheckoutProvider, CheckoutSession,
            CreateSessionRequest,
        },
        notifications::NOTIFICATION_TOPIC,
    },
    AppState,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

/// In-process stand-in for the hosted checkout provider
#[derive(Default)]
pub struct FakeCheckoutProvider {
    sessions: Mutex<HashMap<String, CheckoutSession>>,
    requests: Mutex<Vec<CreateSessionRequest>>,
    failure: Mutex<Option<CheckoutError>>,
    counter: AtomicUsize,
}

impl FakeCheckoutProvider {
    /// Makes every following session creation fail with `kind`
    pub fn fail_with(&self, kind: CheckoutErrorKind, message: &str) {
        *self.failure.lock().unwrap() = Some(CheckoutError::new(kind, message));
    }

    pub fn mark_paid(&self, session_id: &str) {
        if let Some(session) = self.sessions.lock().unwrap().get_mut(session_id) {
            session.payment_status = "paid".to_string();
        }
    }

    pub fn session_for(&self, order_id: Uuid) -> Option<CheckoutSession> {
        let reference = order_id.to_string();
        self.sessions
            .lock()
            .unwrap()
            .values()
            .find(|s| s.client_reference_id.as_deref() == Some(reference.as_str()))
            .cloned()
    }

    pub fn requests(&self) -> Vec<CreateSessionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CheckoutProvider for FakeCheckoutProvider {
    async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<CheckoutSession, CheckoutError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(err) = self.failure.lock().unwrap().clone() {
            return Err(err);
        }

        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("cs_test_{}", n);
        let session = CheckoutSession {
            id: id.clone(),
            url: Some(format!("https://checkout.test/pay/{}", id)),
            payment_status: "unpaid".to_string(),
            client_reference_id: Some(request.order_id.to_string()),
        };
        self.sessions.lock().unwrap().insert(id, session.clone());
        Ok(session)
    }

    async fn retrieve_session(&self, session_id: String) -> Result<CheckoutSession, CheckoutError> {
        self.sessions
            .lock()
            .unwrap()
            .get(&session_id)
            .cloned()
            .ok_or_else(|| {
                CheckoutError::new(
                    CheckoutErrorKind::InvalidRequest,
                    format!("No such checkout session: '{}'", session_id),
                )
            })
    }
}

/// Helper harness for spinning up the application backed by an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub provider: Arc<FakeCheckoutProvider>,
    pub queue: Arc<InMemoryMessageQueue>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_queue_capacity(1000).await
    }

    /// App whose notification queue holds at most `capacity` messages
    pub async fn with_queue_capacity(capacity: usize) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.trust_identity_headers = true;
        cfg.checkout_callback_url = "https://shop.test/api/v1/checkout/callback".to_string();

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        db::seed_order_statuses(&pool)
            .await
            .expect("failed to seed order statuses");

        let provider = Arc::new(FakeCheckoutProvider::default());
        let queue = Arc::new(InMemoryMessageQueue::with_max_size(capacity));
        let state = AppState::new(Arc::new(pool), cfg, provider.clone(), queue.clone());
        let router = petshop_api::build_router(state.clone());

        Self {
            router,
            state,
            provider,
            queue,
        }
    }

    /// Sends a request, optionally as `caller`
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        caller: Option<&user::Model>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(user) = caller {
            builder = builder
                .header("x-user-id", user.id.to_string())
                .header("x-user-admin", if user.is_admin { "true" } else { "false" });
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        self.router
            .clone()
            .oneshot(builder.body(body).expect("failed to build request"))
            .await
            .expect("router error during test request")
    }

    pub async fn seed_user(&self, email: &str, is_admin: bool) -> user::Model {
        let now = Utc::now();
        user::ActiveModel {
            id: Set(Uuid::new_v4()),
            first_name: Set("Test".into()),
            last_name: Set("User".into()),
            email: Set(email.to_string()),
            is_admin: Set(is_admin),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed user")
    }

    pub async fn seed_product(&self, title: &str, price: Decimal) -> product::Model {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            title: Set(title.to_string()),
            price: Set(price),
            description: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            deleted_at: Set(None),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product")
    }

    async fn seed_payment(&self, details: PaymentDetails) -> payment::Model {
        let now = Utc::now();
        payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            kind: Set(details.kind()),
            details: Set(details),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed payment")
    }

    pub async fn seed_card_payment(&self) -> payment::Model {
        self.seed_payment(PaymentDetails::CreditCard(CardDetails {
            holder_name: "Jane Doe".into(),
            number: "4242424242424242".into(),
            ccv: "123".into(),
            expire_date: "12/29".into(),
        }))
        .await
    }

    pub async fn seed_cash_payment(&self) -> payment::Model {
        self.seed_payment(PaymentDetails::CashOnDelivery(CashOnDeliveryDetails {
            first_name: "Jane".into(),
            last_name: "Doe".into(),
            address: "1 Main St".into(),
        }))
        .await
    }

    pub async fn status(&self, title: &str) -> order_status::Model {
        order_status::Entity::find()
            .filter(order_status::Column::Title.eq(title))
            .one(&*self.state.db)
            .await
            .expect("status lookup")
            .expect("seeded status")
    }

    /// Drains every queued status notification
    pub async fn drain_notifications(&self) -> Vec<Message> {
        let mut drained = Vec::new();
        while let Some(message) = self
            .queue
            .subscribe(NOTIFICATION_TOPIC)
            .await
            .expect("queue subscribe")
        {
            self.queue.ack(&message.id).await.expect("queue ack");
            drained.push(message);
        }
        drained
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

pub async fn response_text(response: Response) -> String {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    String::from_utf8(bytes.to_vec()).expect("utf-8 response")
}
