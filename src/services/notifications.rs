use crate::{
    entities::order_status,
    errors::ServiceError,
    message_queue::{Message, MessageQueue},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Queue topic carrying status notifications
pub const NOTIFICATION_TOPIC: &str = "order_status";

const FALLBACK_MESSAGE: &str = "Order status updated";

/// Upper bound on the wait before a failed delivery is retried
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Human-readable message for a status title
pub fn status_message(status_title: &str) -> &'static str {
    match status_title {
        order_status::OPEN => "Your order is placed",
        order_status::PAID => "Your order payment is successfully",
        order_status::CANCELED => "Your order has been canceled",
        order_status::SHIPPED => "Your order has been shipped",
        order_status::PENDING_PAYMENT => "Your order payment is pending",
        _ => FALLBACK_MESSAGE,
    }
}

/// Body delivered to the notification channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub message: String,
    pub order_uuid: Uuid,
    pub new_status: String,
    pub timestamp: DateTime<Utc>,
}

impl NotificationPayload {
    pub fn new(order_uuid: Uuid, status_title: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            message: status_message(status_title).to_string(),
            order_uuid,
            new_status: status_title.to_string(),
            timestamp,
        }
    }
}

/// Enqueues status notifications; never fails the caller.
#[derive(Clone)]
pub struct StatusNotifier {
    queue: Arc<dyn MessageQueue>,
    max_retries: u32,
}

impl StatusNotifier {
    pub fn new(queue: Arc<dyn MessageQueue>, max_retries: u32) -> Self {
        Self { queue, max_retries }
    }

    /// Queues a notification for background delivery. Failures are logged and swallowed.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn notify(&self, order_id: Uuid, status_title: &str, timestamp: DateTime<Utc>) {
        if let Err(e) = self.enqueue(order_id, status_title, timestamp).await {
            error!(error = %e, order_id = %order_id, "Failed to enqueue status notification");
        }
    }

    async fn enqueue(
        &self,
        order_id: Uuid,
        status_title: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let payload = serde_json::to_value(NotificationPayload::new(
            order_id,
            status_title,
            timestamp,
        ))?;
        let message = Message::new(NOTIFICATION_TOPIC, payload).with_max_retries(self.max_retries);
        self.queue.publish(message).await?;
        debug!(order_id = %order_id, status = status_title, "Status notification queued");
        Ok(())
    }
}

/// Outbound transport for notifications
#[async_trait]
pub trait WebhookDelivery: Send + Sync {
    async fn deliver(&self, payload: &NotificationPayload) -> Result<(), ServiceError>;
}

/// Posts notifications to a chat-channel incoming webhook as `{"text": "<payload json>"}`
#[derive(Clone)]
pub struct ChannelWebhook {
    client: reqwest::Client,
    url: String,
}

impl ChannelWebhook {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("webhook client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl WebhookDelivery for ChannelWebhook {
    async fn deliver(&self, payload: &NotificationPayload) -> Result<(), ServiceError> {
        let text = serde_json::to_string(payload)?;
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ServiceError::ExternalServiceError(format!(
                "notification webhook responded with {}",
                response.status()
            )))
        }
    }
}

/// Used when no webhook is configured: notifications are only logged.
#[derive(Clone, Default)]
pub struct LogOnlyDelivery;

#[async_trait]
impl WebhookDelivery for LogOnlyDelivery {
    async fn deliver(&self, payload: &NotificationPayload) -> Result<(), ServiceError> {
        info!(
            order_id = %payload.order_uuid,
            status = %payload.new_status,
            message = %payload.message,
            "Status notification (no webhook configured)"
        );
        Ok(())
    }
}

/// Drains the notification topic and hands each message to a [`WebhookDelivery`]
pub struct NotificationWorker {
    queue: Arc<dyn MessageQueue>,
    delivery: Arc<dyn WebhookDelivery>,
    poll_interval: Duration,
}

impl NotificationWorker {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        delivery: Arc<dyn WebhookDelivery>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue,
            delivery,
            poll_interval,
        }
    }

    /// Wait before retry number `attempt + 1`: the poll interval doubled per earlier attempt
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        self.poll_interval
            .saturating_mul(1u32 << attempt.min(16))
            .min(MAX_RETRY_DELAY)
    }

    /// Handles at most one message. Returns `false` when no message was due.
    pub async fn run_once(&self) -> Result<bool, ServiceError> {
        let Some(message) = self.queue.subscribe(NOTIFICATION_TOPIC).await? else {
            return Ok(false);
        };

        let payload: NotificationPayload = match serde_json::from_value(message.payload.clone()) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, message_id = %message.id, "Discarding malformed notification");
                self.queue.ack(&message.id).await?;
                return Ok(true);
            }
        };

        match self.delivery.deliver(&payload).await {
            Ok(()) => {
                self.queue.ack(&message.id).await?;
                counter!("petshop_notifications_delivered_total", 1, "outcome" => "delivered");
                debug!(order_id = %payload.order_uuid, "Status notification delivered");
            }
            Err(e) => {
                let delay = self.retry_delay(message.retry_count);
                let requeued = self.queue.nack(&message.id, delay).await?;
                if requeued {
                    counter!("petshop_notifications_delivered_total", 1, "outcome" => "retried");
                    warn!(
                        error = %e,
                        order_id = %payload.order_uuid,
                        attempt = message.retry_count + 1,
                        retry_in_ms = delay.as_millis() as u64,
                        "Status notification delivery failed; will retry"
                    );
                } else {
                    counter!("petshop_notifications_delivered_total", 1, "outcome" => "dropped");
                    error!(
                        error = %e,
                        order_id = %payload.order_uuid,
                        "Status notification dropped after exhausting retries"
                    );
                }
            }
        }

        Ok(true)
    }

    /// Polls until `shutdown` flips to `true`
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("Notification worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_once().await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => error!(error = %e, "Notification worker iteration failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("Notification worker stopped");
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
