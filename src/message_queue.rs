/*!
 * # Message Queue
 *
 * Topic-keyed queue used to hand work from request handlers to background
 * workers. Consumers `subscribe` to take the next due message, then `ack` it
 * once handled or `nack` it to have it redelivered after a delay until its
 * retry budget runs out.
 */

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::error;
use uuid::Uuid;

/// Message queue errors
#[derive(Error, Debug)]
pub enum MessageQueueError {
    #[error("Queue is full")]
    QueueFull,
    #[error("Unknown message: {0}")]
    UnknownMessage(Uuid),
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Message envelope for queue items
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub topic: String,
    pub payload: serde_json::Value,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Not handed out before this instant
    #[serde(default)]
    pub available_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            payload,
            timestamp: chrono::Utc::now(),
            retry_count: 0,
            max_retries: 3,
            available_at: None,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    pub fn is_due(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.available_at.map_or(true, |at| at <= now)
    }
}

/// Message queue trait for different implementations
#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn publish(&self, message: Message) -> Result<(), MessageQueueError>;
    /// Takes the oldest due message of `topic`; it stays in flight until acked or nacked.
    async fn subscribe(&self, topic: &str) -> Result<Option<Message>, MessageQueueError>;
    async fn ack(&self, message_id: &Uuid) -> Result<(), MessageQueueError>;
    /// Requeues an in-flight message with its retry count bumped, due again after `delay`.
    /// Returns `false` when the retry budget was exhausted and the message was dropped.
    async fn nack(&self, message_id: &Uuid, delay: Duration) -> Result<bool, MessageQueueError>;
}

#[derive(Debug, Default)]
struct QueueState {
    topics: HashMap<String, VecDeque<Message>>,
    in_flight: HashMap<Uuid, Message>,
}

/// In-memory message queue implementation
#[derive(Debug)]
pub struct InMemoryMessageQueue {
    state: Mutex<QueueState>,
    max_size: usize,
}

impl Default for InMemoryMessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMessageQueue {
    pub fn new() -> Self {
        Self::with_max_size(1000)
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            max_size,
        }
    }

    /// Number of messages waiting on `topic`, due or not, excluding in-flight ones
    pub async fn pending(&self, topic: &str) -> usize {
        self.state
            .lock()
            .await
            .topics
            .get(topic)
            .map(VecDeque::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageQueue for InMemoryMessageQueue {
    async fn publish(&self, message: Message) -> Result<(), MessageQueueError> {
        let mut state = self.state.lock().await;
        let queue = state.topics.entry(message.topic.clone()).or_default();

        if queue.len() >= self.max_size {
            return Err(MessageQueueError::QueueFull);
        }

        queue.push_back(message);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Option<Message>, MessageQueueError> {
        let now = chrono::Utc::now();
        let mut state = self.state.lock().await;
        let next = state.topics.get_mut(topic).and_then(|queue| {
            let position = queue.iter().position(|m| m.is_due(now))?;
            queue.remove(position)
        });
        if let Some(message) = &next {
            state.in_flight.insert(message.id, message.clone());
        }
        Ok(next)
    }

    async fn ack(&self, message_id: &Uuid) -> Result<(), MessageQueueError> {
        let mut state = self.state.lock().await;
        state
            .in_flight
            .remove(message_id)
            .map(|_| ())
            .ok_or(MessageQueueError::UnknownMessage(*message_id))
    }

    async fn nack(&self, message_id: &Uuid, delay: Duration) -> Result<bool, MessageQueueError> {
        let mut state = self.state.lock().await;
        let mut message = state
            .in_flight
            .remove(message_id)
            .ok_or(MessageQueueError::UnknownMessage(*message_id))?;

        if message.retries_exhausted() {
            error!(
                message_id = %message.id,
                topic = %message.topic,
                retry_count = message.retry_count,
                "Dropping message after exhausting retries"
            );
            return Ok(false);
        }

        message.retry_count += 1;
        let delay = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        message.available_at = Some(chrono::Utc::now() + delay);
        state
            .topics
            .entry(message.topic.clone())
            .or_default()
            .push_back(message);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn publish_then_subscribe_in_order() {
        let queue = InMemoryMessageQueue::new();
        queue
            .publish(Message::new("orders", serde_json::json!({"n": 1})))
            .await
            .unwrap();
        queue
            .publish(Message::new("orders", serde_json::json!({"n": 2})))
            .await
            .unwrap();

        let first = queue.subscribe("orders").await.unwrap().unwrap();
        assert_eq!(first.payload["n"], 1);
        queue.ack(&first.id).await.unwrap();

        let second = queue.subscribe("orders").await.unwrap().unwrap();
        assert_eq!(second.payload["n"], 2);
        assert!(queue.subscribe("orders").await.unwrap().is_none());
        assert!(queue.subscribe("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejects_when_full() {
        let queue = InMemoryMessageQueue::with_max_size(1);
        queue
            .publish(Message::new("t", serde_json::Value::Null))
            .await
            .unwrap();
        let err = queue
            .publish(Message::new("t", serde_json::Value::Null))
            .await
            .unwrap_err();
        assert_matches!(err, MessageQueueError::QueueFull);
    }

    #[tokio::test]
    async fn nack_redelivers_until_budget_is_spent() {
        let queue = InMemoryMessageQueue::new();
        queue
            .publish(Message::new("t", serde_json::Value::Null).with_max_retries(1))
            .await
            .unwrap();

        let first = queue.subscribe("t").await.unwrap().unwrap();
        assert!(queue.nack(&first.id, Duration::ZERO).await.unwrap());

        let retry = queue.subscribe("t").await.unwrap().unwrap();
        assert_eq!(retry.retry_count, 1);
        assert!(!queue.nack(&retry.id, Duration::ZERO).await.unwrap());
        assert_eq!(queue.pending("t").await, 0);
    }

    #[tokio::test]
    async fn nacked_message_waits_out_its_delay() {
        let queue = InMemoryMessageQueue::new();
        queue
            .publish(Message::new("t", serde_json::json!({"n": 1})))
            .await
            .unwrap();
        let first = queue.subscribe("t").await.unwrap().unwrap();
        assert!(queue.nack(&first.id, Duration::from_millis(50)).await.unwrap());

        queue
            .publish(Message::new("t", serde_json::json!({"n": 2})))
            .await
            .unwrap();
        let next = queue.subscribe("t").await.unwrap().unwrap();
        assert_eq!(next.payload["n"], 2);
        queue.ack(&next.id).await.unwrap();

        assert!(queue.subscribe("t").await.unwrap().is_none());
        assert_eq!(queue.pending("t").await, 1);

        tokio::time::sleep(Duration::from_millis(80)).await;
        let retry = queue.subscribe("t").await.unwrap().unwrap();
        assert_eq!(retry.payload["n"], 1);
        assert_eq!(retry.retry_count, 1);
    }

    #[tokio::test]
    async fn ack_of_unknown_message_fails() {
        let queue = InMemoryMessageQueue::new();
        assert_matches!(
            queue.ack(&Uuid::new_v4()).await,
            Err(MessageQueueError::UnknownMessage(_))
        );
    }
}
