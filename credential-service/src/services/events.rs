//! Fire-and-forget notifications for the notification component.

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

use crate::config::RedisConfig;
use crate::services::non_critical;

pub const TOPIC_PASSWORD_RESET_REQUESTED: &str = "auth.event.password_reset_requested";
pub const TOPIC_VERIFICATION_REQUESTED: &str = "auth.event.verification_requested";
pub const TOPIC_PASSWORD_RESET_COMPLETED: &str = "auth.event.password_reset_completed";

/// Wire envelope: the owning user plus the event body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "ownerId")]
    pub owner_id: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordResetRequested {
    pub email: String,
    pub token: String,
    pub user_id: i64,
    pub user_name: String,
    /// Unix seconds
    pub expires_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationRequested {
    pub user_id: i64,
    pub email: String,
    pub name: String,
    pub verification_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordResetCompleted {
    pub user_id: i64,
    pub email: String,
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, envelope: &EventEnvelope) -> Result<(), anyhow::Error>;
}

/// Publishes envelopes as JSON on Redis pub/sub channels named after the topic.
#[derive(Clone)]
pub struct RedisEventPublisher {
    manager: ConnectionManager,
}

impl RedisEventPublisher {
    pub async fn new(config: &RedisConfig) -> Result<Self, anyhow::Error> {
        tracing::info!("Connecting to Redis event bus");
        let client = Client::open(config.url.clone())?;

        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis event bus");

        Ok(Self { manager })
    }
}

#[async_trait]
impl EventPublisher for RedisEventPublisher {
    async fn publish(&self, topic: &str, envelope: &EventEnvelope) -> Result<(), anyhow::Error> {
        let payload = serde_json::to_string(envelope)?;
        let mut conn = self.manager.clone();

        let receivers: i64 = redis::cmd("PUBLISH")
            .arg(topic)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to publish {}: {}", topic, e))?;

        tracing::debug!(topic = %topic, receivers = receivers, "Event published");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedEvent {
    pub topic: String,
    pub envelope: EventEnvelope,
}

/// Records published events; can be switched to fail every publish.
#[derive(Default)]
pub struct MockEventPublisher {
    events: Mutex<Vec<PublishedEvent>>,
    failing: AtomicBool,
}

impl MockEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<PublishedEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn published_on(&self, topic: &str) -> Vec<PublishedEvent> {
        self.published()
            .into_iter()
            .filter(|e| e.topic == topic)
            .collect()
    }
}

#[async_trait]
impl EventPublisher for MockEventPublisher {
    async fn publish(&self, topic: &str, envelope: &EventEnvelope) -> Result<(), anyhow::Error> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("event bus unavailable");
        }
        self.events
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock publisher mutex poisoned: {}", e))?
            .push(PublishedEvent {
                topic: topic.to_string(),
                envelope: envelope.clone(),
            });
        Ok(())
    }
}

/// Wraps a publisher so every notification runs as a detached non-critical
/// step.
#[derive(Clone)]
pub struct EventNotifier {
    publisher: Arc<dyn EventPublisher>,
}

impl EventNotifier {
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self { publisher }
    }

    pub fn password_reset_requested(&self, event: PasswordResetRequested) -> JoinHandle<Option<()>> {
        let owner = event.user_id;
        self.notify(TOPIC_PASSWORD_RESET_REQUESTED, owner, &event)
    }

    pub fn verification_requested(&self, event: VerificationRequested) -> JoinHandle<Option<()>> {
        let owner = event.user_id;
        self.notify(TOPIC_VERIFICATION_REQUESTED, owner, &event)
    }

    pub fn password_reset_completed(&self, event: PasswordResetCompleted) -> JoinHandle<Option<()>> {
        let owner = event.user_id;
        self.notify(TOPIC_PASSWORD_RESET_COMPLETED, owner, &event)
    }

    fn notify<E: Serialize>(
        &self,
        topic: &'static str,
        owner_id: i64,
        event: &E,
    ) -> JoinHandle<Option<()>> {
        let publisher = self.publisher.clone();
        let data = serde_json::to_value(event);

        non_critical::spawn(topic, async move {
            let envelope = EventEnvelope {
                owner_id: owner_id.to_string(),
                data: data?,
            };
            publisher.publish(topic, &envelope).await?;
            tracing::info!(topic = %topic, owner_id = owner_id, "Event published");
            Ok::<_, anyhow::Error>(())
        })
    }
}
