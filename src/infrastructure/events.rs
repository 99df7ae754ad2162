//! Event publishers: structured log, NATS, and an in-memory recorder.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::events::{DomainEvent, OrderEvent};
use crate::ports::EventPublisher;
use crate::{EcommerceError, Result};

/// Writes every event to the tracing log.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingPublisher;

#[async_trait]
impl EventPublisher for TracingPublisher {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        match &event {
            DomainEvent::Order(OrderEvent::StatusChanged { order_id, from, to, actor, at }) => {
                tracing::info!(%order_id, %from, %to, %actor, %at, "order status changed");
            }
            DomainEvent::Order(OrderEvent::PaymentStatusChanged { order_id, from, to, actor, at }) => {
                tracing::info!(%order_id, %from, %to, %actor, %at, "payment status changed");
            }
            other => tracing::info!(kind = other.kind(), event = ?other, "domain event"),
        }
        Ok(())
    }
}

/// Publishes JSON-encoded events to `<prefix>.<kind>` and logs them as well.
#[derive(Clone)]
pub struct NatsPublisher {
    client: async_nats::Client,
    prefix: String,
}

impl NatsPublisher {
    pub fn new(client: async_nats::Client, prefix: impl Into<String>) -> Self {
        Self { client, prefix: prefix.into() }
    }
}

#[async_trait]
impl EventPublisher for NatsPublisher {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        let subject = format!("{}.{}", self.prefix, event.kind());
        let payload = serde_json::to_vec(&event)?;
        TracingPublisher.publish(event).await?;
        self.client
            .publish(subject, payload.into())
            .await
            .map_err(|e| EcommerceError::Publish(e.to_string()))
    }
}

/// Keeps events in memory.
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<DomainEvent>>,
}

impl RecordingPublisher {
    pub async fn events(&self) -> Vec<DomainEvent> { self.events.lock().await.clone() }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        self.events.lock().await.push(event);
        Ok(())
    }
}
