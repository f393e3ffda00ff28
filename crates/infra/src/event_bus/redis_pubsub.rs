//! Redis pub/sub-backed event publisher (optional).
//!
//! Each event goes to `<prefix>.<routing key>` as a JSON `EventEnvelope`.
//! Redis pub/sub is not durable: messages published while no subscriber is
//! connected are dropped.

use std::marker::PhantomData;

use async_trait::async_trait;
use redis::Commands;
use serde::Serialize;
use tracing::{debug, warn};

use aetos_events::{Event, EventEnvelope, EventPublisher};

use crate::config::EventBusConfig;

#[derive(Debug, thiserror::Error)]
pub enum RedisBusError {
    #[error("redis error: {0}")]
    Redis(String),
    #[error("serialization error: {0}")]
    Serialize(String),
}

/// Redis pub/sub publisher for JSON event envelopes.
#[derive(Debug)]
pub struct RedisEventPublisher<E> {
    client: redis::Client,
    channel_prefix: String,
    _event: PhantomData<fn(E)>,
}

impl<E> Clone for RedisEventPublisher<E> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            channel_prefix: self.channel_prefix.clone(),
            _event: PhantomData,
        }
    }
}

pub fn channel_for(prefix: &str, routing_key: &str) -> String {
    format!("{prefix}.{routing_key}")
}

impl<E> RedisEventPublisher<E>
where
    E: Event + Serialize,
{
    pub fn new(redis_url: impl AsRef<str>, channel_prefix: impl Into<String>) -> Result<Self, RedisBusError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| RedisBusError::Redis(e.to_string()))?;
        Ok(Self {
            client,
            channel_prefix: channel_prefix.into(),
            _event: PhantomData,
        })
    }

    /// `None` when no Redis URL is configured.
    pub fn from_config(config: &EventBusConfig) -> Result<Option<Self>, RedisBusError> {
        config
            .redis_url
            .as_deref()
            .map(|url| Self::new(url, config.channel_prefix.clone()))
            .transpose()
    }

    /// Publish one envelope, reporting transport failures.
    pub async fn try_publish(&self, event: E) -> Result<(), RedisBusError> {
        let channel = channel_for(&self.channel_prefix, &event.routing_key());
        let payload = serde_json::to_string(&EventEnvelope::wrap(event))
            .map_err(|e| RedisBusError::Serialize(e.to_string()))?;

        let client = self.client.clone();
        // The sync client blocks; keep it off the runtime's worker threads.
        tokio::task::spawn_blocking(move || {
            let mut conn = client
                .get_connection()
                .map_err(|e| RedisBusError::Redis(e.to_string()))?;

            let receivers: i64 = conn
                .publish(&channel, payload)
                .map_err(|e| RedisBusError::Redis(e.to_string()))?;

            debug!(channel = %channel, receivers, "event published");
            Ok(())
        })
        .await
        .map_err(|e| RedisBusError::Redis(format!("publish task failed: {e}")))?
    }
}

#[async_trait]
impl<E> EventPublisher<E> for RedisEventPublisher<E>
where
    E: Event + Serialize,
{
    async fn publish(&self, event: E) {
        let event_id = event.event_id();
        let event_type = event.event_type();
        if let Err(e) = self.try_publish(event).await {
            warn!(%event_id, event_type, error = %e, "failed to publish event; dropping it");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_is_prefix_dot_routing_key() {
        assert_eq!(
            channel_for("orchestrator.events", "listing.state.sold"),
            "orchestrator.events.listing.state.sold"
        );
    }

    #[test]
    fn missing_url_means_no_publisher() {
        let config = EventBusConfig {
            redis_url: None,
            channel_prefix: "orchestrator.events".to_string(),
        };

        let publisher =
            RedisEventPublisher::<aetos_listings::ListingEvent>::from_config(&config).unwrap();
        assert!(publisher.is_none());
    }
}
