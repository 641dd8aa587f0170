//! Event sinks: where observer events go.
//!
//! Publishing never fails from the caller's point of view: a sink that cannot
//! deliver logs the problem and drops the event, so a slow or absent observer
//! can never stall the dispatch loop.

use std::sync::Arc;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::broadcast;

use relay_common::types::DispatchEvent;

/// Publish channel towards observers.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: DispatchEvent);
}

/// In-process fan-out over a tokio broadcast channel (feeds the SSE route).
#[derive(Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<DispatchEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl EventSink for BroadcastSink {
    async fn publish(&self, event: DispatchEvent) {
        // No subscribers is the normal idle case, not an error.
        let _ = self.tx.send(event);
    }
}

/// Publishes every event as JSON on a Redis pub/sub channel.
pub struct RedisEventSink {
    redis: ConnectionManager,
    channel: String,
}

impl RedisEventSink {
    pub fn new(redis: ConnectionManager, channel: impl Into<String>) -> Self {
        Self {
            redis,
            channel: channel.into(),
        }
    }
}

#[async_trait]
impl EventSink for RedisEventSink {
    async fn publish(&self, event: DispatchEvent) {
        let payload = match serde_json::to_string(&event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize observer event");
                return;
            }
        };

        let mut redis = self.redis.clone();
        if let Err(e) = redis.publish::<_, _, ()>(&self.channel, payload).await {
            tracing::warn!(
                channel = %self.channel,
                event = event.name(),
                error = %e,
                "Failed to publish observer event to Redis"
            );
        }
    }
}

/// Delivers each event to every inner sink, in order.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl EventSink for FanoutSink {
    async fn publish(&self, event: DispatchEvent) {
        for sink in &self.sinks {
            sink.publish(event.clone()).await;
        }
    }
}
