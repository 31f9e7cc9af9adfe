use super::types::{ChannelHandle, Transport};

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

const DEFAULT_TOPIC_CAPACITY: usize = 16;

/// In-process pub/sub substrate: one broadcast channel per topic.
pub struct InMemoryTransport {
    topics: DashMap<String, broadcast::Sender<String>>,
    capacity: usize,
}

impl InMemoryTransport {
    pub fn new() -> Arc<Self> {
        Self::with_capacity(DEFAULT_TOPIC_CAPACITY)
    }

    /// `capacity` is how many unread messages a slow subscriber may lag behind.
    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            topics: DashMap::new(),
            capacity: capacity.max(1),
        })
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<String> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Number of open subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    fn channel(&self, topic: &str) -> ChannelHandle {
        ChannelHandle::new(topic, self.sender(topic).subscribe())
    }

    async fn notify(&self, key: &str, payload: &str) -> Result<()> {
        let receivers = self.sender(key).send(payload.to_string()).unwrap_or(0);
        tracing::trace!("Notified {} subscribers of {}", receivers, key);
        Ok(())
    }
}
