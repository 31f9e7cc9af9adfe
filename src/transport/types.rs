use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{mpsc, oneshot};

/// Topic carrying the heartbeat tokens of one service instance.
pub fn heartbeat_topic(name: &str, address: &str) -> String {
    format!("{}@{}", name, address)
}

/// Topic on which consumers ask an instance for an out-of-band heartbeat.
pub fn resync_topic(name: &str, address: &str) -> String {
    format!("{}@{}#resync", name, address)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// The callback accepted a message.
    Delivered,
    /// The timeout elapsed (or the channel closed) first.
    TimedOut,
}

/// An open subscription to one topic.
pub struct ChannelHandle {
    topic: String,
    receiver: broadcast::Receiver<String>,
}

impl ChannelHandle {
    pub fn new(topic: &str, receiver: broadcast::Receiver<String>) -> Self {
        Self {
            topic: topic.to_string(),
            receiver,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next message, or `None` once `timeout` elapses. `None` timeout waits forever.
    pub async fn next(&mut self, timeout: Option<Duration>) -> Option<String> {
        match timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.recv()).await.ok().flatten(),
            None => self.recv().await,
        }
    }

    async fn recv(&mut self) -> Option<String> {
        loop {
            match self.receiver.recv().await {
                Ok(message) => return Some(message),
                Err(RecvError::Lagged(missed)) => {
                    tracing::trace!("Subscriber of {} skipped {} messages", self.topic, missed);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens a subscription; messages sent before this call are not seen.
    fn channel(&self, topic: &str) -> ChannelHandle;

    /// Sends one payload to everyone currently subscribed to `key`.
    async fn notify(&self, key: &str, payload: &str) -> Result<()>;

    /// Waits for the next payload on `key`. `None` means the timeout elapsed.
    async fn wait(&self, key: &str, timeout: Option<Duration>) -> Option<String> {
        let mut handle = self.channel(key);
        handle.next(timeout).await
    }

    /// Feeds messages to `on_message` until it returns `true` or `timeout` elapses.
    ///
    /// The timeout bounds the whole subscription, not each message.
    async fn subscribe(
        &self,
        handle: &mut ChannelHandle,
        timeout: Option<Duration>,
        on_message: &mut (dyn for<'m> FnMut(&'m str) -> bool + Send),
    ) -> SubscribeOutcome {
        let delivery = async {
            while let Some(message) = handle.next(None).await {
                if on_message(&message) {
                    return SubscribeOutcome::Delivered;
                }
            }
            SubscribeOutcome::TimedOut
        };

        match timeout {
            Some(timeout) => tokio::time::timeout(timeout, delivery)
                .await
                .unwrap_or(SubscribeOutcome::TimedOut),
            None => delivery.await,
        }
    }

    /// Forwards every token from `tokens` onto `topic` until `shutdown` fires
    /// or the token source closes.
    async fn publish(
        &self,
        topic: &str,
        mut tokens: mpsc::Receiver<String>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                token = tokens.recv() => match token {
                    Some(token) => {
                        if let Err(e) = self.notify(topic, &token).await {
                            tracing::warn!("Failed to publish on {}: {}", topic, e);
                        }
                    }
                    None => break,
                },
            }
        }

        tracing::debug!("Publisher for {} stopped", topic);
    }
}
