//! Publish/subscribe hub feeding subscription event streams.

use crate::error::{SdkError, SdkResult};
use futures::stream;
use serde::{de::DeserializeOwned, Serialize};
use sluice_runtime::{EventStream, EventStreamError};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;

const DEFAULT_CAPACITY: usize = 256;

/// A publish/subscribe hub keyed by topic.
///
/// Every topic is a broadcast channel. A subscriber that falls more than
/// `capacity` events behind skips the events it missed.
#[derive(Clone)]
pub struct PubSub {
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<serde_json::Value>>>>,
    capacity: usize,
}

impl Default for PubSub {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PubSub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSub")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl PubSub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Publishes `event` on `topic`, returning how many subscribers got it.
    pub async fn publish(&self, topic: impl AsRef<str>, event: serde_json::Value) -> usize {
        let topic = topic.as_ref();
        let channels = self.channels.read().await;

        let delivered = match channels.get(topic) {
            Some(sender) => sender.send(event).unwrap_or(0),
            None => 0,
        };
        tracing::debug!(topic, delivered, "event published");
        delivered
    }

    pub async fn subscribe(
        &self,
        topic: impl Into<String>,
    ) -> broadcast::Receiver<serde_json::Value> {
        let topic = topic.into();
        let mut channels = self.channels.write().await;

        if let Some(sender) = channels.get(&topic) {
            sender.subscribe()
        } else {
            let (sender, receiver) = broadcast::channel(self.capacity);
            channels.insert(topic, sender);
            receiver
        }
    }

    /// Subscribes to `topic` and adapts the receiver into an event stream.
    ///
    /// The stream ends once every publisher handle for the topic is gone.
    pub async fn event_stream(&self, topic: impl Into<String>) -> EventStream {
        let topic = topic.into();
        let receiver = self.subscribe(topic.clone()).await;
        Box::pin(receiver_stream(topic, receiver))
    }

    /// Drops `topic`, ending every stream subscribed to it.
    pub async fn close(&self, topic: &str) -> bool {
        self.channels.write().await.remove(topic).is_some()
    }

    pub async fn topic_count(&self) -> usize {
        self.channels.read().await.len()
    }

    pub async fn has_subscribers(&self, topic: &str) -> bool {
        let channels = self.channels.read().await;
        channels
            .get(topic)
            .map(|sender| sender.receiver_count() > 0)
            .unwrap_or(false)
    }

    /// Removes topics nobody listens to anymore.
    pub async fn cleanup(&self) {
        let mut channels = self.channels.write().await;
        channels.retain(|_, sender| sender.receiver_count() > 0);
    }
}

fn receiver_stream(
    topic: String,
    receiver: broadcast::Receiver<serde_json::Value>,
) -> impl futures::Stream<Item = Result<serde_json::Value, EventStreamError>> + Send {
    stream::unfold((topic, receiver), |(topic, mut receiver)| async move {
        loop {
            match receiver.recv().await {
                Ok(event) => return Some((Ok(event), (topic, receiver))),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(topic = %topic, skipped, "subscriber lagged, events skipped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
}

/// A typed view of one topic.
pub struct TypedPubSub<T> {
    inner: PubSub,
    topic: String,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Clone for TypedPubSub<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            topic: self.topic.clone(),
            _phantom: PhantomData,
        }
    }
}

impl<T: Serialize + DeserializeOwned> TypedPubSub<T> {
    pub fn new(pubsub: PubSub, topic: impl Into<String>) -> Self {
        Self {
            inner: pubsub,
            topic: topic.into(),
            _phantom: PhantomData,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn publish(&self, event: T) -> SdkResult<usize> {
        let value =
            serde_json::to_value(&event).map_err(|e| SdkError::serialize(e.to_string()))?;
        Ok(self.inner.publish(&self.topic, value).await)
    }

    pub async fn event_stream(&self) -> EventStream {
        self.inner.event_stream(self.topic.clone()).await
    }
}
