//! In-process publish/subscribe bus.
//!
//! Each [`Topic`] is a tokio broadcast channel with a name. Publishers ask
//! the topic for its live subscriber count before building a message, so
//! nothing is computed for topics nobody listens to. Slow subscribers that
//! fall behind skip messages rather than blocking the publisher.
//!
//! The [`Bus`] registry hands out typed topic handles by name and keeps a
//! type-erased JSON view of every topic for the HTTP event streams. Topics
//! outlive connections, so subscribers keep their stream across device
//! reconnects.

use std::any::Any;
use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::debug;

use crate::error::{BridgeError, BridgeResult};

/// Messages buffered per subscriber before it starts missing messages.
pub const DEFAULT_CAPACITY: usize = 16;

/// Named broadcast channel carrying messages of type `T`.
pub struct Topic<T> {
    name: Arc<str>,
    tx: broadcast::Sender<T>,
}

impl<T> Clone for Topic<T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            tx: self.tx.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Topic<T> {
    /// Create a standalone topic not registered on any bus.
    pub fn new(name: &str, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            name: Arc::from(name),
            tx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the current number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn has_subscribers(&self) -> bool {
        self.subscriber_count() > 0
    }

    /// Publish a message to all subscribers.
    ///
    /// Returns the number of subscribers that received it, or 0 if none.
    pub fn publish(&self, message: T) -> usize {
        self.tx.send(message).unwrap_or(0)
    }

    /// Build and publish a message only if someone is subscribed.
    ///
    /// Returns whether the message was built.
    pub fn publish_with(&self, build: impl FnOnce() -> T) -> bool {
        if !self.has_subscribers() {
            return false;
        }
        self.publish(build());
        true
    }

    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.tx.subscribe()
    }
}

/// Stream of JSON-encoded messages.
pub type JsonStream = Pin<Box<dyn Stream<Item = serde_json::Value> + Send>>;

/// Type-erased view of a topic used by the HTTP surface.
pub trait JsonTopic: Send + Sync {
    fn name(&self) -> &str;

    fn subscriber_count(&self) -> usize;

    /// Rust type carried by the topic.
    fn message_type(&self) -> &'static str;

    /// Subscribe and receive every subsequent message as JSON.
    fn subscribe_json(&self) -> JsonStream;
}

impl<T> JsonTopic for Topic<T>
where
    T: Serialize + Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn message_type(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn subscribe_json(&self) -> JsonStream {
        let stream = BroadcastStream::new(self.tx.subscribe()).filter_map(|result| {
            // Lagged receivers skip ahead; serialization errors drop the message
            result.ok().and_then(|msg| serde_json::to_value(&msg).ok())
        });
        Box::pin(stream)
    }
}

struct Entry {
    typed: Box<dyn Any + Send + Sync>,
    json: Arc<dyn JsonTopic>,
}

/// Registry of named topics.
pub struct Bus {
    capacity: usize,
    topics: Mutex<BTreeMap<String, Entry>>,
}

impl Bus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            topics: Mutex::new(BTreeMap::new()),
        }
    }

    /// Get the topic called `name`, creating it on first use.
    ///
    /// # Errors
    /// Returns [`BridgeError::InvalidConfigurationValue`] if the name is
    /// already registered with a different message type.
    pub fn topic<T>(&self, name: &str) -> BridgeResult<Topic<T>>
    where
        T: Serialize + Clone + Send + Sync + 'static,
    {
        let mut topics = self.topics.lock().unwrap();
        if let Some(entry) = topics.get(name) {
            return entry
                .typed
                .downcast_ref::<Topic<T>>()
                .cloned()
                .ok_or_else(|| {
                    BridgeError::InvalidConfigurationValue(format!(
                        "topic {name} already carries {}, not {}",
                        entry.json.message_type(),
                        std::any::type_name::<T>()
                    ))
                });
        }

        let topic = Topic::<T>::new(name, self.capacity);
        debug!("Advertised topic {name}");
        topics.insert(
            name.to_string(),
            Entry {
                typed: Box::new(topic.clone()),
                json: Arc::new(topic.clone()),
            },
        );
        Ok(topic)
    }

    /// JSON view of a registered topic.
    pub fn json_topic(&self, name: &str) -> Option<Arc<dyn JsonTopic>> {
        self.topics
            .lock()
            .unwrap()
            .get(name)
            .map(|entry| Arc::clone(&entry.json))
    }

    /// Registered topic names in sorted order.
    pub fn topic_names(&self) -> Vec<String> {
        self.topics.lock().unwrap().keys().cloned().collect()
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers() {
        let topic = Topic::<u8>::new("imu/gps_num_sat", 4);
        assert_eq!(topic.subscriber_count(), 0);
        assert_eq!(topic.publish(7), 0);
    }

    #[test]
    fn test_publish_with_skips_builder_when_unsubscribed() {
        let topic = Topic::<u8>::new("imu/gps_status", 4);
        let mut built = false;
        assert!(!topic.publish_with(|| {
            built = true;
            3
        }));
        assert!(!built);

        let mut rx = topic.subscribe();
        assert!(topic.publish_with(|| 3));
        assert_eq!(rx.try_recv().unwrap(), 3);
    }

    #[test]
    fn test_subscriber_count_tracks_receivers() {
        let topic = Topic::<f32>::new("imu/temperature", 4);
        let sub1 = topic.subscribe();
        let _sub2 = topic.subscribe();
        assert_eq!(topic.subscriber_count(), 2);
        drop(sub1);
        assert_eq!(topic.subscriber_count(), 1);
    }

    #[test]
    fn test_bus_returns_same_channel_for_same_name() {
        let bus = Bus::default();
        let a = bus.topic::<u8>("imu/gps_num_sat").unwrap();
        let b = bus.topic::<u8>("imu/gps_num_sat").unwrap();

        let mut rx = a.subscribe();
        assert_eq!(b.subscriber_count(), 1);
        b.publish(9);
        assert_eq!(rx.try_recv().unwrap(), 9);
    }

    #[test]
    fn test_bus_rejects_type_mismatch() {
        let bus = Bus::default();
        bus.topic::<u8>("imu/data").unwrap();
        assert!(matches!(
            bus.topic::<f32>("imu/data"),
            Err(BridgeError::InvalidConfigurationValue(_))
        ));
    }

    #[test]
    fn test_json_subscriber_counts_as_subscriber() {
        let bus = Bus::default();
        let topic = bus.topic::<f32>("imu/temperature").unwrap();
        let json = bus.json_topic("imu/temperature").unwrap();

        let _stream = json.subscribe_json();
        assert_eq!(topic.subscriber_count(), 1);
        assert_eq!(bus.topic_names(), vec!["imu/temperature".to_string()]);
        assert!(bus.json_topic("imu/absent").is_none());
    }

    #[tokio::test]
    async fn test_json_stream_yields_serialized_messages() {
        let bus = Bus::default();
        let topic = bus.topic::<u8>("imu/gps_num_sat").unwrap();
        let mut stream = bus.json_topic("imu/gps_num_sat").unwrap().subscribe_json();

        topic.publish(5);
        assert_eq!(stream.next().await, Some(serde_json::json!(5)));
    }
}
