//! # Transport Registry
//!
//! Live transports keyed by their stable id, plus topic subscriptions. The
//! registry lives in memory only; after hibernation it starts empty and is
//! repopulated lazily as sockets deliver messages.

use crate::transport::session::SessionTransport;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Stable identifier of one socket session. Survives hibernation inside the attachment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransportId(String);

impl TransportId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TransportId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransportId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TransportId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Default)]
struct RegistryInner {
    transports: HashMap<TransportId, Arc<SessionTransport>>,
    topics: HashMap<String, BTreeSet<TransportId>>,
}

/// Shared handle; clones see the same transports.
#[derive(Clone, Default)]
pub struct TransportRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("TransportRegistry")
            .field("transports", &inner.transports.len())
            .field("topics", &inner.topics.len())
            .finish()
    }
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `transport`, replacing any previous one with the same id.
    pub fn register(&self, transport: Arc<SessionTransport>) {
        let id = transport.id().clone();
        let previous = self.inner.write().transports.insert(id.clone(), transport);
        if previous.is_some() {
            warn!(transport_id = %id, "Transport replaced in registry");
        }
    }

    pub fn get(&self, id: &TransportId) -> Option<Arc<SessionTransport>> {
        self.inner.read().transports.get(id).cloned()
    }

    /// Removes the transport and all of its topic subscriptions.
    pub fn remove(&self, id: &TransportId) -> Option<Arc<SessionTransport>> {
        let mut inner = self.inner.write();
        let removed = inner.transports.remove(id);
        inner.topics.retain(|_, subscribers| {
            subscribers.remove(id);
            !subscribers.is_empty()
        });
        removed
    }

    pub fn all(&self) -> Vec<Arc<SessionTransport>> {
        self.inner.read().transports.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().transports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every transport and subscription, returning the transports.
    pub fn clear(&self) -> Vec<Arc<SessionTransport>> {
        let mut inner = self.inner.write();
        inner.topics.clear();
        inner.transports.drain().map(|(_, t)| t).collect()
    }

    /// Returns `false` when the transport was already subscribed.
    pub fn subscribe(&self, topic: &str, id: TransportId) -> bool {
        self.inner
            .write()
            .topics
            .entry(topic.to_string())
            .or_default()
            .insert(id)
    }

    pub fn unsubscribe(&self, topic: &str, id: &TransportId) -> bool {
        let mut inner = self.inner.write();
        let Some(subscribers) = inner.topics.get_mut(topic) else {
            return false;
        };
        let removed = subscribers.remove(id);
        if subscribers.is_empty() {
            inner.topics.remove(topic);
        }
        removed
    }

    pub fn subscribers(&self, topic: &str) -> Vec<Arc<SessionTransport>> {
        let inner = self.inner.read();
        inner
            .topics
            .get(topic)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.transports.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Fan-out sender exposed to methods through the context.
#[derive(Clone, Default, Debug)]
pub struct Broadcaster {
    registry: TransportRegistry,
}

impl Broadcaster {
    pub fn new(registry: TransportRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &TransportRegistry {
        &self.registry
    }

    /// Sends `message` to every live transport. Returns how many accepted it.
    pub async fn broadcast(&self, message: &str) -> usize {
        Self::fan_out(self.registry.all(), message).await
    }

    /// Sends `message` to the subscribers of `topic`.
    pub async fn broadcast_topic(&self, topic: &str, message: &str) -> usize {
        let delivered = Self::fan_out(self.registry.subscribers(topic), message).await;
        debug!(topic, delivered, "Topic broadcast");
        delivered
    }

    pub fn subscribe(&self, topic: &str, id: TransportId) -> bool {
        self.registry.subscribe(topic, id)
    }

    pub fn unsubscribe(&self, topic: &str, id: &TransportId) -> bool {
        self.registry.unsubscribe(topic, id)
    }

    async fn fan_out(targets: Vec<Arc<SessionTransport>>, message: &str) -> usize {
        let mut delivered = 0;
        for transport in targets {
            match transport.send(message.to_string()).await {
                Ok(()) => delivered += 1,
                Err(e) => debug!(transport_id = %transport.id(), error = %e, "Broadcast skipped"),
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::mock::MockSocket;

    fn session(id: &str) -> (Arc<SessionTransport>, Arc<MockSocket>) {
        let socket = Arc::new(MockSocket::new());
        (
            Arc::new(SessionTransport::new(TransportId::from(id), socket.clone())),
            socket,
        )
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(TransportId::new(), TransportId::new());
    }

    #[test]
    fn register_get_remove() {
        let registry = TransportRegistry::new();
        let (t, _) = session("a");
        registry.register(t);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&TransportId::from("a")).is_some());
        assert!(registry.remove(&TransportId::from("a")).is_some());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn broadcast_reaches_every_open_transport() {
        let registry = TransportRegistry::new();
        let (a, sa) = session("a");
        let (b, sb) = session("b");
        registry.register(a);
        registry.register(b.clone());
        b.mark_closed("gone");

        let broadcaster = Broadcaster::new(registry);
        assert_eq!(broadcaster.broadcast("hello").await, 1);
        assert_eq!(sa.sent(), vec!["hello"]);
        assert!(sb.sent().is_empty());
    }

    #[tokio::test]
    async fn topic_broadcast_only_reaches_subscribers() {
        let registry = TransportRegistry::new();
        let (a, sa) = session("a");
        let (b, sb) = session("b");
        registry.register(a);
        registry.register(b);

        let broadcaster = Broadcaster::new(registry.clone());
        assert!(broadcaster.subscribe("news", TransportId::from("a")));
        assert!(!broadcaster.subscribe("news", TransportId::from("a")));

        assert_eq!(broadcaster.broadcast_topic("news", "extra").await, 1);
        assert_eq!(sa.sent(), vec!["extra"]);
        assert!(sb.sent().is_empty());

        registry.remove(&TransportId::from("a"));
        assert!(!broadcaster.unsubscribe("news", &TransportId::from("a")));
        assert_eq!(broadcaster.broadcast_topic("news", "again").await, 0);
    }
}
