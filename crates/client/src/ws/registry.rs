//! Subscriptions live on one socket, by id and by topic.

use std::collections::{HashMap, HashSet};
use std::fmt;

use homewire_shared::SubscriptionId;
use serde_json::Value;

/// Receives the payload of every `data` frame for one subscription
pub type DataCallback = Box<dyn FnMut(Value) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// `start` sent, waiting for `start_ack`
    Initializing,
    Ready,
}

pub struct Subscription {
    pub id: SubscriptionId,
    pub topic: String,
    pub state: SubscriptionState,
    callback: DataCallback,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// What happened to a routed payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Delivered,
    UnknownId,
    NotReady,
}

/// Owned by one connection and dropped with it; never mutated concurrently.
#[derive(Default)]
pub struct SubscriptionRegistry {
    by_id: HashMap<SubscriptionId, Subscription>,
    by_topic: HashMap<String, HashSet<SubscriptionId>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pending subscription under a freshly minted id.
    pub fn register(
        &mut self,
        topic: &str,
        callback: impl FnMut(Value) + Send + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId::generate();
        self.by_topic
            .entry(topic.to_string())
            .or_default()
            .insert(id.clone());
        self.by_id.insert(
            id.clone(),
            Subscription {
                id: id.clone(),
                topic: topic.to_string(),
                state: SubscriptionState::Initializing,
                callback: Box::new(callback),
            },
        );
        id
    }

    /// Returns `false` if the id is unknown.
    pub fn mark_ready(&mut self, id: &SubscriptionId) -> bool {
        match self.by_id.get_mut(id) {
            Some(subscription) => {
                subscription.state = SubscriptionState::Ready;
                true
            }
            None => false,
        }
    }

    /// Hand `payload` to the subscription's callback if it is ready.
    pub fn route_data(&mut self, id: &SubscriptionId, payload: Value) -> RouteOutcome {
        let Some(subscription) = self.by_id.get_mut(id) else {
            tracing::warn!(subscription = %id, "data for unknown subscription dropped");
            return RouteOutcome::UnknownId;
        };

        if subscription.state != SubscriptionState::Ready {
            tracing::warn!(
                subscription = %id,
                topic = %subscription.topic,
                "data before start_ack dropped"
            );
            return RouteOutcome::NotReady;
        }

        (subscription.callback)(payload);
        RouteOutcome::Delivered
    }

    pub fn remove(&mut self, id: &SubscriptionId) -> Option<Subscription> {
        let subscription = self.by_id.remove(id)?;
        if let Some(ids) = self.by_topic.get_mut(&subscription.topic) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_topic.remove(&subscription.topic);
            }
        }
        Some(subscription)
    }

    /// Drop everything; returns how many subscriptions were removed.
    pub fn remove_all(&mut self) -> usize {
        let count = self.by_id.len();
        self.by_id.clear();
        self.by_topic.clear();
        count
    }

    pub fn get(&self, id: &SubscriptionId) -> Option<&Subscription> {
        self.by_id.get(id)
    }

    pub fn ids_for_topic(&self, topic: &str) -> Vec<SubscriptionId> {
        self.by_topic
            .get(topic)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
