//! Topic registry and dispatch.

use crate::topics::{emission_topics, ERROR_TOPIC};
use crate::types::{ChangeEvent, DecodeFailure, Delivery, Payload};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{trace, warn};

use super::types::{Listener, ListenerFailure};

/// Maps exact topic names to listeners and fans events out to them.
///
/// Listeners on one topic are called in subscription order. The listener
/// list is snapshotted per topic before invoking, so callbacks may freely
/// subscribe or unsubscribe, and a concurrent unsubscribe never affects a
/// topic pass that has already started.
pub struct SubscriptionManager {
    /// Listeners by topic name, in subscription order.
    topics: RwLock<HashMap<String, Vec<Listener>>>,
}

impl SubscriptionManager {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
        }
    }

    /// Register `listener` on `topic`.
    ///
    /// Returns `false` if that listener is already registered on the topic;
    /// duplicates are never stored, so a listener gets at most one dispatch
    /// per topic name.
    pub fn subscribe(&self, topic: impl Into<String>, listener: &Listener) -> bool {
        let topic = topic.into();
        let mut topics = self.topics.write();
        let listeners = topics.entry(topic).or_default();
        if listeners.iter().any(|l| l.same_as(listener)) {
            return false;
        }
        listeners.push(listener.clone());
        true
    }

    /// Remove `listener` from `topic`. Returns whether it was registered.
    pub fn unsubscribe(&self, topic: &str, listener: &Listener) -> bool {
        let mut topics = self.topics.write();
        let Some(listeners) = topics.get_mut(topic) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|l| !l.same_as(listener));
        let removed = listeners.len() != before;
        if listeners.is_empty() {
            topics.remove(topic);
        }
        removed
    }

    /// Remove `listener` from every topic. Returns how many topics it left.
    pub fn unsubscribe_all(&self, listener: &Listener) -> usize {
        let mut topics = self.topics.write();
        let mut removed = 0;
        topics.retain(|_, listeners| {
            let before = listeners.len();
            listeners.retain(|l| !l.same_as(listener));
            removed += before - listeners.len();
            !listeners.is_empty()
        });
        removed
    }

    /// Drop every subscription.
    pub fn clear(&self) {
        self.topics.write().clear();
    }

    /// Listeners registered on exactly `topic`.
    pub fn listener_count(&self, topic: &str) -> usize {
        self.topics.read().get(topic).map_or(0, Vec::len)
    }

    /// Number of topics with at least one listener.
    pub fn topic_count(&self) -> usize {
        self.topics.read().len()
    }

    // --- Dispatch ---

    /// Fan a decoded event out over its derived topics.
    ///
    /// Pings go to `ping` only. Returns the number of successful deliveries.
    pub fn dispatch_event(&self, event: Arc<ChangeEvent>) -> usize {
        let topics = emission_topics(&event);
        let payload = Payload::Event(event);

        topics
            .into_iter()
            .map(|topic| self.publish(topic, &payload))
            .sum()
    }

    /// Publish a decode failure on the `error` topic.
    pub fn dispatch_failure(&self, failure: DecodeFailure) -> usize {
        self.publish(ERROR_TOPIC.to_string(), &Payload::Error(Arc::new(failure)))
    }

    /// Deliver `payload` to every listener registered on exactly `topic`.
    pub fn publish(&self, topic: String, payload: &Payload) -> usize {
        let listeners = self.snapshot(&topic);
        if listeners.is_empty() {
            return 0;
        }

        let delivery = Delivery {
            topic,
            payload: payload.clone(),
        };

        let mut delivered = 0;
        for listener in &listeners {
            match listener.invoke(&delivery) {
                Ok(()) => delivered += 1,
                Err(ListenerFailure::Disconnected) => {
                    trace!(topic = %delivery.topic, "listener receiver dropped");
                }
                Err(failure) => {
                    warn!(topic = %delivery.topic, error = %failure, "listener failed");
                }
            }
        }
        delivered
    }

    fn snapshot(&self, topic: &str) -> Vec<Listener> {
        self.topics.read().get(topic).cloned().unwrap_or_default()
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::decode;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn container_event() -> Arc<ChangeEvent> {
        Arc::new(
            decode(
                r#"{"name":"resource.change","resourceType":"container","resourceId":"42",
                    "data":{"resource":{"state":"running"}}}"#,
            )
            .unwrap(),
        )
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> Listener {
        let log = Arc::clone(log);
        Listener::new(move |d| log.lock().push(format!("{}:{}", tag, d.topic)))
    }

    #[test]
    fn test_subscribe_unsubscribe() {
        let manager = SubscriptionManager::new();
        let (listener, _handle) = Listener::channel(8);

        assert!(manager.subscribe("ping", &listener));
        assert_eq!(manager.listener_count("ping"), 1);

        assert!(manager.unsubscribe("ping", &listener));
        assert_eq!(manager.listener_count("ping"), 0);
        assert_eq!(manager.topic_count(), 0);

        assert!(!manager.unsubscribe("ping", &listener));
    }

    #[test]
    fn test_handle_disconnects_after_last_unsubscribe() {
        let manager = SubscriptionManager::new();
        let (listener, handle) = Listener::channel(8);
        manager.subscribe("ping", &listener);
        manager.subscribe("error", &listener);
        drop(listener);

        // Still reachable through the registry.
        assert!(handle.listener().is_some());

        let listener = handle.listener().unwrap();
        assert_eq!(manager.unsubscribe_all(&listener), 2);
        drop(listener);

        assert!(handle.listener().is_none());
        assert!(handle.recv().is_err());
    }

    #[test]
    fn test_duplicate_subscription_rejected() {
        let manager = SubscriptionManager::new();
        let (listener, handle) = Listener::channel(8);

        assert!(manager.subscribe("resource.change", &listener));
        assert!(!manager.subscribe("resource.change", &listener.clone()));
        assert_eq!(manager.listener_count("resource.change"), 1);

        manager.dispatch_event(container_event());
        assert_eq!(handle.drain().len(), 1);
    }

    #[test]
    fn test_dispatch_order_follows_expansion() {
        let manager = SubscriptionManager::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let listener = recorder(&log, "a");

        for topic in [
            "resource.change.container.42.running",
            "resource.change",
            "resource.change.container",
            "resource.change.running",
            "resource.change.container.42",
            "resource.change.container.running",
        ] {
            manager.subscribe(topic, &listener);
        }

        assert_eq!(manager.dispatch_event(container_event()), 6);
        assert_eq!(
            *log.lock(),
            vec![
                "a:resource.change",
                "a:resource.change.running",
                "a:resource.change.container",
                "a:resource.change.container.running",
                "a:resource.change.container.42",
                "a:resource.change.container.42.running",
            ]
        );
    }

    #[test]
    fn test_listeners_called_in_subscription_order() {
        let manager = SubscriptionManager::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = recorder(&log, "first");
        let second = recorder(&log, "second");

        manager.subscribe("resource.change", &first);
        manager.subscribe("resource.change", &second);
        manager.dispatch_event(container_event());

        assert_eq!(
            *log.lock(),
            vec!["first:resource.change", "second:resource.change"]
        );
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let manager = SubscriptionManager::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let bad = Listener::new(|_| panic!("boom"));
        let good = recorder(&log, "good");

        manager.subscribe("resource.change", &bad);
        manager.subscribe("resource.change", &good);
        manager.subscribe("resource.change.container", &good);

        assert_eq!(manager.dispatch_event(container_event()), 2);
        assert_eq!(
            *log.lock(),
            vec!["good:resource.change", "good:resource.change.container"]
        );
    }

    #[test]
    fn test_full_channel_does_not_block_others() {
        let manager = SubscriptionManager::new();
        let (slow, slow_handle) = Listener::channel(1);
        let (fast, fast_handle) = Listener::channel(16);

        manager.subscribe("resource.change", &slow);
        manager.subscribe("resource.change", &fast);

        for _ in 0..3 {
            manager.dispatch_event(container_event());
        }

        assert_eq!(slow_handle.drain().len(), 1);
        assert_eq!(fast_handle.drain().len(), 3);
        // Still registered; only explicit unsubscribe removes it.
        assert_eq!(manager.listener_count("resource.change"), 2);
    }

    #[test]
    fn test_unsubscribe_inside_callback_affects_later_topics_only() {
        let manager = Arc::new(SubscriptionManager::new());
        let (observer, handle) = Listener::channel(16);

        let weak = Arc::downgrade(&manager);
        let observer_for_cb = observer.clone();
        let remover = Listener::new(move |_| {
            if let Some(m) = weak.upgrade() {
                m.unsubscribe_all(&observer_for_cb);
            }
        });

        manager.subscribe("resource.change", &remover);
        manager.subscribe("resource.change", &observer);
        manager.subscribe("resource.change.container", &observer);

        manager.dispatch_event(container_event());

        // The first pass was snapshotted before the callback ran.
        let topics: Vec<String> = handle.drain().into_iter().map(|d| d.topic).collect();
        assert_eq!(topics, vec!["resource.change"]);
    }

    #[test]
    fn test_failure_goes_to_error_topic_only() {
        let manager = SubscriptionManager::new();
        let (errors, error_handle) = Listener::channel(4);
        let (other, other_handle) = Listener::channel(4);
        manager.subscribe(ERROR_TOPIC, &errors);
        manager.subscribe("resource.change", &other);

        let failure = decode("{not json").unwrap_err();
        assert_eq!(manager.dispatch_failure(failure), 1);

        let delivery = error_handle
            .recv_timeout(Duration::from_millis(100))
            .unwrap();
        assert_eq!(delivery.topic, "error");
        assert_eq!(delivery.payload.as_error().unwrap().message, "{not json");
        assert!(other_handle.try_recv().is_err());
    }
}
