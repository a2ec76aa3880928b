//! Topic → subscriber registry
//!
//! Exact-topic subscribers are kept per topic in registration order. Wildcard
//! subscribers ("worker.*", "*") live in a separate list and are matched after
//! the exact ones, again in registration order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use shared_types::{is_topic_pattern, topic_matches, Envelope};

/// Subscriber callback: `(payload, envelope)`
pub type Callback = Arc<dyn Fn(&serde_json::Value, &Envelope) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// A callback ready to be invoked, detached from the registry lock
#[derive(Clone)]
pub struct Delivery {
    pub id: SubscriptionId,
    active: Arc<AtomicBool>,
    callback: Callback,
}

impl Delivery {
    /// Whether the subscription is still registered.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn invoke(&self, envelope: &Envelope) {
        (self.callback)(&envelope.payload, envelope);
    }
}

struct Entry {
    id: SubscriptionId,
    active: Arc<AtomicBool>,
    callback: Callback,
}

impl Entry {
    fn delivery(&self) -> Delivery {
        Delivery {
            id: self.id,
            active: self.active.clone(),
            callback: self.callback.clone(),
        }
    }
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    exact: HashMap<String, Vec<Entry>>,
    patterns: Vec<(String, Entry)>,
    next_id: u64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` under `topic` (exact name or wildcard pattern).
    ///
    /// Returns the new id and the liveness flag shared with the caller's handle.
    pub fn insert(&mut self, topic: &str, callback: Callback) -> (SubscriptionId, Arc<AtomicBool>) {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        let active = Arc::new(AtomicBool::new(true));
        let entry = Entry {
            id,
            active: active.clone(),
            callback,
        };

        if is_topic_pattern(topic) {
            self.patterns.push((topic.to_string(), entry));
        } else {
            self.exact.entry(topic.to_string()).or_default().push(entry);
        }

        (id, active)
    }

    /// Remove exactly one subscription. Returns `false` if it was already gone.
    pub fn remove(&mut self, topic: &str, id: SubscriptionId) -> bool {
        if is_topic_pattern(topic) {
            let Some(index) = self.patterns.iter().position(|(_, e)| e.id == id) else {
                return false;
            };
            let (_, entry) = self.patterns.remove(index);
            entry.active.store(false, Ordering::SeqCst);
            return true;
        }

        let Some(entries) = self.exact.get_mut(topic) else {
            return false;
        };
        let Some(index) = entries.iter().position(|e| e.id == id) else {
            return false;
        };
        let entry = entries.remove(index);
        entry.active.store(false, Ordering::SeqCst);
        if entries.is_empty() {
            self.exact.remove(topic);
        }
        true
    }

    /// Snapshot of every callback interested in `topic`, in delivery order.
    pub fn deliveries(&self, topic: &str) -> Vec<Delivery> {
        let exact = self
            .exact
            .get(topic)
            .into_iter()
            .flatten()
            .map(Entry::delivery);
        let patterns = self
            .patterns
            .iter()
            .filter(|(pattern, _)| topic_matches(pattern, topic))
            .map(|(_, entry)| entry.delivery());
        exact.chain(patterns).collect()
    }

    /// Subscribers registered under this exact topic or pattern string.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        if is_topic_pattern(topic) {
            self.patterns.iter().filter(|(p, _)| p == topic).count()
        } else {
            self.exact.get(topic).map_or(0, Vec::len)
        }
    }

    pub fn len(&self) -> usize {
        self.exact.values().map(Vec::len).sum::<usize>() + self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
