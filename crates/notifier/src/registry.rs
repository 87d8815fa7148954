//! Enforcement endpoints subscribed to suspension pushes.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use warden_core::types::{Subscription, SubscriptionId};

/// Subscriptions keyed by `(hostname, port)`. Lives for the authority's
/// process lifetime.
#[derive(Debug)]
pub struct SubscriptionRegistry {
    by_address: DashMap<(String, u16), Subscription>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            by_address: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe an address. An existing subscription for the same address
    /// is returned unchanged.
    pub fn subscribe(&self, hostname: &str, port: u16) -> Subscription {
        self.by_address
            .entry((hostname.to_string(), port))
            .or_insert_with(|| {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                tracing::info!(subscription_id = id, hostname, port, "Subscriber registered");
                Subscription {
                    id: Some(id),
                    hostname: hostname.to_string(),
                    port,
                }
            })
            .clone()
    }

    /// Remove by id. Returns the removed subscription, if any.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Option<Subscription> {
        let key = self
            .by_address
            .iter()
            .find(|r| r.id == Some(id))
            .map(|r| r.key().clone())?;

        let removed = self.by_address.remove(&key).map(|(_, s)| s);
        if removed.is_some() {
            tracing::info!(subscription_id = id, "Subscriber removed");
        }
        removed
    }

    /// Remove by address. Returns the removed subscription, if any.
    pub fn unsubscribe_address(&self, hostname: &str, port: u16) -> Option<Subscription> {
        self.by_address
            .remove(&(hostname.to_string(), port))
            .map(|(_, s)| s)
    }

    /// Point-in-time copy of every subscription.
    pub fn snapshot(&self) -> Vec<Subscription> {
        let mut subscriptions: Vec<Subscription> = self.by_address.iter().map(|r| r.value().clone()).collect();
        subscriptions.sort_by_key(|s| s.id);
        subscriptions
    }

    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
