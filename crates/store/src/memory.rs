//! In-memory policy and infraction stores using DashMap.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use warden_core::{
    traits::{InfractionStore, PolicyStore},
    types::{Infraction, InfractionId, Policy, PolicyId},
    Error, Result,
};

/// In-memory policy store.
#[derive(Debug)]
pub struct InMemoryPolicyStore {
    policies: DashMap<PolicyId, Policy>,
    next_id: AtomicU64,
}

impl InMemoryPolicyStore {
    /// Create a new in-memory policy store.
    pub fn new() -> Self {
        Self {
            policies: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Get the number of stored policies.
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

impl Default for InMemoryPolicyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn get_policy(&self, id: PolicyId) -> Result<Option<Policy>> {
        Ok(self.policies.get(&id).map(|r| r.clone()))
    }

    async fn find_policy(&self, service: &str, name: &str) -> Result<Option<Policy>> {
        Ok(self
            .policies
            .iter()
            .find(|r| r.service == service && r.name == name)
            .map(|r| r.value().clone()))
    }

    async fn list_policies(&self) -> Result<Vec<Policy>> {
        let mut policies: Vec<Policy> = self.policies.iter().map(|r| r.value().clone()).collect();
        policies.sort_by_key(|p| p.id);
        Ok(policies)
    }

    async fn update_policy(&self, mut policy: Policy) -> Result<Policy> {
        let id = match policy.id {
            Some(id) => id,
            None => self.next_id.fetch_add(1, Ordering::SeqCst),
        };
        policy.id = Some(id);

        tracing::trace!(policy_id = id, name = %policy.name, "Storing policy in memory");

        self.policies.insert(id, policy.clone());
        Ok(policy)
    }

    async fn delete_policy(&self, id: PolicyId) -> Result<()> {
        self.policies
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("policy {}", id)))
    }
}

/// In-memory infraction store.
#[derive(Debug)]
pub struct InMemoryInfractionStore {
    infractions: DashMap<InfractionId, Infraction>,
    next_id: AtomicU64,
}

impl InMemoryInfractionStore {
    /// Create a new in-memory infraction store.
    pub fn new() -> Self {
        Self {
            infractions: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Get the number of stored infractions.
    pub fn len(&self) -> usize {
        self.infractions.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.infractions.is_empty()
    }

    fn collect<F>(&self, predicate: F) -> Vec<Infraction>
    where
        F: Fn(&Infraction) -> bool,
    {
        let mut result: Vec<Infraction> = self
            .infractions
            .iter()
            .filter(|r| predicate(r.value()))
            .map(|r| r.value().clone())
            .collect();
        result.sort_by_key(|i| (i.infraction_timestamp, i.id));
        result
    }
}

impl Default for InMemoryInfractionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InfractionStore for InMemoryInfractionStore {
    async fn get_infraction(&self, id: InfractionId) -> Result<Option<Infraction>> {
        Ok(self.infractions.get(&id).map(|r| r.clone()))
    }

    async fn infractions_for(&self, policy_id: PolicyId, user_name: &str) -> Result<Vec<Infraction>> {
        Ok(self.collect(|i| i.policy_id == policy_id && i.user_name == user_name))
    }

    async fn infractions_for_policy(&self, policy_id: PolicyId) -> Result<Vec<Infraction>> {
        Ok(self.collect(|i| i.policy_id == policy_id))
    }

    async fn update_infraction(&self, mut infraction: Infraction) -> Result<Infraction> {
        let id = match infraction.id {
            Some(id) => id,
            None => self.next_id.fetch_add(1, Ordering::SeqCst),
        };
        infraction.id = Some(id);

        tracing::trace!(
            infraction_id = id,
            policy_id = infraction.policy_id,
            user = %infraction.user_name,
            "Storing infraction in memory"
        );

        self.infractions.insert(id, infraction.clone());
        Ok(infraction)
    }

    async fn delete_infraction(&self, id: InfractionId) -> Result<()> {
        self.infractions.remove(&id);
        Ok(())
    }

    async fn purge_expired(&self, cutoff: i64, now: i64) -> Result<usize> {
        let before = self.infractions.len();
        self.infractions
            .retain(|_, i| i.infraction_timestamp >= cutoff || i.is_suspended_at(now));
        Ok(before.saturating_sub(self.infractions.len()))
    }
}
