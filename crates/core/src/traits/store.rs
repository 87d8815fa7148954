//! Persistence traits for policies and infractions.
//!
//! The authority treats durable storage as an external collaborator: it only
//! needs get/update/delete by identifier plus the few lookups the escalation
//! path performs.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Infraction, InfractionId, Policy, PolicyId};

/// Storage for policy definitions.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Get a policy by id.
    async fn get_policy(&self, id: PolicyId) -> Result<Option<Policy>>;

    /// Find a policy by its `(service, name)` identity.
    async fn find_policy(&self, service: &str, name: &str) -> Result<Option<Policy>>;

    /// List all policies.
    async fn list_policies(&self) -> Result<Vec<Policy>>;

    /// Create or replace a policy. Policies without an id are assigned one.
    async fn update_policy(&self, policy: Policy) -> Result<Policy>;

    /// Delete a policy and its infractions.
    async fn delete_policy(&self, id: PolicyId) -> Result<()>;
}

/// Storage for infraction history.
#[async_trait]
pub trait InfractionStore: Send + Sync {
    /// Get an infraction by id.
    async fn get_infraction(&self, id: InfractionId) -> Result<Option<Infraction>>;

    /// All infractions of `user_name` under a policy.
    async fn infractions_for(&self, policy_id: PolicyId, user_name: &str) -> Result<Vec<Infraction>>;

    /// All infractions recorded under a policy.
    async fn infractions_for_policy(&self, policy_id: PolicyId) -> Result<Vec<Infraction>>;

    /// Create or replace an infraction. Infractions without an id are assigned one.
    async fn update_infraction(&self, infraction: Infraction) -> Result<Infraction>;

    /// Delete an infraction.
    async fn delete_infraction(&self, id: InfractionId) -> Result<()>;

    /// Delete infractions that fired before `cutoff` and no longer suspend
    /// anyone at `now`. Returns the number removed.
    async fn purge_expired(&self, cutoff: i64, now: i64) -> Result<usize>;

    /// Suspensions of a policy that are in force at `now`.
    async fn suspensions_for_policy(&self, policy_id: PolicyId, now: i64) -> Result<Vec<Infraction>> {
        Ok(self
            .infractions_for_policy(policy_id)
            .await?
            .into_iter()
            .filter(|i| i.is_suspended_at(now))
            .collect())
    }
}
