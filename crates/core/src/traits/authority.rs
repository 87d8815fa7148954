//! The authority RPC surface consumed by enforcement points.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{Infraction, Policy, PolicyId, Subscription};

/// Outcome of a successful registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    /// Policies as stored by the authority, with ids assigned.
    pub policies: Vec<Policy>,
    /// The subscription created (or reused) for the callback address.
    pub subscription: Subscription,
}

/// Operations the central authority offers to enforcement points.
///
/// `modify_metric` and `update_metric` fail with
/// [`Error::Suspended`](crate::Error::Suspended) when the principal is
/// suspended under the policy.
#[async_trait]
pub trait Authority: Send + Sync {
    /// Get a policy by id.
    async fn get_policy(&self, id: PolicyId) -> Result<Option<Policy>>;

    /// Infraction history of a principal under a policy.
    async fn get_infractions(&self, policy_id: PolicyId, user_name: &str) -> Result<Vec<Infraction>>;

    /// Suspensions currently in force under a policy.
    async fn get_suspensions(&self, policy_id: PolicyId) -> Result<Vec<Infraction>>;

    /// Apply a relative usage change.
    async fn modify_metric(&self, policy: &Policy, user_name: &str, delta: f64) -> Result<()>;

    /// Set the absolute usage value.
    async fn update_metric(&self, policy: &Policy, user_name: &str, value: f64) -> Result<()>;

    /// Reconcile `policies` with the authority and subscribe `callback` for pushes.
    async fn register(&self, policies: Vec<Policy>, callback: Subscription) -> Result<Registration>;

    /// Remove a subscription. Unknown subscriptions are ignored.
    async fn unregister(&self, subscription: &Subscription) -> Result<()>;
}
