//! The central authority service.

use async_trait::async_trait;
use std::sync::Arc;

use warden_core::{
    now_millis,
    types::{Infraction, Policy, PolicyId, Subscription},
    Authority, Error, InfractionStore, PolicyStore, Registration, Result,
};
use warden_notifier::SubscriptionRegistry;

use crate::escalation::EscalationEngine;

/// Authority backed by the policy and infraction stores.
///
/// Usage updates are resolved against the stored policy so that a stale
/// enforcement-side copy cannot change thresholds or levels.
pub struct WardenAuthority {
    policies: Arc<dyn PolicyStore>,
    infractions: Arc<dyn InfractionStore>,
    engine: Arc<EscalationEngine>,
    subscriptions: Arc<SubscriptionRegistry>,
}

impl WardenAuthority {
    pub fn new(
        policies: Arc<dyn PolicyStore>,
        infractions: Arc<dyn InfractionStore>,
        engine: Arc<EscalationEngine>,
        subscriptions: Arc<SubscriptionRegistry>,
    ) -> Self {
        Self {
            policies,
            infractions,
            engine,
            subscriptions,
        }
    }

    pub fn engine(&self) -> &Arc<EscalationEngine> {
        &self.engine
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionRegistry> {
        &self.subscriptions
    }

    pub fn policy_store(&self) -> &Arc<dyn PolicyStore> {
        &self.policies
    }

    /// Delete infractions older than `cutoff` that no longer suspend anyone.
    pub async fn purge(&self, cutoff: i64) -> Result<usize> {
        let removed = self.infractions.purge_expired(cutoff, now_millis()).await?;
        if removed > 0 {
            tracing::info!(removed, cutoff, "Purged expired infractions");
        }
        Ok(removed)
    }

    async fn stored_policy(&self, policy: &Policy) -> Result<Policy> {
        let id = policy
            .id
            .ok_or_else(|| Error::invalid_request(format!("policy {} has no id", policy.name)))?;
        self.policies
            .get_policy(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("policy {}", id)))
    }

    /// Create, update or reuse the stored policy with the same identity.
    async fn reconcile(&self, policy: Policy) -> Result<Policy> {
        policy.validate()?;

        let existing = self.policies.find_policy(&policy.service, &policy.name).await?;
        match existing {
            None => {
                let mut created = policy;
                created.id = None;
                let created = self.policies.update_policy(created).await?;
                tracing::info!(policy = %created.name, id = ?created.id, "Policy created");
                Ok(created)
            }
            Some(stored) if stored.same_definition(&policy) => Ok(stored),
            Some(stored) => {
                let mut updated = policy;
                updated.id = stored.id;
                let updated = self.policies.update_policy(updated).await?;
                tracing::info!(policy = %updated.name, id = ?updated.id, "Policy updated");
                Ok(updated)
            }
        }
    }
}

#[async_trait]
impl Authority for WardenAuthority {
    async fn get_policy(&self, id: PolicyId) -> Result<Option<Policy>> {
        self.policies.get_policy(id).await
    }

    async fn get_infractions(&self, policy_id: PolicyId, user_name: &str) -> Result<Vec<Infraction>> {
        self.infractions.infractions_for(policy_id, user_name).await
    }

    async fn get_suspensions(&self, policy_id: PolicyId) -> Result<Vec<Infraction>> {
        self.infractions
            .suspensions_for_policy(policy_id, now_millis())
            .await
    }

    async fn modify_metric(&self, policy: &Policy, user_name: &str, delta: f64) -> Result<()> {
        let policy = self.stored_policy(policy).await?;
        self.engine.record_usage(&policy, user_name, delta).await
    }

    async fn update_metric(&self, policy: &Policy, user_name: &str, value: f64) -> Result<()> {
        let policy = self.stored_policy(policy).await?;
        self.engine.set_usage(&policy, user_name, value).await
    }

    async fn register(&self, policies: Vec<Policy>, callback: Subscription) -> Result<Registration> {
        if callback.hostname.trim().is_empty() {
            return Err(Error::invalid_request("callback hostname cannot be empty"));
        }

        let mut reconciled = Vec::with_capacity(policies.len());
        for policy in policies {
            reconciled.push(self.reconcile(policy).await?);
        }

        let subscription = self.subscriptions.subscribe(&callback.hostname, callback.port);
        tracing::info!(
            subscription_id = ?subscription.id,
            address = %subscription.address(),
            policies = reconciled.len(),
            "Enforcement point registered"
        );

        Ok(Registration {
            policies: reconciled,
            subscription,
        })
    }

    async fn unregister(&self, subscription: &Subscription) -> Result<()> {
        let removed = match subscription.id {
            Some(id) => self.subscriptions.unsubscribe(id),
            None => self
                .subscriptions
                .unsubscribe_address(&subscription.hostname, subscription.port),
        };
        if removed.is_none() {
            tracing::debug!(address = %subscription.address(), "Unregister for unknown subscription");
        }
        Ok(())
    }
}
