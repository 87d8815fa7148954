//! Local suspension view and buffered usage updates.

use dashmap::DashMap;
use std::sync::Arc;

use warden_core::{
    types::{Infraction, Policy, PolicyId, PERMANENT},
    Suspension,
};
use warden_governance::Usage;

type UserKey = (PolicyId, String);

// ============================================================================
// Suspension cache
// ============================================================================

/// Suspensions known to this enforcement point, fed by pushes, startup
/// seeding and `Suspended` answers from the authority.
#[derive(Debug, Default)]
pub struct SuspensionCache {
    entries: DashMap<UserKey, Suspension>,
}

impl SuspensionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember `suspension`, keeping whichever of old and new lasts longer.
    pub fn insert(&self, suspension: Suspension) {
        let Some(policy_id) = suspension.policy_id else {
            return;
        };
        let key = (policy_id, suspension.user_name.clone());

        self.entries
            .entry(key)
            .and_modify(|current| {
                if lasts_longer(&suspension, current) {
                    *current = suspension.clone();
                }
            })
            .or_insert(suspension);
    }

    /// Apply an infraction pushed by the authority or fetched at startup.
    /// Infractions not in force at `now` are ignored.
    pub fn apply(&self, infraction: &Infraction, policy_name: &str, now: i64) {
        if !infraction.is_suspended_at(now) {
            return;
        }
        self.insert(Suspension {
            policy_id: Some(infraction.policy_id),
            policy_name: policy_name.to_string(),
            user_name: infraction.user_name.clone(),
            expires: infraction.expiration_timestamp.unwrap_or(PERMANENT),
            value: infraction.value,
        });
    }

    /// The suspension of `user` under `policy_id` in force at `now`.
    /// Expired entries are evicted.
    pub fn active(&self, policy_id: PolicyId, user: &str, now: i64) -> Option<Suspension> {
        let key = (policy_id, user.to_string());
        let entry = self.entries.get(&key).map(|e| e.value().clone())?;

        if entry.is_permanent() || now < entry.expires {
            Some(entry)
        } else {
            self.entries.remove_if(&key, |_, s| !s.is_permanent() && now >= s.expires);
            None
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

pub(crate) fn lasts_longer(candidate: &Suspension, current: &Suspension) -> bool {
    match (candidate.is_permanent(), current.is_permanent()) {
        (_, true) => false,
        (true, false) => true,
        (false, false) => candidate.expires > current.expires,
    }
}

// ============================================================================
// Pending usage
// ============================================================================

/// A usage change that could not be delivered to the authority.
#[derive(Debug, Clone)]
pub struct PendingUpdate {
    pub policy: Arc<Policy>,
    pub user: String,
    pub usage: Usage,
}

/// Usage changes waiting for the next flush, merged per principal.
#[derive(Debug, Default)]
pub struct PendingUsage {
    updates: DashMap<UserKey, PendingUpdate>,
}

impl PendingUsage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer `usage`. Deltas accumulate; an absolute value replaces whatever
    /// was buffered, and later deltas apply on top of it.
    pub fn add(&self, policy: Arc<Policy>, user: &str, usage: Usage) {
        let Some(policy_id) = policy.id else {
            return;
        };

        self.updates
            .entry((policy_id, user.to_string()))
            .and_modify(|pending| pending.usage = merge(pending.usage, usage))
            .or_insert_with(|| PendingUpdate {
                policy: policy.clone(),
                user: user.to_string(),
                usage,
            });
    }

    /// Take every buffered update.
    pub fn drain(&self) -> Vec<PendingUpdate> {
        let keys: Vec<UserKey> = self.updates.iter().map(|e| e.key().clone()).collect();
        keys.into_iter()
            .filter_map(|key| self.updates.remove(&key).map(|(_, update)| update))
            .collect()
    }

    /// Put back an update whose delivery failed. Anything buffered since the
    /// drain is applied on top of it.
    pub fn restore(&self, update: PendingUpdate) {
        let Some(policy_id) = update.policy.id else {
            return;
        };

        self.updates
            .entry((policy_id, update.user.clone()))
            .and_modify(|newer| newer.usage = merge(update.usage, newer.usage))
            .or_insert(update);
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }
}

fn merge(earlier: Usage, later: Usage) -> Usage {
    match (earlier, later) {
        (_, Usage::Absolute(value)) => Usage::Absolute(value),
        (Usage::Delta(a), Usage::Delta(b)) => Usage::Delta(a + b),
        (Usage::Absolute(a), Usage::Delta(b)) => Usage::Absolute(a + b),
    }
}
