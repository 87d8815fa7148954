//! Suspension escalation engine.
//!
//! Usage updates flow through here: the engine refuses updates from
//! suspended principals, records the new value with the metric service,
//! evaluates the policy trigger over its window and, when the trigger
//! fires, counts recent infractions to pick a suspension level.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use warden_core::{
    now_millis,
    types::{Infraction, Policy, PolicyId, SuspensionEvent, SuspensionLevel, TimeWindow, PERMANENT},
    Datapoint, Error, InfractionStore, MetricService, PolicyStore, Result, Suspension,
};
use warden_notifier::EventSender;

use crate::metrics::{track_escalation_failure, track_infraction, track_usage_update};

type UserKey = (PolicyId, String);

/// Kind of usage change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Usage {
    /// Add to the principal's last value.
    Delta(f64),
    /// Replace the principal's value.
    Absolute(f64),
}

impl Usage {
    fn amount(&self) -> f64 {
        match self {
            Usage::Delta(v) | Usage::Absolute(v) => *v,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Usage::Delta(_) => "delta",
            Usage::Absolute(_) => "absolute",
        }
    }
}

// ============================================================================
// Pure escalation rules
// ============================================================================

/// Violation count including the one being decided: infractions at or after
/// `trigger_time - window` plus one.
pub fn count_in_window(history: &[Infraction], window: TimeWindow, trigger_time: i64) -> u64 {
    let start = window.start(trigger_time);
    let recent = history
        .iter()
        .filter(|i| i.infraction_timestamp >= start)
        .count() as u64;
    recent + 1
}

/// The level with the largest `infraction_count` not above `count`.
pub fn select_level(levels: &[SuspensionLevel], count: u64) -> Option<&SuspensionLevel> {
    levels
        .iter()
        .filter(|l| u64::from(l.infraction_count) <= count)
        .max_by_key(|l| l.infraction_count)
}

/// Expiration for a suspension at `level` fired at `trigger_time`.
pub fn expiration_for(level: &SuspensionLevel, trigger_time: i64) -> i64 {
    if level.is_permanent() {
        PERMANENT
    } else {
        trigger_time.saturating_add(level.suspension_time)
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Check-and-record service with per-principal escalation.
pub struct EscalationEngine {
    infractions: Arc<dyn InfractionStore>,
    metrics: Arc<dyn MetricService>,
    events: Option<EventSender>,
    admin_user: String,
    locks: DashMap<UserKey, Arc<Mutex<()>>>,
    touched: DashMap<UserKey, i64>,
}

impl EscalationEngine {
    pub fn new(
        infractions: Arc<dyn InfractionStore>,
        metrics: Arc<dyn MetricService>,
        admin_user: impl Into<String>,
    ) -> Self {
        Self {
            infractions,
            metrics,
            events: None,
            admin_user: admin_user.into(),
            locks: DashMap::new(),
            touched: DashMap::new(),
        }
    }

    /// Publish suspension state changes to `events`.
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Apply a relative usage change.
    pub async fn record_usage(&self, policy: &Policy, user: &str, delta: f64) -> Result<()> {
        self.apply_usage(policy, user, Usage::Delta(delta), now_millis()).await
    }

    /// Replace the principal's usage value.
    pub async fn set_usage(&self, policy: &Policy, user: &str, value: f64) -> Result<()> {
        self.apply_usage(policy, user, Usage::Absolute(value), now_millis()).await
    }

    /// Apply `usage` at `now`.
    ///
    /// Fails with [`Error::Suspended`] when the principal is already suspended,
    /// before anything is recorded, or when this update escalates into a
    /// suspension in force at `now`. The whole update runs under the
    /// `(policy, user)` lock.
    pub async fn apply_usage(&self, policy: &Policy, user: &str, usage: Usage, now: i64) -> Result<()> {
        let policy_id = policy
            .id
            .ok_or_else(|| Error::invalid_request(format!("policy {} has no id", policy.name)))?;
        if user.trim().is_empty() {
            return Err(Error::invalid_request("user name cannot be empty"));
        }
        if !usage.amount().is_finite() {
            return Err(Error::invalid_request(format!("non-finite usage value {}", usage.amount())));
        }

        let held = self.lock(policy_id, user).await;

        self.check_suspension(policy, user, now).await?;

        let value = match usage {
            Usage::Delta(delta) => {
                let last = self.metrics.latest(policy_id, user).await?;
                last.unwrap_or(policy.default_value) + delta
            }
            Usage::Absolute(value) => value,
        };
        self.metrics
            .record(policy_id, user, Datapoint { timestamp: now, value })
            .await?;
        self.touched.insert((policy_id, user.to_string()), now);
        track_usage_update(&policy.name, usage.kind());

        tracing::debug!(policy = %policy.name, user, value, "Usage recorded");

        let Some(observed) = self.evaluate(policy, user, now).await? else {
            return Ok(());
        };

        let result = self.try_escalate(&held, policy_id, policy, user, now, observed).await;
        match Self::settle(policy, user, result) {
            Some(infraction) if infraction.is_suspended_at(now) => {
                let expires = infraction.expiration_timestamp.unwrap_or(PERMANENT);
                Err(Error::suspended(Suspension::new(policy, user, expires, Some(observed))))
            }
            _ => Ok(()),
        }
    }

    /// Fail with [`Error::Suspended`] if a suspension of `user` under `policy`
    /// is in force at `now`. The longest-lasting suspension is reported.
    pub async fn check_suspension(&self, policy: &Policy, user: &str, now: i64) -> Result<()> {
        let Some(policy_id) = policy.id else {
            return Ok(());
        };

        let active = self
            .infractions
            .infractions_for(policy_id, user)
            .await?
            .into_iter()
            .filter(|i| i.is_suspended_at(now))
            .max_by_key(|i| match i.expiration_timestamp {
                Some(PERMANENT) => i64::MAX,
                Some(t) => t,
                None => i64::MIN,
            });

        match active {
            Some(infraction) => Err(Error::suspended(Suspension::new(
                policy,
                user,
                infraction.expiration_timestamp.unwrap_or(PERMANENT),
                infraction.value,
            ))),
            None => Ok(()),
        }
    }

    /// Aggregate the principal's series over the policy window ending at
    /// `now`. Returns the aggregated value when the trigger fires.
    pub async fn evaluate(&self, policy: &Policy, user: &str, now: i64) -> Result<Option<f64>> {
        let Some(policy_id) = policy.id else {
            return Ok(None);
        };

        let start = policy.time_unit.start(now);
        let Some(value) = self
            .metrics
            .aggregate(policy_id, user, policy.aggregator, start, now)
            .await?
        else {
            return Ok(None);
        };

        match policy.trigger_type.fires(value, &policy.threshold) {
            Some(true) => {
                tracing::info!(policy = %policy.name, user, value, trigger = ?policy.trigger_type, "Trigger fired");
                Ok(Some(value))
            }
            Some(false) => Ok(None),
            None => {
                tracing::warn!(policy = %policy.name, "Not enough thresholds to evaluate trigger");
                Ok(None)
            }
        }
    }

    /// Record an infraction for a fired trigger and choose its suspension.
    ///
    /// Failures are logged and swallowed; `None` means nothing was persisted.
    pub async fn escalate(
        &self,
        policy: &Policy,
        user: &str,
        trigger_time: i64,
        value: f64,
    ) -> Option<Infraction> {
        let result = match policy.id {
            Some(policy_id) => {
                let held = self.lock(policy_id, user).await;
                self.try_escalate(&held, policy_id, policy, user, trigger_time, value).await
            }
            None => Err(Error::invalid_request(format!("policy {} has no id", policy.name))),
        };
        Self::settle(policy, user, result)
    }

    fn settle(policy: &Policy, user: &str, result: Result<Infraction>) -> Option<Infraction> {
        match result {
            Ok(infraction) => Some(infraction),
            Err(e) => {
                tracing::warn!(policy = %policy.name, user, error = %e, "Escalation failed");
                track_escalation_failure();
                None
            }
        }
    }

    /// Count, decide and persist. `_held` is the `(policy_id, user)` lock.
    async fn try_escalate(
        &self,
        _held: &OwnedMutexGuard<()>,
        policy_id: PolicyId,
        policy: &Policy,
        user: &str,
        trigger_time: i64,
        value: f64,
    ) -> Result<Infraction> {
        let history = self.infractions.infractions_for(policy_id, user).await?;
        let count = count_in_window(&history, policy.time_unit, trigger_time);
        let level = select_level(&policy.levels, count);
        let expiration = level.map(|l| expiration_for(l, trigger_time));

        let infraction = Infraction::new(policy_id, user, trigger_time)
            .with_expiration(expiration)
            .with_value(value)
            .attributed_to(&self.admin_user);
        let stored = self.infractions.update_infraction(infraction).await?;

        track_infraction(&policy.name, stored.is_suspension());
        tracing::info!(
            policy = %policy.name,
            user,
            count,
            level = level.map(|l| l.level_number),
            expiration = ?stored.expiration_timestamp,
            "Infraction recorded"
        );

        if stored.is_suspension() {
            self.publish(&stored);
        }

        Ok(stored)
    }

    fn publish(&self, infraction: &Infraction) {
        let Some(events) = &self.events else {
            return;
        };
        if let Err(e) = events.try_send(SuspensionEvent::from_infraction(infraction.clone())) {
            tracing::warn!(
                policy_id = infraction.policy_id,
                user = %infraction.user_name,
                error = %e,
                "Suspension event dropped"
            );
        }
    }

    /// Critical section for one `(policy, user)` pair.
    async fn lock(&self, policy_id: PolicyId, user: &str) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry((policy_id, user.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    // ========================================================================
    // Background maintenance
    // ========================================================================

    /// Re-evaluate triggers for pairs updated within `max_age` of `now`.
    /// Older pairs are forgotten. Returns the number of infractions recorded.
    pub async fn sweep(&self, policies: &dyn PolicyStore, now: i64, max_age: i64) -> usize {
        let cutoff = now.saturating_sub(max_age);
        self.touched.retain(|_, last| *last >= cutoff);

        let keys: Vec<UserKey> = self.touched.iter().map(|e| e.key().clone()).collect();
        let mut recorded = 0;

        for (policy_id, user) in keys {
            let policy = match policies.get_policy(policy_id).await {
                Ok(Some(policy)) => policy,
                Ok(None) => {
                    self.touched.remove(&(policy_id, user));
                    continue;
                }
                Err(e) => {
                    tracing::warn!(policy_id, error = %e, "Sweep could not load policy");
                    continue;
                }
            };

            let held = self.lock(policy_id, &user).await;
            if self.check_suspension(&policy, &user, now).await.is_err() {
                continue;
            }

            match self.evaluate(&policy, &user, now).await {
                Ok(Some(value)) => {
                    let result = self.try_escalate(&held, policy_id, &policy, &user, now, value).await;
                    if Self::settle(&policy, &user, result).is_some() {
                        recorded += 1;
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(policy = %policy.name, user = %user, error = %e, "Sweep evaluation failed"),
            }
        }

        self.prune_locks();
        recorded
    }

    /// Drop lock entries nobody holds.
    pub fn prune_locks(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    /// Number of pairs tracked for the trigger sweep.
    pub fn tracked(&self) -> usize {
        self.touched.len()
    }
}
