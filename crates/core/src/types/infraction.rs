//! Infractions, subscriptions and the suspension events pushed between them.

use serde::{Deserialize, Serialize};

use super::policy::{PolicyId, PERMANENT};

/// Infraction identifier assigned by the authority's store.
pub type InfractionId = u64;

/// Subscription identifier assigned by the authority.
pub type SubscriptionId = u64;

/// A recorded violation of a policy by a principal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Infraction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<InfractionId>,
    pub policy_id: PolicyId,
    pub user_name: String,
    /// When the violation fired (epoch millis).
    pub infraction_timestamp: i64,
    /// When the suspension lifts, [`PERMANENT`], or unset when no suspension applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_timestamp: Option<i64>,
    /// Metric value that triggered the infraction.
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_by: Option<String>,
}

impl Infraction {
    pub fn new(policy_id: PolicyId, user_name: impl Into<String>, infraction_timestamp: i64) -> Self {
        Self {
            id: None,
            policy_id,
            user_name: user_name.into(),
            infraction_timestamp,
            expiration_timestamp: None,
            value: None,
            created_by: None,
            modified_by: None,
        }
    }

    pub fn with_expiration(mut self, expiration: Option<i64>) -> Self {
        self.expiration_timestamp = expiration;
        self
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    /// Attribute creation and last modification to `actor`.
    pub fn attributed_to(mut self, actor: impl Into<String>) -> Self {
        let actor = actor.into();
        self.created_by = Some(actor.clone());
        self.modified_by = Some(actor);
        self
    }

    /// Whether a suspension was attached at all.
    pub fn is_suspension(&self) -> bool {
        self.expiration_timestamp.is_some()
    }

    pub fn is_permanent(&self) -> bool {
        self.expiration_timestamp == Some(PERMANENT)
    }

    /// Whether the suspension is in force at `now`.
    pub fn is_suspended_at(&self, now: i64) -> bool {
        match self.expiration_timestamp {
            Some(PERMANENT) => true,
            Some(expires) => now < expires,
            None => false,
        }
    }
}

/// An enforcement endpoint registered for push notifications.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<SubscriptionId>,
    pub hostname: String,
    pub port: u16,
}

impl Subscription {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            id: None,
            hostname: hostname.into(),
            port,
        }
    }

    /// `host:port` suitable for `TcpStream::connect`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

/// Suspension state change pushed to enforcement points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspensionEvent {
    pub policy_id: PolicyId,
    pub user_name: String,
    pub infraction: Infraction,
}

impl SuspensionEvent {
    pub fn from_infraction(infraction: Infraction) -> Self {
        Self {
            policy_id: infraction.policy_id,
            user_name: infraction.user_name.clone(),
            infraction,
        }
    }
}
