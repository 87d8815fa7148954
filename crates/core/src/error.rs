//! Error types for Warden.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Policy, PolicyId, PERMANENT};

/// Result type alias using Warden's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Context carried by a suspension rejection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suspension {
    /// Policy under which the principal is suspended.
    pub policy_id: Option<PolicyId>,
    /// Human-readable policy name.
    pub policy_name: String,
    /// The suspended principal.
    pub user_name: String,
    /// Absolute expiry in epoch millis, or `-1` when permanent.
    pub expires: i64,
    /// Metric value recorded with the infraction.
    pub value: Option<f64>,
}

impl Suspension {
    pub fn new(policy: &Policy, user_name: impl Into<String>, expires: i64, value: Option<f64>) -> Self {
        Self {
            policy_id: policy.id,
            policy_name: policy.name.clone(),
            user_name: user_name.into(),
            expires,
            value,
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.expires == PERMANENT
    }

    /// Message surfaced to the caller of a protected operation.
    pub fn rejection_message(&self) -> String {
        let value = self
            .value
            .map(|v| v.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        if self.is_permanent() {
            format!(
                "User {} is suspended for policy {} after reaching {}. \
                 The suspension is permanent, please contact an administrator to reinstate this user.",
                self.user_name, self.policy_name, value
            )
        } else {
            format!(
                "User {} is suspended for policy {} after reaching {}. \
                 The suspension expires at {} (epoch millis).",
                self.user_name, self.policy_name, value, self.expires
            )
        }
    }
}

/// Core error type for Warden.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Enforcement Errors
    // =========================================================================
    #[error("Suspended: {}", .0.rejection_message())]
    Suspended(Box<Suspension>),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid time window: {0}")]
    InvalidTimeWindow(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    // =========================================================================
    // Authority Errors
    // =========================================================================
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Authority error: {0}")]
    Authority(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    // =========================================================================
    // Generic Errors
    // =========================================================================
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a suspension error.
    pub fn suspended(suspension: Suspension) -> Self {
        Self::Suspended(Box::new(suspension))
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid request error.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create a not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a storage error.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create an authority error.
    pub fn authority(msg: impl Into<String>) -> Self {
        Self::Authority(msg.into())
    }

    /// Create a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a timeout error.
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, Self::Suspended(_))
    }

    /// Failures of reaching the authority rather than refusals from it.
    /// Calls that failed this way may succeed when retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Authority(_) | Self::Transport(_) | Self::Timeout(_))
    }

    /// Suspension context, if this is a suspension.
    pub fn suspension(&self) -> Option<&Suspension> {
        match self {
            Self::Suspended(s) => Some(s),
            _ => None,
        }
    }
}
