//! Policy and suspension level definitions.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::window::TimeWindow;
use crate::error::{Error, Result};

/// Policy identifier assigned by the authority's store.
pub type PolicyId = u64;

/// Suspension time / expiration sentinel meaning "never lifts".
pub const PERMANENT: i64 = -1;

/// Comparison applied between the aggregated metric and the thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    #[serde(alias = "GREATER_THAN")]
    Above,
    #[serde(alias = "GREATER_THAN_OR_EQ")]
    AboveOrEqual,
    #[serde(alias = "LESS_THAN")]
    Below,
    #[serde(alias = "LESS_THAN_OR_EQ")]
    BelowOrEqual,
    Equal,
    NotEqual,
    Between,
    NotBetween,
}

impl TriggerType {
    /// Number of thresholds the trigger reads.
    pub fn required_thresholds(&self) -> usize {
        match self {
            TriggerType::Between | TriggerType::NotBetween => 2,
            _ => 1,
        }
    }

    /// Compare an aggregated value against the thresholds.
    ///
    /// Range triggers are inclusive at both ends and accept the bounds in
    /// either order. Returns `None` when too few thresholds are configured.
    pub fn fires(&self, value: f64, thresholds: &[f64]) -> Option<bool> {
        let first = *thresholds.first()?;
        let fired = match self {
            TriggerType::Above => value > first,
            TriggerType::AboveOrEqual => value >= first,
            TriggerType::Below => value < first,
            TriggerType::BelowOrEqual => value <= first,
            TriggerType::Equal => value == first,
            TriggerType::NotEqual => value != first,
            TriggerType::Between | TriggerType::NotBetween => {
                let second = *thresholds.get(1)?;
                let (low, high) = if first <= second { (first, second) } else { (second, first) };
                let inside = value >= low && value <= high;
                if *self == TriggerType::Between { inside } else { !inside }
            }
        };
        Some(fired)
    }
}

/// How a metric series is folded into a scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Aggregator {
    #[serde(alias = "ZIMSUM")]
    Sum,
    Avg,
    #[serde(alias = "MINMIN")]
    Min,
    #[serde(alias = "MINMAX")]
    Max,
    /// Population standard deviation.
    Dev,
    Count,
}

impl Aggregator {
    /// Fold a series into a scalar. Empty series have no value.
    pub fn apply(&self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let sum: f64 = values.iter().sum();

        let result = match self {
            Aggregator::Sum => sum,
            Aggregator::Avg => sum / n,
            Aggregator::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Aggregator::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Aggregator::Dev => {
                let mean = sum / n;
                let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
                variance.sqrt()
            }
            Aggregator::Count => n,
        };
        Some(result)
    }
}

/// A tier mapping a cumulative infraction count to a suspension duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspensionLevel {
    pub level_number: u32,
    /// Minimum violation count at which this level applies.
    pub infraction_count: u32,
    /// Duration in milliseconds, or [`PERMANENT`].
    pub suspension_time: i64,
}

impl SuspensionLevel {
    pub fn new(level_number: u32, infraction_count: u32, suspension_time: i64) -> Self {
        Self {
            level_number,
            infraction_count,
            suspension_time,
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.suspension_time == PERMANENT
    }
}

/// Rule set governing how a protected operation's usage is measured and escalated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    /// Unset until the authority has stored the policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<PolicyId>,
    pub service: String,
    pub name: String,
    #[serde(default)]
    pub owners: Vec<String>,
    /// Governed principals.
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub sub_system: String,
    pub trigger_type: TriggerType,
    pub aggregator: Aggregator,
    pub threshold: Vec<f64>,
    pub time_unit: TimeWindow,
    #[serde(default)]
    pub default_value: f64,
    #[serde(default)]
    pub cron_entry: String,
    #[serde(default)]
    pub levels: Vec<SuspensionLevel>,
}

impl Policy {
    /// Identity used for de-duplication and reconciliation.
    pub fn identity(&self) -> (&str, &str) {
        (&self.service, &self.name)
    }

    pub fn governs(&self, user: &str) -> bool {
        self.users.iter().any(|u| u == user)
    }

    /// Compare definitions, ignoring the store-assigned id.
    pub fn same_definition(&self, other: &Policy) -> bool {
        let mut a = self.clone();
        let mut b = other.clone();
        a.id = None;
        b.id = None;
        a == b
    }

    pub fn with_id(mut self, id: PolicyId) -> Self {
        self.id = Some(id);
        self
    }

    /// Check structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.service.trim().is_empty() {
            return Err(Error::config("policy service cannot be empty"));
        }
        if self.name.trim().is_empty() {
            return Err(Error::config("policy name cannot be empty"));
        }

        let required = self.trigger_type.required_thresholds();
        if self.threshold.len() < required {
            return Err(Error::config(format!(
                "policy {} needs {} threshold(s) for {:?}, got {}",
                self.name,
                required,
                self.trigger_type,
                self.threshold.len()
            )));
        }
        if self.threshold.iter().any(|t| !t.is_finite()) {
            return Err(Error::config(format!("policy {} has a non-finite threshold", self.name)));
        }

        let mut counts = HashSet::new();
        for level in &self.levels {
            if !counts.insert(level.infraction_count) {
                return Err(Error::config(format!(
                    "policy {} has duplicate infraction count {}",
                    self.name, level.infraction_count
                )));
            }
            if level.suspension_time < 0 && !level.is_permanent() {
                return Err(Error::config(format!(
                    "policy {} level {} has invalid suspension time {}",
                    self.name, level.level_number, level.suspension_time
                )));
            }
        }

        let ordered = self
            .levels
            .windows(2)
            .all(|w| w[0].infraction_count <= w[1].infraction_count);
        if !ordered {
            return Err(Error::config(format!(
                "policy {} levels must be ordered by infraction count",
                self.name
            )));
        }

        Ok(())
    }
}

/// Enforcement-side policy entry: a policy plus the routing key it guards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyConfig {
    /// Regular expression over the request path.
    pub url: String,
    /// Regular expression over the HTTP verb.
    pub verb: String,
    #[serde(flatten)]
    pub policy: Policy,
}

impl PolicyConfig {
    /// Composite routing key `url:verb`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.url, self.verb)
    }
}
