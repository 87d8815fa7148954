//! Metric collaborator trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{Aggregator, PolicyId};

/// A single timestamped usage value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Datapoint {
    /// Epoch millis.
    pub timestamp: i64,
    pub value: f64,
}

/// Time-series storage for per-policy, per-principal usage.
#[async_trait]
pub trait MetricService: Send + Sync {
    /// Append a datapoint to the series of `(policy_id, user_name)`.
    async fn record(&self, policy_id: PolicyId, user_name: &str, point: Datapoint) -> Result<()>;

    /// Most recent value of the series, if any.
    async fn latest(&self, policy_id: PolicyId, user_name: &str) -> Result<Option<f64>>;

    /// Datapoints with `start <= timestamp <= end`, oldest first.
    async fn series(&self, policy_id: PolicyId, user_name: &str, start: i64, end: i64) -> Result<Vec<Datapoint>>;

    /// Aggregate the series over `[start, end]`. `None` when there is no data.
    async fn aggregate(
        &self,
        policy_id: PolicyId,
        user_name: &str,
        aggregator: Aggregator,
        start: i64,
        end: i64,
    ) -> Result<Option<f64>> {
        let values: Vec<f64> = self
            .series(policy_id, user_name, start, end)
            .await?
            .into_iter()
            .map(|p| p.value)
            .collect();
        Ok(aggregator.apply(&values))
    }
}
