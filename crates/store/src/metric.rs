//! In-memory usage time-series.

use async_trait::async_trait;
use dashmap::DashMap;

use warden_core::{
    traits::{Datapoint, MetricService},
    types::PolicyId,
    Result,
};

/// Per `(policy, principal)` series kept ordered by timestamp.
#[derive(Debug)]
pub struct InMemoryMetricService {
    series: DashMap<(PolicyId, String), Vec<Datapoint>>,
    /// Oldest datapoints are dropped beyond this many per series.
    max_points: usize,
}

impl InMemoryMetricService {
    /// Create a new metric service.
    pub fn new() -> Self {
        Self {
            series: DashMap::new(),
            max_points: 10_000,
        }
    }

    /// Set the per-series capacity.
    pub fn with_max_points(mut self, max_points: usize) -> Self {
        self.max_points = max_points.max(1);
        self
    }

    /// Number of tracked series.
    pub fn len(&self) -> usize {
        self.series.len()
    }

    /// Check if no series is tracked.
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

impl Default for InMemoryMetricService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricService for InMemoryMetricService {
    async fn record(&self, policy_id: PolicyId, user_name: &str, point: Datapoint) -> Result<()> {
        let mut series = self
            .series
            .entry((policy_id, user_name.to_string()))
            .or_default();

        let at = series.partition_point(|p| p.timestamp <= point.timestamp);
        series.insert(at, point);

        if series.len() > self.max_points {
            let overflow = series.len() - self.max_points;
            series.drain(..overflow);
        }

        Ok(())
    }

    async fn latest(&self, policy_id: PolicyId, user_name: &str) -> Result<Option<f64>> {
        Ok(self
            .series
            .get(&(policy_id, user_name.to_string()))
            .and_then(|s| s.last().map(|p| p.value)))
    }

    async fn series(&self, policy_id: PolicyId, user_name: &str, start: i64, end: i64) -> Result<Vec<Datapoint>> {
        Ok(self
            .series
            .get(&(policy_id, user_name.to_string()))
            .map(|s| {
                s.iter()
                    .filter(|p| p.timestamp >= start && p.timestamp <= end)
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::types::Aggregator;

    fn point(timestamp: i64, value: f64) -> Datapoint {
        Datapoint { timestamp, value }
    }

    #[tokio::test]
    async fn test_series_is_ordered_and_windowed() {
        let metrics = InMemoryMetricService::new();

        metrics.record(1, "u", point(300, 3.0)).await.unwrap();
        metrics.record(1, "u", point(100, 1.0)).await.unwrap();
        metrics.record(1, "u", point(200, 2.0)).await.unwrap();

        let series = metrics.series(1, "u", 150, 300).await.unwrap();
        assert_eq!(series, vec![point(200, 2.0), point(300, 3.0)]);
        assert_eq!(metrics.latest(1, "u").await.unwrap(), Some(3.0));
        assert_eq!(metrics.latest(1, "other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_aggregate_over_window() {
        let metrics = InMemoryMetricService::new();

        for (t, v) in [(10, 1.0), (20, 5.0), (30, 3.0)] {
            metrics.record(7, "u", point(t, v)).await.unwrap();
        }

        assert_eq!(metrics.aggregate(7, "u", Aggregator::Max, 0, 30).await.unwrap(), Some(5.0));
        assert_eq!(metrics.aggregate(7, "u", Aggregator::Sum, 15, 30).await.unwrap(), Some(8.0));
        assert_eq!(metrics.aggregate(7, "u", Aggregator::Sum, 31, 40).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_capacity_drops_oldest() {
        let metrics = InMemoryMetricService::new().with_max_points(2);

        for t in 0..5 {
            metrics.record(1, "u", point(t, t as f64)).await.unwrap();
        }

        let series = metrics.series(1, "u", 0, 10).await.unwrap();
        assert_eq!(series, vec![point(3, 3.0), point(4, 4.0)]);
    }
}
