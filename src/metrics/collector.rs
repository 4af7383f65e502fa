//! Implements centralized storage for metrics. Any autoscaler component may access it to
//! report scale-up, scale-down and node group events.

use average::{concatenate, Estimate, Max, Mean, Min, Variance};

concatenate!(
    Estimator,
    [Min, min],
    [Max, max],
    [Mean, mean],
    [Variance, population_variance]
);

#[derive(Debug, Default)]
pub struct EstimatorWrapper {
    estimator: Estimator,
}

impl std::fmt::Debug for Estimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Estimator")
            .field("min", &self.min)
            .field("max", &self.max)
            .field("mean", &self.mean)
            .field("population_variance", &self.population_variance).finish()
    }
}

impl EstimatorWrapper {
    pub fn new() -> Self {
        Self {
            estimator: Estimator::new(),
        }
    }

    pub fn add(&mut self, value: f64) {
        self.estimator.add(value);
    }

    pub fn min(&self) -> f64 {
        self.estimator.min()
    }

    pub fn max(&self) -> f64 {
        self.estimator.max()
    }

    pub fn mean(&self) -> f64 {
        self.estimator.mean()
    }

    pub fn population_variance(&self) -> f64 {
        self.estimator.population_variance()
    }
}

impl PartialEq for EstimatorWrapper {
    fn eq(&self, other: &Self) -> bool {
        self.min() == other.min() &&
        self.max() == other.max() &&
        self.mean() == other.mean() &&
        self.population_variance() == other.population_variance()
    }
}

#[derive(Default)]
pub struct MetricsCollector {
    /// Scale-ups whose `increase_size` call succeeded.
    pub scale_up_success: u64,
    pub scale_up_failed: u64,
    /// Nodes for which the actuator started deletion.
    pub scale_down_success: u64,
    /// Nodes whose deletion was reported failed by the actuator.
    pub scale_down_failed: u64,
    pub node_groups_created: u64,
    pub node_groups_deleted: u64,
    /// Sum over iterations of controllers with pods which did not fit anywhere.
    pub overflowing_controllers: u64,
    /// Pods skipped by the long-pending quarantine.
    pub quarantined_pods: u64,

    /// Estimations for the wall-clock duration (secs) of filtering out pods schedulable on
    /// existing nodes.
    pub filter_out_schedulable_duration_stats: EstimatorWrapper,

    // Auto scaler metrics
    /// Total number of scaled up nodes
    pub total_scaled_up_nodes: u64,
    /// Total number of scaled down nodes
    pub total_scaled_down_nodes: u64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn increment_filter_out_schedulable_duration(&mut self, value: f64) {
        self.filter_out_schedulable_duration_stats.add(value);
    }
}

#[cfg(test)]
mod tests {
    use crate::metrics::collector::MetricsCollector;

    #[test]
    fn test_duration_estimations() {
        let mut collector = MetricsCollector::new();
        collector.increment_filter_out_schedulable_duration(1.0);
        collector.increment_filter_out_schedulable_duration(3.0);
        let stats = &collector.filter_out_schedulable_duration_stats;
        assert_eq!(1.0, stats.min());
        assert_eq!(3.0, stats.max());
        assert_eq!(2.0, stats.mean());
        assert_eq!(1.0, stats.population_variance());
    }
}
