use crate::core::cluster_snapshot::ClusterSnapshot;
use crate::core::errors::AutoscalerResult;
use crate::core::node_info::NodeInfo;
use crate::core::pod::Pod;

#[derive(Debug, PartialEq)]
pub enum ScheduleError {
    NodeNotFound(String),
    NoSufficientNodes,
    /// A filter plugin rejected the node.
    PredicateFailed { plugin: String, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PodPlacement {
    pub pod: Pod,
    pub node_name: String,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ScheduleOutcome {
    pub placements: Vec<PodPlacement>,
    /// Number of controllers some of whose pods did not fit anywhere.
    pub overflowing_controllers: usize,
}

/// Which nodes of the snapshot a simulation may use.
pub type NodeFilter<'a> = &'a dyn Fn(&NodeInfo) -> bool;

pub fn all_nodes(_: &NodeInfo) -> bool {
    true
}

// Trait which should implement any scheduler simulation used by the autoscaler.
pub trait SchedulerOracle {
    /// Places as many of `pods` as possible onto snapshot nodes accepted by `node_filter`,
    /// adding each placed pod to the snapshot. With `break_on_first_failure` the simulation
    /// stops at the first pod which does not fit.
    fn try_schedule_pods(
        &self,
        snapshot: &mut ClusterSnapshot,
        pods: &[Pod],
        node_filter: NodeFilter,
        break_on_first_failure: bool,
    ) -> AutoscalerResult<ScheduleOutcome>;

    /// Checks whether `pod` fits on the named node of the snapshot.
    fn check_predicates(
        &self,
        snapshot: &ClusterSnapshot,
        pod: &Pod,
        node_name: &str,
    ) -> Result<(), ScheduleError>;
}
