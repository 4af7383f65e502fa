//! Simulated node removal: a node can go when every pod it runs that needs a new place gets
//! one on the remaining nodes.

use log::debug;

use crate::autoscalers::cluster_autoscaler::scaledown::candidates::{
    ignored_for_removal, ScaleDownCandidate,
};
use crate::autoscalers::cluster_autoscaler::scaledown::unremovable::{
    UnremovableNode, UnremovableReason,
};
use crate::core::cluster_snapshot::ClusterSnapshot;
use crate::core::errors::AutoscalerResult;
use crate::core::scheduler::interface::{all_nodes, SchedulerOracle};

#[derive(Default)]
pub struct RemovalSimulator {}

impl RemovalSimulator {
    pub fn new() -> Self {
        Default::default()
    }

    /// Removes candidates one after another in order, moving the pods of each removed node
    /// to the nodes left. Returns candidates which can all be removed together. The snapshot
    /// is left as it was.
    pub fn find_removable(
        &self,
        oracle: &dyn SchedulerOracle,
        snapshot: &mut ClusterSnapshot,
        candidates: Vec<ScaleDownCandidate>,
        unremovable: &mut Vec<UnremovableNode>,
    ) -> AutoscalerResult<Vec<ScaleDownCandidate>> {
        snapshot.fork();
        let result = self.remove_one_by_one(oracle, snapshot, candidates, unremovable);
        snapshot.revert()?;
        result
    }

    fn remove_one_by_one(
        &self,
        oracle: &dyn SchedulerOracle,
        snapshot: &mut ClusterSnapshot,
        candidates: Vec<ScaleDownCandidate>,
        unremovable: &mut Vec<UnremovableNode>,
    ) -> AutoscalerResult<Vec<ScaleDownCandidate>> {
        let mut removable = vec![];
        for candidate in candidates.into_iter() {
            snapshot.fork();
            match self.simulate_node_removal(oracle, snapshot, candidate.name()) {
                Ok(None) => {
                    snapshot.commit()?;
                    removable.push(candidate);
                }
                Ok(Some(reason)) => {
                    snapshot.revert()?;
                    unremovable.push(UnremovableNode::new(
                        candidate.name(),
                        Some(&candidate.node_group_id()),
                        reason,
                    ));
                }
                Err(err) => {
                    snapshot.revert()?;
                    return Err(err);
                }
            }
        }
        Ok(removable)
    }

    /// `None` when the node was removed from the snapshot with its pods placed elsewhere.
    fn simulate_node_removal(
        &self,
        oracle: &dyn SchedulerOracle,
        snapshot: &mut ClusterSnapshot,
        node_name: &str,
    ) -> AutoscalerResult<Option<UnremovableReason>> {
        let node_info = snapshot.remove_node(node_name)?;

        let mut to_move = vec![];
        for pod in node_info.pods.into_iter() {
            if ignored_for_removal(&pod) || pod.is_marked_for_deletion() {
                continue;
            }
            if !pod.is_recreatable() {
                debug!(
                    "Node {} is not removable: pod {} has no controller to recreate it",
                    node_name, pod.metadata.name
                );
                return Ok(Some(UnremovableReason::BlockedByPod));
            }
            to_move.push(pod);
        }
        if to_move.is_empty() {
            return Ok(None);
        }

        let outcome = oracle.try_schedule_pods(snapshot, &to_move, &all_nodes, true)?;
        if outcome.placements.len() != to_move.len() {
            debug!(
                "Node {} is not removable: only {} of {} pods can be moved",
                node_name,
                outcome.placements.len(),
                to_move.len()
            );
            return Ok(Some(UnremovableReason::NoPlaceToMovePods));
        }
        Ok(None)
    }
}
