//! What an iteration decided, returned from `run_once` and reported through events.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::autoscalers::cluster_autoscaler::interface::{AutoscaleAction, ScaleDownResult};
use crate::autoscalers::cluster_autoscaler::quota::tracker::ExceededQuota;
use crate::autoscalers::cluster_autoscaler::scaledown::unremovable::UnremovableNode;

#[derive(Clone, Copy, Debug, Default, Serialize, PartialEq, Eq)]
pub enum ScaleUpResult {
    #[default]
    NotNeeded,
    NoOptionsAvailable,
    Successful,
    Failed,
}

/// Why a node group was not considered for scale-up.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub enum SkipReason {
    NodeGroupReachedMaxSize,
    BackedOff,
    NoTemplate,
    NoPodsFit,
    MaxNodesTotalReached,
    AlreadyBeingCreated,
    QuotaExceeded(Vec<ExceededQuota>),
    AtomicGroupDoesNotFit,
    /// The iteration ran out of time before the group was evaluated.
    OutOfTime,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ScaleUpInfo {
    pub node_group_id: String,
    pub current_size: usize,
    pub new_size: usize,
    pub max_size: usize,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct ScaleUpStatus {
    pub result: ScaleUpResult,
    pub scale_up_infos: Vec<ScaleUpInfo>,
    pub created_node_groups: Vec<String>,
    /// Uids of pods the scale-up was made for.
    pub pods_triggered_scale_up: Vec<String>,
    pub pods_remain_unschedulable: Vec<String>,
    pub skipped_node_groups: BTreeMap<String, SkipReason>,
    pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ScaleDownNode {
    pub node_name: String,
    pub node_group_id: String,
    pub empty: bool,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ScaleDownStatus {
    pub result: ScaleDownResult,
    pub removed_nodes: Vec<ScaleDownNode>,
    /// Nodes found removable in this iteration, deleted or not.
    pub unneeded_nodes: Vec<String>,
    pub unremovable_nodes: Vec<UnremovableNode>,
    pub error: Option<String>,
}

impl Default for ScaleDownStatus {
    fn default() -> Self {
        Self {
            result: ScaleDownResult::NotTried,
            removed_nodes: vec![],
            unneeded_nodes: vec![],
            unremovable_nodes: vec![],
            error: None,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct RunOnceStatus {
    /// Pending pods left after the pod list processors.
    pub pending_pods: usize,
    pub selected_shard: Option<String>,
    pub scale_up: Option<ScaleUpStatus>,
    pub scale_down: Option<ScaleDownStatus>,
    pub removed_node_groups: Vec<String>,
}

impl RunOnceStatus {
    pub fn actions(&self) -> Vec<AutoscaleAction> {
        let mut actions = vec![];
        if let Some(scale_up) = self.scale_up.as_ref() {
            for info in scale_up.scale_up_infos.iter() {
                actions.push(AutoscaleAction::ScaleUp {
                    node_group_id: info.node_group_id.clone(),
                    delta: info.new_size - info.current_size,
                });
            }
        }
        if let Some(scale_down) = self.scale_down.as_ref() {
            for node in scale_down.removed_nodes.iter() {
                actions.push(AutoscaleAction::ScaleDown {
                    node_group_id: node.node_group_id.clone(),
                    node_name: node.node_name.clone(),
                });
            }
        }
        actions
    }
}
