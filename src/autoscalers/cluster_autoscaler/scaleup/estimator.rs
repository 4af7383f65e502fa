//! Binpacking estimation of how many template nodes a list of pods needs.

use std::collections::BTreeSet;

use crate::core::cluster_snapshot::ClusterSnapshot;
use crate::core::errors::AutoscalerResult;
use crate::core::node_info::NodeInfo;
use crate::core::pod::Pod;
use crate::core::scheduler::interface::SchedulerOracle;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Estimate {
    pub node_count: usize,
    /// Pods which fit on the new nodes.
    pub scheduled_pods: Vec<Pod>,
}

#[derive(Default)]
pub struct BinpackingEstimator {}

impl BinpackingEstimator {
    pub fn new() -> Self {
        Default::default()
    }

    /// Packs `pods` first onto template nodes added so far, then onto a new one, adding at
    /// most `limit` nodes. The snapshot is left as it was.
    pub fn estimate(
        &self,
        oracle: &dyn SchedulerOracle,
        snapshot: &mut ClusterSnapshot,
        pods: &[Pod],
        template: &NodeInfo,
        limit: usize,
    ) -> AutoscalerResult<Estimate> {
        snapshot.fork();
        let result = self.binpack(oracle, snapshot, pods, template, limit);
        snapshot.revert()?;
        result
    }

    fn binpack(
        &self,
        oracle: &dyn SchedulerOracle,
        snapshot: &mut ClusterSnapshot,
        pods: &[Pod],
        template: &NodeInfo,
        limit: usize,
    ) -> AutoscalerResult<Estimate> {
        let mut added: BTreeSet<String> = BTreeSet::new();
        let mut estimate = Estimate::default();

        for pod in pods.iter() {
            let on_added = |node_info: &NodeInfo| added.contains(node_info.name());
            let outcome =
                oracle.try_schedule_pods(snapshot, std::slice::from_ref(pod), &on_added, true)?;
            if !outcome.placements.is_empty() {
                estimate.scheduled_pods.push(pod.clone());
                continue;
            }
            if added.len() >= limit {
                continue;
            }

            let fresh = node_from_template(template, added.len() + 1);
            let name = fresh.name().to_string();
            snapshot.add_node_info(fresh)?;
            if oracle.check_predicates(snapshot, pod, &name).is_err() {
                // The pod does not fit even on an empty template node.
                snapshot.remove_node(&name)?;
                continue;
            }
            snapshot.force_add_pod(pod.clone(), &name)?;
            added.insert(name);
            estimate.scheduled_pods.push(pod.clone());
        }

        estimate.node_count = added.len();
        Ok(estimate)
    }
}

/// Copy of `template` named uniquely by `index`, with its pods renamed after the copy.
pub fn node_from_template(template: &NodeInfo, index: usize) -> NodeInfo {
    let name = format!("{}-{}", template.name(), index);
    let mut node = template.node.clone();
    node.metadata.name = name.clone();
    node.metadata.uid = name.clone();

    let mut node_info = NodeInfo::new(node);
    for pod in template.pods.iter() {
        let mut pod = pod.clone();
        pod.metadata.name = format!("{}-{}", pod.metadata.name, index);
        pod.metadata.uid = format!("{}-{}", pod.metadata.uid, index);
        node_info.add_pod(pod);
    }
    node_info.resource_slices = template.resource_slices.clone();
    node_info.csi_node = template.csi_node.clone();
    node_info
}
