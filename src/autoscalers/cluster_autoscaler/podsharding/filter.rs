use crate::autoscalers::cluster_autoscaler::podsharding::descriptor::PodShard;
use crate::core::pod::Pod;

pub trait PodShardFilter {
    /// Pods which take part in the scale-up for the `selected` shard.
    fn filter_pods(
        &self,
        selected: &PodShard,
        all_shards: &[PodShard],
        pods: Vec<Pod>,
    ) -> Vec<Pod>;
}

/// Keeps only the pods of the selected shard.
#[derive(Default)]
pub struct SelectedShardFilter {}

impl PodShardFilter for SelectedShardFilter {
    fn filter_pods(
        &self,
        selected: &PodShard,
        _all_shards: &[PodShard],
        pods: Vec<Pod>,
    ) -> Vec<Pod> {
        pods.into_iter()
            .filter(|pod| selected.pod_uids.contains(pod.uid()))
            .collect()
    }
}
