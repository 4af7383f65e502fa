use crate::autoscalers::cluster_autoscaler::context::AutoscalingContext;
use crate::autoscalers::cluster_autoscaler::podlistprocessor::PodListProcessor;
use crate::core::errors::AutoscalerResult;
use crate::core::pod::Pod;

/// DaemonSet pods cannot be helped by scale-up, every new node brings its own copy.
#[derive(Default)]
pub struct FilterOutDaemonSetPodListProcessor {}

impl PodListProcessor for FilterOutDaemonSetPodListProcessor {
    fn name(&self) -> &'static str {
        "filter-out-daemonset"
    }

    fn process(
        &mut self,
        _ctx: &mut AutoscalingContext,
        pods: Vec<Pod>,
        _now: f64,
    ) -> AutoscalerResult<Vec<Pod>> {
        Ok(pods.into_iter().filter(|pod| !pod.is_daemonset_pod()).collect())
    }
}
