use crate::autoscalers::cluster_autoscaler::context::AutoscalingContext;
use crate::autoscalers::cluster_autoscaler::podlistprocessor::PodListProcessor;
use crate::core::errors::AutoscalerResult;
use crate::core::pod::Pod;

/// Prefix of TPU resource names. Such workloads are not helped by adding nodes.
pub const TPU_RESOURCE_PREFIX: &str = "cloud-tpus.google.com/";

/// Strips TPU requests from pending pods.
#[derive(Default)]
pub struct ClearTpuRequestsPodListProcessor {}

impl PodListProcessor for ClearTpuRequestsPodListProcessor {
    fn name(&self) -> &'static str {
        "clear-tpu-requests"
    }

    fn process(
        &mut self,
        _ctx: &mut AutoscalingContext,
        mut pods: Vec<Pod>,
        _now: f64,
    ) -> AutoscalerResult<Vec<Pod>> {
        for pod in pods.iter_mut() {
            for container in pod.spec.containers.iter_mut() {
                container
                    .requests
                    .retain(|name, _| !name.starts_with(TPU_RESOURCE_PREFIX));
            }
        }
        Ok(pods)
    }
}
