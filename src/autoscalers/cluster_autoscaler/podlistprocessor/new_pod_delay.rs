use log::debug;

use crate::autoscalers::cluster_autoscaler::context::AutoscalingContext;
use crate::autoscalers::cluster_autoscaler::podlistprocessor::PodListProcessor;
use crate::core::errors::AutoscalerResult;
use crate::core::pod::Pod;

/// Holds back pods younger than `new_pod_scale_up_delay`, the scheduler may still place them.
#[derive(Default)]
pub struct NewPodScaleUpDelayPodListProcessor {}

impl PodListProcessor for NewPodScaleUpDelayPodListProcessor {
    fn name(&self) -> &'static str {
        "new-pod-scale-up-delay"
    }

    fn process(
        &mut self,
        ctx: &mut AutoscalingContext,
        pods: Vec<Pod>,
        now: f64,
    ) -> AutoscalerResult<Vec<Pod>> {
        let delay = ctx.options.new_pod_scale_up_delay;
        if delay <= 0.0 {
            return Ok(pods);
        }
        Ok(pods
            .into_iter()
            .filter(|pod| {
                let old_enough = pod.metadata.creation_timestamp + delay <= now;
                if !old_enough {
                    debug!("Pod {:?} is too new for scale-up", pod.metadata.name);
                }
                old_enough
            })
            .collect())
    }
}
