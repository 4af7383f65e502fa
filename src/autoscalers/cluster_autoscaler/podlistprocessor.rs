//! Ordered transforms and filters over pending pods, run before scale-up is considered.

pub mod clear_tpu;
pub mod currently_drained;
pub mod daemonset;
pub mod expendable;
pub mod filter_out_schedulable;
pub mod label_selector;
pub mod long_pending;
pub mod new_pod_delay;
pub mod pipeline;

use crate::autoscalers::cluster_autoscaler::context::AutoscalingContext;
use crate::core::errors::AutoscalerResult;
use crate::core::pod::Pod;

pub trait PodListProcessor {
    fn name(&self) -> &'static str;

    /// Returns the pods still worth a scale-up.
    fn process(
        &mut self,
        ctx: &mut AutoscalingContext,
        pods: Vec<Pod>,
        now: f64,
    ) -> AutoscalerResult<Vec<Pod>>;

    fn clean_up(&mut self) {}
}
