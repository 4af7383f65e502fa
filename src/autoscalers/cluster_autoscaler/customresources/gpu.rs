//! GPU readiness: a node labeled as having GPUs is unready until it advertises a positive
//! allocatable amount of a GPU resource. GPUs managed by a DRA driver are left to the DRA
//! processor.

use std::collections::BTreeSet;

use log::debug;

use crate::autoscalers::cluster_autoscaler::context::AutoscalingContext;
use crate::autoscalers::cluster_autoscaler::customresources::{
    override_unready, CustomResourceTarget, CustomResourcesProcessor,
};
use crate::autoscalers::cluster_autoscaler::interface::NodeGroup;
use crate::core::common::{resource_quantity, RESOURCE_DIRECTX, RESOURCE_NVIDIA_GPU};
use crate::core::errors::{AutoscalerError, AutoscalerResult};
use crate::core::node::Node;

const GPU_RESOURCES: [&str; 2] = [RESOURCE_NVIDIA_GPU, RESOURCE_DIRECTX];

#[derive(Default)]
pub struct GpuCustomResourcesProcessor {}

impl GpuCustomResourcesProcessor {
    pub fn new() -> Self {
        Self {}
    }

    fn has_gpu_allocatable(node: &Node) -> bool {
        GPU_RESOURCES
            .iter()
            .any(|name| resource_quantity(&node.status.allocatable, name) > 0)
    }
}

impl CustomResourcesProcessor for GpuCustomResourcesProcessor {
    fn filter_unready_nodes_with_custom_resources(
        &self,
        ctx: &AutoscalingContext,
        all_nodes: Vec<Node>,
        ready_nodes: Vec<Node>,
    ) -> AutoscalerResult<(Vec<Node>, Vec<Node>)> {
        let mut unready: BTreeSet<String> = Default::default();
        for node in ready_nodes.iter() {
            let gpu_config = match ctx.cloud_provider.get_node_gpu_config(node) {
                Some(gpu_config) => gpu_config,
                None => continue,
            };
            if gpu_config.exposed_via_dra() {
                continue;
            }
            if !Self::has_gpu_allocatable(node) {
                debug!(
                    "Overriding status of node {:?}, which seems to have unready GPU",
                    node.name()
                );
                unready.insert(node.name().to_string());
            }
        }
        Ok(override_unready(all_nodes, ready_nodes, &unready))
    }

    fn get_node_resource_targets(
        &self,
        ctx: &AutoscalingContext,
        node: &Node,
        node_group: Option<&dyn NodeGroup>,
    ) -> AutoscalerResult<Vec<CustomResourceTarget>> {
        let gpu_type = match ctx.cloud_provider.get_node_gpu_config(node) {
            Some(gpu_config) => gpu_config.gpu_type,
            None => return Ok(vec![]),
        };

        let allocatable = resource_quantity(&node.status.allocatable, RESOURCE_NVIDIA_GPU);
        if allocatable > 0 {
            return Ok(vec![CustomResourceTarget {
                resource_type: gpu_type,
                resource_count: allocatable,
            }]);
        }

        // The node has not published its GPUs yet, what it will have comes from the template.
        let template = match node_group {
            Some(node_group) => node_group.template_node_info().map_err(|err| {
                AutoscalerError::Internal(format!(
                    "failed to build template for GPU node {}: {}",
                    node.name(),
                    err
                ))
            })?,
            None => {
                return Err(AutoscalerError::Internal(format!(
                    "GPU node {} has no node group to read GPU count from",
                    node.name()
                )))
            }
        };
        let count = resource_quantity(&template.node.status.capacity, RESOURCE_NVIDIA_GPU);
        if count > 0 {
            return Ok(vec![CustomResourceTarget {
                resource_type: gpu_type,
                resource_count: count,
            }]);
        }
        Ok(vec![])
    }
}
