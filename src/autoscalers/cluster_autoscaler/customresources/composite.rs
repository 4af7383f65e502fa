//! Runs readiness processors one after another, each seeing the overrides of the previous ones.

use crate::autoscalers::cluster_autoscaler::context::AutoscalingContext;
use crate::autoscalers::cluster_autoscaler::customresources::csi::CsiCustomResourcesProcessor;
use crate::autoscalers::cluster_autoscaler::customresources::dra::DraCustomResourcesProcessor;
use crate::autoscalers::cluster_autoscaler::customresources::gpu::GpuCustomResourcesProcessor;
use crate::autoscalers::cluster_autoscaler::customresources::{
    CustomResourceTarget, CustomResourcesProcessor,
};
use crate::autoscalers::cluster_autoscaler::interface::NodeGroup;
use crate::config::AutoscalerConfig;
use crate::core::errors::AutoscalerResult;
use crate::core::node::Node;

pub struct CompositeCustomResourcesProcessor {
    processors: Vec<Box<dyn CustomResourcesProcessor>>,
}

impl CompositeCustomResourcesProcessor {
    pub fn new(processors: Vec<Box<dyn CustomResourcesProcessor>>) -> Self {
        Self { processors }
    }

    /// GPU, then DRA and CSI when enabled.
    pub fn from_config(config: &AutoscalerConfig) -> Self {
        let mut processors: Vec<Box<dyn CustomResourcesProcessor>> =
            vec![Box::new(GpuCustomResourcesProcessor::new())];
        if config.dynamic_resource_allocation_enabled {
            processors.push(Box::new(DraCustomResourcesProcessor::new()));
        }
        if config.csi_node_aware_scheduling_enabled {
            processors.push(Box::new(CsiCustomResourcesProcessor::new()));
        }
        Self::new(processors)
    }
}

impl CustomResourcesProcessor for CompositeCustomResourcesProcessor {
    fn filter_unready_nodes_with_custom_resources(
        &self,
        ctx: &AutoscalingContext,
        all_nodes: Vec<Node>,
        ready_nodes: Vec<Node>,
    ) -> AutoscalerResult<(Vec<Node>, Vec<Node>)> {
        let mut nodes = (all_nodes, ready_nodes);
        for processor in self.processors.iter() {
            nodes = processor.filter_unready_nodes_with_custom_resources(ctx, nodes.0, nodes.1)?;
        }
        Ok(nodes)
    }

    fn get_node_resource_targets(
        &self,
        ctx: &AutoscalingContext,
        node: &Node,
        node_group: Option<&dyn NodeGroup>,
    ) -> AutoscalerResult<Vec<CustomResourceTarget>> {
        let mut targets = vec![];
        for processor in self.processors.iter() {
            targets.extend(processor.get_node_resource_targets(ctx, node, node_group)?);
        }
        Ok(targets)
    }

    fn clean_up(&mut self) {
        for processor in self.processors.iter_mut() {
            processor.clean_up();
        }
    }
}
