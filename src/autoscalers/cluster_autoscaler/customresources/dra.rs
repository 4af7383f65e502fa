//! DRA readiness: the node must publish every `(driver, pool)` of the template with exactly the
//! same device names. Pools the template does not know about are allowed.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::autoscalers::cluster_autoscaler::context::AutoscalingContext;
use crate::autoscalers::cluster_autoscaler::customresources::{
    node_group_template, override_unready, CustomResourceTarget, CustomResourcesProcessor,
};
use crate::autoscalers::cluster_autoscaler::interface::NodeGroup;
use crate::core::errors::AutoscalerResult;
use crate::core::node::Node;
use crate::core::resource_slice::{group_devices_by_pool, ResourceSlice};

#[derive(Default)]
pub struct DraCustomResourcesProcessor {}

impl DraCustomResourcesProcessor {
    pub fn new() -> Self {
        Self {}
    }

    pub fn slices_ready(template_slices: &[ResourceSlice], node_slices: &[ResourceSlice]) -> bool {
        let published = group_devices_by_pool(node_slices);
        group_devices_by_pool(template_slices)
            .iter()
            .all(|(pool, devices)| published.get(pool) == Some(devices))
    }
}

impl CustomResourcesProcessor for DraCustomResourcesProcessor {
    fn filter_unready_nodes_with_custom_resources(
        &self,
        ctx: &AutoscalingContext,
        all_nodes: Vec<Node>,
        ready_nodes: Vec<Node>,
    ) -> AutoscalerResult<(Vec<Node>, Vec<Node>)> {
        let mut slices_by_node: BTreeMap<String, Vec<ResourceSlice>> = Default::default();
        for slice in ctx.listers.resource_slices()?.into_iter() {
            slices_by_node
                .entry(slice.node_name.clone())
                .or_default()
                .push(slice);
        }

        let mut unready: BTreeSet<String> = Default::default();
        for node in ready_nodes.iter() {
            let template = match node_group_template(ctx, node)? {
                Some(template) => template,
                None => continue,
            };
            if template.resource_slices.is_empty() {
                continue;
            }
            let node_slices = slices_by_node
                .get(node.name())
                .map(|slices| slices.as_slice())
                .unwrap_or(&[]);
            if !Self::slices_ready(&template.resource_slices, node_slices) {
                debug!(
                    "Overriding status of node {:?}, which has not published all resource slices",
                    node.name()
                );
                unready.insert(node.name().to_string());
            }
        }
        Ok(override_unready(all_nodes, ready_nodes, &unready))
    }

    fn get_node_resource_targets(
        &self,
        _ctx: &AutoscalingContext,
        _node: &Node,
        _node_group: Option<&dyn NodeGroup>,
    ) -> AutoscalerResult<Vec<CustomResourceTarget>> {
        Ok(vec![])
    }
}
