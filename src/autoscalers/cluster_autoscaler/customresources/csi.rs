//! CSI readiness: every driver the group template expects must be registered on the live node.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::autoscalers::cluster_autoscaler::context::AutoscalingContext;
use crate::autoscalers::cluster_autoscaler::customresources::{
    node_group_template, override_unready, CustomResourceTarget, CustomResourcesProcessor,
};
use crate::autoscalers::cluster_autoscaler::interface::NodeGroup;
use crate::core::csi::CsiNode;
use crate::core::errors::AutoscalerResult;
use crate::core::node::Node;

#[derive(Default)]
pub struct CsiCustomResourcesProcessor {}

impl CsiCustomResourcesProcessor {
    pub fn new() -> Self {
        Self {}
    }

    /// True if `live` registers every driver of `expected`. Extra drivers are fine.
    pub fn drivers_ready(expected: &CsiNode, live: Option<&CsiNode>) -> bool {
        let live_drivers: BTreeSet<&str> = live.map(|n| n.driver_names()).unwrap_or_default();
        expected
            .driver_names()
            .iter()
            .all(|driver| live_drivers.contains(driver))
    }
}

impl CustomResourcesProcessor for CsiCustomResourcesProcessor {
    fn filter_unready_nodes_with_custom_resources(
        &self,
        ctx: &AutoscalingContext,
        all_nodes: Vec<Node>,
        ready_nodes: Vec<Node>,
    ) -> AutoscalerResult<(Vec<Node>, Vec<Node>)> {
        let csi_nodes: BTreeMap<String, CsiNode> = ctx
            .listers
            .csi_nodes()?
            .into_iter()
            .map(|csi_node| (csi_node.name.clone(), csi_node))
            .collect();

        let mut unready: BTreeSet<String> = Default::default();
        for node in ready_nodes.iter() {
            let template = match node_group_template(ctx, node)? {
                Some(template) => template,
                None => continue,
            };
            let expected = match template.csi_node.as_ref() {
                Some(expected) => expected,
                None => continue,
            };
            if !Self::drivers_ready(expected, csi_nodes.get(node.name())) {
                debug!(
                    "Overriding status of node {:?}, which has CSI drivers not registered yet",
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

#[cfg(test)]
mod tests {
    use crate::autoscalers::cluster_autoscaler::customresources::csi::CsiCustomResourcesProcessor;
    use crate::core::csi::CsiNode;

    #[test]
    fn test_driver_subset() {
        let expected = CsiNode::new("template", &["d1", "d2"]);
        assert!(!CsiCustomResourcesProcessor::drivers_ready(
            &expected,
            Some(&CsiNode::new("n2", &["d1"]))
        ));
        assert!(CsiCustomResourcesProcessor::drivers_ready(
            &expected,
            Some(&CsiNode::new("n2", &["d2", "d1", "d3"]))
        ));
        assert!(!CsiCustomResourcesProcessor::drivers_ready(&expected, None));
        assert!(CsiCustomResourcesProcessor::drivers_ready(
            &CsiNode::new("template", &[]),
            None
        ));
    }
}
