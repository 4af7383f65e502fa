use std::cell::RefCell;
use std::rc::Rc;

use crate::autoscalers::cluster_autoscaler::in_memory::cluster::InMemoryCluster;
use crate::autoscalers::cluster_autoscaler::interface::ListerRegistry;
use crate::core::csi::CsiNode;
use crate::core::errors::AutoscalerResult;
use crate::core::node::Node;
use crate::core::pod::Pod;
use crate::core::resource_slice::ResourceSlice;

/// Lists cluster objects as of the moment of the call.
pub struct InMemoryListerRegistry {
    cluster: Rc<RefCell<InMemoryCluster>>,
}

impl InMemoryListerRegistry {
    pub fn new(cluster: Rc<RefCell<InMemoryCluster>>) -> Self {
        Self { cluster }
    }
}

impl ListerRegistry for InMemoryListerRegistry {
    fn all_nodes(&self) -> AutoscalerResult<Vec<Node>> {
        Ok(self.cluster.borrow().nodes.clone())
    }

    fn ready_nodes(&self) -> AutoscalerResult<Vec<Node>> {
        Ok(self
            .cluster
            .borrow()
            .nodes
            .iter()
            .filter(|node| node.is_ready())
            .cloned()
            .collect())
    }

    fn all_pods(&self) -> AutoscalerResult<Vec<Pod>> {
        Ok(self.cluster.borrow().pods.clone())
    }

    fn daemonset_pods(&self) -> AutoscalerResult<Vec<Pod>> {
        Ok(self.cluster.borrow().daemonset_pods.clone())
    }

    fn pod_templates(&self) -> AutoscalerResult<Vec<Pod>> {
        Ok(self.cluster.borrow().pod_templates.clone())
    }

    fn csi_nodes(&self) -> AutoscalerResult<Vec<CsiNode>> {
        Ok(self.cluster.borrow().csi_nodes.clone())
    }

    fn resource_slices(&self) -> AutoscalerResult<Vec<ResourceSlice>> {
        Ok(self.cluster.borrow().resource_slices.clone())
    }
}
