//! Node together with everything scheduled on or published by it.

use serde::{Deserialize, Serialize};

use crate::core::common::{
    add_resources, resource_quantity, ResourceList, RESOURCE_CPU, RESOURCE_MEMORY,
};
use crate::core::csi::CsiNode;
use crate::core::node::Node;
use crate::core::pod::Pod;
use crate::core::resource_slice::ResourceSlice;

#[derive(Default, Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NodeInfo {
    pub node: Node,
    #[serde(default)]
    pub pods: Vec<Pod>,
    #[serde(default)]
    pub resource_slices: Vec<ResourceSlice>,
    #[serde(default)]
    pub csi_node: Option<CsiNode>,
}

impl NodeInfo {
    pub fn new(node: Node) -> Self {
        Self {
            node,
            pods: Default::default(),
            resource_slices: Default::default(),
            csi_node: None,
        }
    }

    pub fn name(&self) -> &str {
        self.node.name()
    }

    pub fn add_pod(&mut self, mut pod: Pod) {
        pod.spec.node_name = self.node.metadata.name.clone();
        self.pods.push(pod);
    }

    pub fn remove_pod(&mut self, uid: &str) -> Option<Pod> {
        let position = self.pods.iter().position(|p| p.uid() == uid)?;
        Some(self.pods.remove(position))
    }

    /// Sum of requests of all pods on the node.
    pub fn requested(&self) -> ResourceList {
        let mut total = ResourceList::new();
        for pod in self.pods.iter() {
            add_resources(&mut total, &pod.requests());
        }
        total
    }

    /// Allocatable minus requested for every allocatable resource.
    pub fn free(&self) -> ResourceList {
        let requested = self.requested();
        self.node
            .status
            .allocatable
            .iter()
            .map(|(name, quantity)| {
                (
                    name.clone(),
                    quantity - resource_quantity(&requested, name),
                )
            })
            .collect()
    }

    /// Utilization of a node, defined as maximum of cpu and memory.
    /// Per resource utilization is the sum of requests for it divided by allocatable.
    /// Pods selected by `skip` (DaemonSet and mirror pods usually) are not counted.
    pub fn utilization<F: Fn(&Pod) -> bool>(&self, skip: F) -> f64 {
        let mut requested = ResourceList::new();
        for pod in self.pods.iter().filter(|pod| !skip(pod)) {
            add_resources(&mut requested, &pod.requests());
        }
        let allocatable = &self.node.status.allocatable;

        let ratio = |name: &str| {
            let total = resource_quantity(allocatable, name);
            if total <= 0 {
                return 0.0;
            }
            resource_quantity(&requested, name) as f64 / total as f64
        };

        f64::max(ratio(RESOURCE_CPU), ratio(RESOURCE_MEMORY))
    }
}
