//! State of an in-memory cluster: node groups, nodes, pods and the provider knobs the in-memory
//! implementations read. Shared between them through `Rc<RefCell<InMemoryCluster>>`.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;

use crate::autoscalers::cluster_autoscaler::interface::{
    NodeGroupAutoscalingOptions, ResourceLimiter,
};
use crate::core::csi::CsiNode;
use crate::core::errors::{AutoscalerError, AutoscalerResult};
use crate::core::node::{ConditionStatus, Node, NodeConditionType};
use crate::core::node_info::NodeInfo;
use crate::core::pod::Pod;
use crate::core::resource_slice::ResourceSlice;

/// Nodes belong to the node group named by this label.
pub const NODE_GROUP_LABEL: &str = "node_group";

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct NodeGroupSpec {
    pub id: String,
    #[serde(default)]
    pub min_size: usize,
    pub max_size: usize,
    /// Groups without a template make the provider answer `NotImplemented`.
    #[serde(default)]
    pub template: Option<NodeInfo>,
    #[serde(default)]
    pub options: Option<NodeGroupAutoscalingOptions>,
    #[serde(default)]
    pub autoprovisioned: bool,
    /// Machine type an autoprovisioned group was built from.
    #[serde(default)]
    pub machine_type: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct MachineType {
    pub name: String,
    /// In millicores.
    pub cpu: i64,
    /// In bytes.
    pub memory: i64,
    /// Creating a group of this type also creates one per extra zone.
    #[serde(default)]
    pub extra_zones: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InMemoryCluster {
    #[serde(default)]
    pub node_groups: Vec<NodeGroupSpec>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub pods: Vec<Pod>,
    #[serde(default)]
    pub daemonset_pods: Vec<Pod>,
    #[serde(default)]
    pub pod_templates: Vec<Pod>,
    #[serde(default)]
    pub csi_nodes: Vec<CsiNode>,
    #[serde(default)]
    pub resource_slices: Vec<ResourceSlice>,
    #[serde(default)]
    pub machine_types: Vec<MachineType>,
    #[serde(default)]
    pub resource_limiter: Option<ResourceLimiter>,
    #[serde(default = "gpu_label_default")]
    pub gpu_label: String,
    /// GPUs of labeled nodes are published through this DRA driver instead of a device plugin.
    #[serde(default)]
    pub gpu_dra_driver: Option<String>,
    /// Hourly price of a node keyed by node group id. Pricing is unavailable when empty.
    #[serde(default)]
    pub node_prices: BTreeMap<String, f64>,
    /// Hourly price of one requested cpu core.
    #[serde(default)]
    pub core_price: f64,
    #[serde(default)]
    pub max_autoprovisioned_group_size: Option<usize>,

    // Failure injection, mostly for tests.
    /// Node group ids whose size increases fail.
    #[serde(default)]
    pub failing_increases: BTreeSet<String>,
    /// Node names whose deletion fails.
    #[serde(default)]
    pub failing_deletes: BTreeSet<String>,
    /// Nodes reported by the actuator as being drained.
    #[serde(default)]
    pub currently_drained: Vec<String>,
    #[serde(skip)]
    pub refresh_error: Option<AutoscalerError>,
}

fn gpu_label_default() -> String {
    "gpu".to_string()
}

impl InMemoryCluster {
    pub fn from_yaml(yaml: &str) -> AutoscalerResult<Self> {
        let mut cluster: InMemoryCluster = serde_yaml::from_str(yaml)?;
        cluster.validate()?;
        // Objects listed by name only get the name as uid, nodes without conditions are Ready.
        let templates = cluster
            .node_groups
            .iter_mut()
            .filter_map(|spec| spec.template.as_mut())
            .map(|template| &mut template.node);
        for node in cluster.nodes.iter_mut().chain(templates) {
            if node.metadata.uid.is_empty() {
                node.metadata.uid = node.metadata.name.clone();
            }
            if node.status.conditions.is_empty() {
                node.update_condition(NodeConditionType::Ready, ConditionStatus::True, "", 0.0);
            }
        }
        for pod in cluster
            .pods
            .iter_mut()
            .chain(cluster.daemonset_pods.iter_mut())
            .chain(cluster.pod_templates.iter_mut())
        {
            if pod.metadata.uid.is_empty() {
                pod.metadata.uid = pod.metadata.name.clone();
            }
        }
        Ok(cluster)
    }

    pub fn validate(&self) -> AutoscalerResult<()> {
        let mut ids = BTreeSet::new();
        for spec in self.node_groups.iter() {
            if spec.min_size > spec.max_size {
                return Err(AutoscalerError::Configuration(format!(
                    "node group {} has min size {} over max size {}",
                    spec.id, spec.min_size, spec.max_size
                )));
            }
            if !ids.insert(spec.id.as_str()) {
                return Err(AutoscalerError::Configuration(format!(
                    "node group {} is defined twice",
                    spec.id
                )));
            }
        }
        Ok(())
    }

    pub fn node_group_spec(&self, id: &str) -> Option<&NodeGroupSpec> {
        self.node_groups.iter().find(|spec| spec.id == id)
    }

    pub fn machine_type(&self, name: &str) -> Option<&MachineType> {
        self.machine_types.iter().find(|machine| machine.name == name)
    }

    pub fn nodes_of_group(&self, id: &str) -> impl Iterator<Item = &Node> {
        let id = id.to_string();
        self.nodes
            .iter()
            .filter(move |node| node.metadata.labels.get(NODE_GROUP_LABEL) == Some(&id))
    }

    /// First `{id}-{n}` name not taken by any node.
    pub fn next_node_name(&self, id: &str) -> String {
        let taken: BTreeSet<&str> = self.nodes.iter().map(|node| node.name()).collect();
        let mut index = 1;
        loop {
            let name = format!("{}-{}", id, index);
            if !taken.contains(name.as_str()) {
                return name;
            }
            index += 1;
        }
    }

    /// Removes the node. Pods which a controller would recreate become pending, the rest go
    /// away with the node.
    pub fn remove_node(&mut self, name: &str) -> Option<Node> {
        let idx = self.nodes.iter().position(|node| node.name() == name)?;
        let node = self.nodes.remove(idx);
        self.pods.retain(|pod| {
            pod.spec.node_name != name || (pod.is_recreatable() && !pod.is_daemonset_pod())
        });
        for pod in self.pods.iter_mut() {
            if pod.spec.node_name == name {
                pod.spec.node_name.clear();
            }
        }
        self.csi_nodes.retain(|csi_node| csi_node.name != name);
        self.resource_slices.retain(|slice| slice.node_name != name);
        self.currently_drained.retain(|drained| drained != name);
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use crate::autoscalers::cluster_autoscaler::in_memory::cluster::InMemoryCluster;
    use crate::core::errors::ErrorKind;

    #[test]
    fn test_cluster_from_yaml() {
        let cluster = InMemoryCluster::from_yaml(
            "
node_groups:
- id: ng-1
  max_size: 3
nodes:
- metadata:
    name: ng-1-1
    labels: {node_group: ng-1}
  status:
    allocatable: {cpu: 1000, memory: 1000}
machine_types:
- name: small
  cpu: 1000
  memory: 1000
",
        )
        .unwrap();
        assert_eq!(1, cluster.nodes_of_group("ng-1").count());
        assert!(cluster.nodes[0].is_ready());
        assert_eq!("ng-1-2", cluster.next_node_name("ng-1"));
        assert_eq!("gpu", cluster.gpu_label);
        assert!(cluster.machine_type("small").is_some());

        let err = InMemoryCluster::from_yaml("node_groups: [{id: a, min_size: 2, max_size: 1}]")
            .unwrap_err();
        assert_eq!(ErrorKind::Configuration, err.kind());
    }
}
