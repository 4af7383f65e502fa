//! Cloud provider whose node groups live in an [`InMemoryCluster`]. Size changes take effect
//! at once: new nodes register Ready, deleted nodes disappear.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use log::debug;

use crate::autoscalers::cluster_autoscaler::in_memory::cluster::{
    InMemoryCluster, NodeGroupSpec, NODE_GROUP_LABEL,
};
use crate::autoscalers::cluster_autoscaler::interface::{
    CloudProvider, GpuConfig, Instance, InstanceState, NodeGroup, NodeGroupAutoscalingOptions,
    PricingModel, ResourceLimiter,
};
use crate::autoscalers::cluster_autoscaler::nodeinfos::TEMPLATE_NODE_PREFIX;
use crate::core::common::{
    resource_quantity, ResourceList, Taint, RESOURCE_CPU, RESOURCE_NVIDIA_GPU,
};
use crate::core::errors::{AutoscalerError, AutoscalerResult};
use crate::core::node::Node;
use crate::core::node_info::NodeInfo;
use crate::core::pod::Pod;

const AUTOPROVISIONED_PREFIX: &str = "nap";
const AUTOPROVISIONED_MAX_SIZE_DEFAULT: usize = 100;

#[derive(Clone)]
pub struct InMemoryNodeGroup {
    cluster: Rc<RefCell<InMemoryCluster>>,
    spec: NodeGroupSpec,
    exist: bool,
}

impl InMemoryNodeGroup {
    pub fn new(cluster: Rc<RefCell<InMemoryCluster>>, spec: NodeGroupSpec, exist: bool) -> Self {
        Self {
            cluster,
            spec,
            exist,
        }
    }

    fn ensure_exists(&self) -> AutoscalerResult<()> {
        if self.exist {
            Ok(())
        } else {
            Err(AutoscalerError::CloudProvider(format!(
                "node group {} does not exist",
                self.spec.id
            )))
        }
    }

    fn template_node(&self) -> Option<NodeInfo> {
        let mut template = self.spec.template.clone()?;
        let name = format!("{}{}", TEMPLATE_NODE_PREFIX, self.spec.id);
        template.node.metadata.name = name.clone();
        template.node.metadata.uid = name;
        template
            .node
            .metadata
            .labels
            .insert(NODE_GROUP_LABEL.to_string(), self.spec.id.clone());
        if template.node.status.allocatable.is_empty() {
            template.node.status.allocatable = template.node.status.capacity.clone();
        }
        Some(template)
    }
}

impl NodeGroup for InMemoryNodeGroup {
    fn id(&self) -> String {
        self.spec.id.clone()
    }

    fn min_size(&self) -> usize {
        self.spec.min_size
    }

    fn max_size(&self) -> usize {
        self.spec.max_size
    }

    fn target_size(&self) -> AutoscalerResult<usize> {
        self.ensure_exists()?;
        Ok(self.cluster.borrow().nodes_of_group(&self.spec.id).count())
    }

    fn increase_size(&self, delta: usize) -> AutoscalerResult<()> {
        self.ensure_exists()?;
        let id = &self.spec.id;
        if self.cluster.borrow().failing_increases.contains(id) {
            return Err(AutoscalerError::CloudProvider(format!(
                "cannot increase size of {}: quota exhausted in the zone",
                id
            )));
        }
        let target = self.target_size()?;
        if target + delta > self.spec.max_size {
            return Err(AutoscalerError::CloudProvider(format!(
                "size increase of {} too large: desired {}, max {}",
                id,
                target + delta,
                self.spec.max_size
            )));
        }
        let template = self.template_node().ok_or_else(|| {
            AutoscalerError::CloudProvider(format!("node group {} has no template", id))
        })?;

        let mut cluster = self.cluster.borrow_mut();
        for _ in 0..delta {
            let name = cluster.next_node_name(id);
            let mut node = template.node.clone();
            node.metadata.name = name.clone();
            node.metadata.uid = name.clone();
            if let Some(csi_node) = template.csi_node.as_ref() {
                let mut csi_node = csi_node.clone();
                csi_node.name = name.clone();
                cluster.csi_nodes.push(csi_node);
            }
            for slice in template.resource_slices.iter() {
                let mut slice = slice.clone();
                slice.name = format!("{}-{}", name, slice.name);
                slice.node_name = name.clone();
                cluster.resource_slices.push(slice);
            }
            debug!("Node {} of group {} registered", name, id);
            cluster.nodes.push(node);
        }
        Ok(())
    }

    fn delete_nodes(&self, nodes: &[Node]) -> AutoscalerResult<()> {
        self.ensure_exists()?;
        let target = self.target_size()?;
        if target < self.spec.min_size + nodes.len() {
            return Err(AutoscalerError::CloudProvider(format!(
                "cannot delete {} node(s) of {}: min size {} reached",
                nodes.len(),
                self.spec.id,
                self.spec.min_size
            )));
        }
        let mut cluster = self.cluster.borrow_mut();
        for node in nodes.iter() {
            if node.metadata.labels.get(NODE_GROUP_LABEL) != Some(&self.spec.id) {
                return Err(AutoscalerError::CloudProvider(format!(
                    "node {} does not belong to {}",
                    node.name(),
                    self.spec.id
                )));
            }
            if cluster.failing_deletes.contains(node.name()) {
                return Err(AutoscalerError::CloudProvider(format!(
                    "instance of node {} is stuck",
                    node.name()
                )));
            }
            cluster.remove_node(node.name());
        }
        Ok(())
    }

    fn nodes(&self) -> AutoscalerResult<Vec<Instance>> {
        self.ensure_exists()?;
        Ok(self
            .cluster
            .borrow()
            .nodes_of_group(&self.spec.id)
            .map(|node| Instance {
                id: node.name().to_string(),
                state: InstanceState::Running,
            })
            .collect())
    }

    fn template_node_info(&self) -> AutoscalerResult<NodeInfo> {
        self.template_node().ok_or(AutoscalerError::NotImplemented)
    }

    fn exist(&self) -> bool {
        self.exist
    }

    fn create(&self) -> AutoscalerResult<Box<dyn NodeGroup>> {
        if self.exist {
            return Err(AutoscalerError::CloudProvider(format!(
                "node group {} already exists",
                self.spec.id
            )));
        }
        let mut cluster = self.cluster.borrow_mut();
        if cluster.node_group_spec(&self.spec.id).is_some() {
            return Err(AutoscalerError::CloudProvider(format!(
                "node group {} already exists",
                self.spec.id
            )));
        }

        let extra_zones = self
            .spec
            .machine_type
            .as_ref()
            .and_then(|name| cluster.machine_type(name))
            .map(|machine| machine.extra_zones.clone())
            .unwrap_or_default();
        cluster.node_groups.push(self.spec.clone());
        for zone in extra_zones.iter() {
            let mut spec = self.spec.clone();
            spec.id = format!("{}-{}", self.spec.id, zone);
            if cluster.node_group_spec(&spec.id).is_none() {
                cluster.node_groups.push(spec);
            }
        }
        Ok(Box::new(InMemoryNodeGroup::new(
            self.cluster.clone(),
            self.spec.clone(),
            true,
        )))
    }

    fn delete(&self) -> AutoscalerResult<()> {
        self.ensure_exists()?;
        let mut cluster = self.cluster.borrow_mut();
        if cluster.nodes_of_group(&self.spec.id).next().is_some() {
            return Err(AutoscalerError::CloudProvider(format!(
                "node group {} still has nodes",
                self.spec.id
            )));
        }
        cluster.node_groups.retain(|spec| spec.id != self.spec.id);
        Ok(())
    }

    fn autoprovisioned(&self) -> bool {
        self.spec.autoprovisioned
    }

    fn get_options(
        &self,
        defaults: &NodeGroupAutoscalingOptions,
    ) -> AutoscalerResult<NodeGroupAutoscalingOptions> {
        Ok(self.spec.options.clone().unwrap_or_else(|| defaults.clone()))
    }

    fn debug(&self) -> String {
        match self.target_size() {
            Ok(target) => format!(
                "{} (min: {}, max: {}, target: {})",
                self.spec.id, self.spec.min_size, self.spec.max_size, target
            ),
            Err(_) => format!("{} (not created)", self.spec.id),
        }
    }
}

/// Hourly node prices per node group and a per core price for pods.
pub struct InMemoryPricingModel {
    node_prices: BTreeMap<String, f64>,
    core_price: f64,
}

impl PricingModel for InMemoryPricingModel {
    fn node_price(&self, node: &Node, start: f64, end: f64) -> AutoscalerResult<f64> {
        let group = node.metadata.labels.get(NODE_GROUP_LABEL).ok_or_else(|| {
            AutoscalerError::CloudProvider(format!("node {} has no node group", node.name()))
        })?;
        // Autoprovisioned groups are priced by their machine type.
        let price = self
            .node_prices
            .get(group)
            .or_else(|| {
                self.node_prices
                    .iter()
                    .find(|(key, _)| {
                        group.starts_with(&format!("{}-{}", AUTOPROVISIONED_PREFIX, key))
                    })
                    .map(|(_, price)| price)
            })
            .ok_or_else(|| {
                AutoscalerError::CloudProvider(format!("no price for node group {}", group))
            })?;
        Ok(price * (end - start) / 3600.0)
    }

    fn pod_price(&self, pod: &Pod, start: f64, end: f64) -> AutoscalerResult<f64> {
        let cores = resource_quantity(&pod.requests(), RESOURCE_CPU) as f64 / 1000.0;
        Ok(self.core_price * cores * (end - start) / 3600.0)
    }
}

pub struct InMemoryCloudProvider {
    cluster: Rc<RefCell<InMemoryCluster>>,
    gpu_label: String,
}

impl InMemoryCloudProvider {
    pub fn new(cluster: Rc<RefCell<InMemoryCluster>>) -> Self {
        let gpu_label = cluster.borrow().gpu_label.clone();
        Self { cluster, gpu_label }
    }

    fn group(&self, spec: &NodeGroupSpec) -> Box<dyn NodeGroup> {
        Box::new(InMemoryNodeGroup::new(
            self.cluster.clone(),
            spec.clone(),
            true,
        ))
    }
}

impl CloudProvider for InMemoryCloudProvider {
    fn name(&self) -> &str {
        "in-memory"
    }

    fn node_groups(&self) -> Vec<Box<dyn NodeGroup>> {
        self.cluster
            .borrow()
            .node_groups
            .iter()
            .map(|spec| self.group(spec))
            .collect()
    }

    fn node_group_for_node(&self, node: &Node) -> AutoscalerResult<Option<Box<dyn NodeGroup>>> {
        let id = match node.metadata.labels.get(NODE_GROUP_LABEL) {
            Some(id) => id,
            None => return Ok(None),
        };
        Ok(self
            .cluster
            .borrow()
            .node_group_spec(id)
            .map(|spec| self.group(spec)))
    }

    fn has_instance(&self, node: &Node) -> AutoscalerResult<bool> {
        Ok(self
            .cluster
            .borrow()
            .nodes
            .iter()
            .any(|known| known.name() == node.name()))
    }

    fn pricing(&self) -> AutoscalerResult<Box<dyn PricingModel>> {
        let cluster = self.cluster.borrow();
        if cluster.node_prices.is_empty() {
            return Err(AutoscalerError::NotImplemented);
        }
        Ok(Box::new(InMemoryPricingModel {
            node_prices: cluster.node_prices.clone(),
            core_price: cluster.core_price,
        }))
    }

    fn get_available_machine_types(&self) -> AutoscalerResult<Vec<String>> {
        Ok(self
            .cluster
            .borrow()
            .machine_types
            .iter()
            .map(|machine| machine.name.clone())
            .collect())
    }

    fn new_node_group(
        &self,
        machine_type: &str,
        labels: &BTreeMap<String, String>,
        system_labels: &BTreeMap<String, String>,
        taints: &[Taint],
        extra_resources: &ResourceList,
    ) -> AutoscalerResult<Box<dyn NodeGroup>> {
        let cluster = self.cluster.borrow();
        let machine = cluster.machine_type(machine_type).ok_or_else(|| {
            AutoscalerError::CloudProvider(format!("unknown machine type {}", machine_type))
        })?;

        let mut id = format!("{}-{}", AUTOPROVISIONED_PREFIX, machine_type);
        for value in labels.values().chain(system_labels.values()) {
            id.push('-');
            id.push_str(value);
        }

        let mut node = Node::new(&id, machine.cpu, machine.memory);
        node.metadata.labels.extend(labels.clone());
        node.metadata.labels.extend(system_labels.clone());
        node.spec.taints = taints.to_vec();
        for (resource, quantity) in extra_resources.iter() {
            node.status.capacity.insert(resource.clone(), *quantity);
            node.status.allocatable.insert(resource.clone(), *quantity);
        }

        let spec = NodeGroupSpec {
            id,
            min_size: 0,
            max_size: cluster
                .max_autoprovisioned_group_size
                .unwrap_or(AUTOPROVISIONED_MAX_SIZE_DEFAULT),
            template: Some(NodeInfo::new(node)),
            options: None,
            autoprovisioned: true,
            machine_type: Some(machine_type.to_string()),
        };
        Ok(Box::new(InMemoryNodeGroup::new(
            self.cluster.clone(),
            spec,
            false,
        )))
    }

    fn get_resource_limiter(&self) -> AutoscalerResult<ResourceLimiter> {
        self.cluster
            .borrow()
            .resource_limiter
            .clone()
            .ok_or(AutoscalerError::NotImplemented)
    }

    fn gpu_label(&self) -> &str {
        &self.gpu_label
    }

    fn get_node_gpu_config(&self, node: &Node) -> Option<GpuConfig> {
        let gpu_type = node.metadata.labels.get(&self.gpu_label)?;
        let config = match self.cluster.borrow().gpu_dra_driver.clone() {
            Some(driver) => GpuConfig {
                label: self.gpu_label.clone(),
                gpu_type: gpu_type.clone(),
                extended_resource_name: String::new(),
                dra_driver_name: driver,
            },
            None => GpuConfig {
                label: self.gpu_label.clone(),
                gpu_type: gpu_type.clone(),
                extended_resource_name: RESOURCE_NVIDIA_GPU.to_string(),
                dra_driver_name: String::new(),
            },
        };
        Some(config)
    }

    fn refresh(&self) -> AutoscalerResult<()> {
        match self.cluster.borrow().refresh_error.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn cleanup(&self) -> AutoscalerResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::autoscalers::cluster_autoscaler::in_memory::cloud_provider::InMemoryCloudProvider;
    use crate::autoscalers::cluster_autoscaler::in_memory::cluster::{
        InMemoryCluster, MachineType, NodeGroupSpec,
    };
    use crate::autoscalers::cluster_autoscaler::interface::CloudProvider;
    use crate::core::errors::ErrorKind;
    use crate::core::node::Node;
    use crate::core::node_info::NodeInfo;

    fn cluster() -> Rc<RefCell<InMemoryCluster>> {
        Rc::new(RefCell::new(InMemoryCluster {
            node_groups: vec![NodeGroupSpec {
                id: "ng".to_string(),
                min_size: 1,
                max_size: 2,
                template: Some(NodeInfo::new(Node::new("t", 1000, 1000))),
                ..Default::default()
            }],
            machine_types: vec![MachineType {
                name: "small".to_string(),
                cpu: 1000,
                memory: 1000,
                extra_zones: vec![],
            }],
            node_prices: [("small".to_string(), 2.0)].into(),
            ..Default::default()
        }))
    }

    #[test]
    fn test_size_changes_respect_bounds() {
        let cluster = cluster();
        let provider = InMemoryCloudProvider::new(cluster.clone());
        let group = provider.node_groups().pop().unwrap();

        group.increase_size(2).unwrap();
        assert_eq!(2, group.target_size().unwrap());
        let err = group.increase_size(1).unwrap_err();
        assert_eq!(ErrorKind::CloudProvider, err.kind());

        let nodes = cluster.borrow().nodes.clone();
        assert_eq!("ng-1", nodes[0].name());
        let found = provider.node_group_for_node(&nodes[0]).unwrap().unwrap();
        assert_eq!("ng", found.id());

        // Min size 1 keeps one node.
        assert!(group.delete_nodes(&nodes).is_err());
        group.delete_nodes(&nodes[..1]).unwrap();
        assert_eq!(1, group.target_size().unwrap());
        assert!(provider.node_group_for_node(&Node::new("x", 1, 1)).unwrap().is_none());
    }

    #[test]
    fn test_autoprovisioned_group_pricing() {
        let cluster = cluster();
        let provider = InMemoryCloudProvider::new(cluster.clone());
        let labels = [("zone".to_string(), "a".to_string())].into();
        let group = provider
            .new_node_group("small", &labels, &Default::default(), &[], &Default::default())
            .unwrap();
        assert_eq!("nap-small-a", group.id());
        assert!(!group.exist());
        assert_eq!(ErrorKind::CloudProvider, group.target_size().unwrap_err().kind());

        let template = group.template_node_info().unwrap();
        assert_eq!(Some(&"a".to_string()), template.node.metadata.labels.get("zone"));
        let price = provider
            .pricing()
            .unwrap()
            .node_price(&template.node, 0.0, 1800.0)
            .unwrap();
        assert_eq!(1.0, price);
    }
}
