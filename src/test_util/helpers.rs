//! Builders for autoscalers running against an in-memory cluster. Shared by unit and
//! integration tests.

use std::cell::RefCell;
use std::rc::Rc;

use crate::autoscalers::cluster_autoscaler::cluster_autoscaler::ClusterAutoscaler;
use crate::autoscalers::cluster_autoscaler::in_memory::cluster::{
    InMemoryCluster, MachineType, NodeGroupSpec, NODE_GROUP_LABEL,
};
use crate::autoscalers::cluster_autoscaler::in_memory::in_memory_context;
use crate::autoscalers::cluster_autoscaler::interface::{Event, ResourceLimiter};
use crate::config::AutoscalerConfig;
use crate::core::common::{OwnerReference, ResourceList, RESOURCE_NVIDIA_GPU};
use crate::core::csi::CsiNode;
use crate::core::node::Node;
use crate::core::node_info::NodeInfo;
use crate::core::pod::{Pod, DAEMONSET_KIND};
use crate::core::resource_slice::ResourceSlice;
use crate::metrics::collector::MetricsCollector;

pub const TEST_GPU_TYPE: &str = "nvidia-tesla-t4";

pub struct TestEnv {
    pub autoscaler: ClusterAutoscaler,
    pub cluster: Rc<RefCell<InMemoryCluster>>,
    pub events: Rc<RefCell<Vec<Event>>>,
    pub metrics: Rc<RefCell<MetricsCollector>>,
}

impl TestEnv {
    pub fn event_reasons(&self, object: &str) -> Vec<String> {
        self.events
            .borrow()
            .iter()
            .filter(|event| event.object == object)
            .map(|event| event.reason.clone())
            .collect()
    }
}

#[derive(Default)]
pub struct TestAutoscalerBuilder {
    config: AutoscalerConfig,
    cluster: InMemoryCluster,
    atomic_groups: Vec<String>,
}

impl TestAutoscalerBuilder {
    pub fn new() -> Self {
        Self {
            cluster: InMemoryCluster {
                gpu_label: "gpu".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn with_config(mut self, config: AutoscalerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_cluster(mut self, cluster: InMemoryCluster) -> Self {
        self.cluster = cluster;
        self
    }

    pub fn with_gpu_dra_driver(mut self, driver: &str) -> Self {
        self.cluster.gpu_dra_driver = Some(driver.to_string());
        self
    }

    pub fn with_node_group(
        mut self,
        id: &str,
        min_size: usize,
        max_size: usize,
        cpu: i64,
        memory: i64,
    ) -> Self {
        self.cluster.node_groups.push(NodeGroupSpec {
            id: id.to_string(),
            min_size,
            max_size,
            template: Some(NodeInfo::new(Node::new(id, cpu, memory))),
            ..Default::default()
        });
        self
    }

    /// Group whose nodes must be all present or all absent.
    pub fn with_atomic_node_group(
        mut self,
        id: &str,
        min_size: usize,
        max_size: usize,
        cpu: i64,
        memory: i64,
    ) -> Self {
        self.atomic_groups.push(id.to_string());
        self.with_node_group(id, min_size, max_size, cpu, memory)
    }

    pub fn with_gpu_node_group(
        mut self,
        id: &str,
        min_size: usize,
        max_size: usize,
        gpus: i64,
    ) -> Self {
        let mut node = Node::new(id, 4000, 16 << 30);
        node.metadata
            .labels
            .insert(self.cluster.gpu_label.clone(), TEST_GPU_TYPE.to_string());
        node.status
            .capacity
            .insert(RESOURCE_NVIDIA_GPU.to_string(), gpus);
        node.status
            .allocatable
            .insert(RESOURCE_NVIDIA_GPU.to_string(), gpus);
        self.cluster.node_groups.push(NodeGroupSpec {
            id: id.to_string(),
            min_size,
            max_size,
            template: Some(NodeInfo::new(node)),
            ..Default::default()
        });
        self
    }

    pub fn with_node_group_template(
        mut self,
        id: &str,
        min_size: usize,
        max_size: usize,
        template: NodeInfo,
    ) -> Self {
        self.cluster.node_groups.push(NodeGroupSpec {
            id: id.to_string(),
            min_size,
            max_size,
            template: Some(template),
            ..Default::default()
        });
        self
    }

    pub fn with_templateless_node_group(
        mut self,
        id: &str,
        min_size: usize,
        max_size: usize,
    ) -> Self {
        self.cluster.node_groups.push(NodeGroupSpec {
            id: id.to_string(),
            min_size,
            max_size,
            template: None,
            ..Default::default()
        });
        self
    }

    /// Adds `count` registered nodes named `{group}-1`, `{group}-2` and so on.
    pub fn with_nodes_in_group(
        mut self,
        group: &str,
        count: usize,
        cpu: i64,
        memory: i64,
    ) -> Self {
        for _ in 0..count {
            let name = self.cluster.next_node_name(group);
            self.cluster.nodes.push(node_in_group(&name, group, cpu, memory));
        }
        self
    }

    pub fn with_node(mut self, node: Node) -> Self {
        self.cluster.nodes.push(node);
        self
    }

    pub fn with_pod(mut self, pod: Pod) -> Self {
        self.cluster.pods.push(pod);
        self
    }

    pub fn with_csi_node(mut self, csi_node: CsiNode) -> Self {
        self.cluster.csi_nodes.push(csi_node);
        self
    }

    pub fn with_resource_slice(mut self, slice: ResourceSlice) -> Self {
        self.cluster.resource_slices.push(slice);
        self
    }

    pub fn with_daemonset_pod(mut self, pod: Pod) -> Self {
        self.cluster.daemonset_pods.push(pod);
        self
    }

    pub fn with_pod_template(mut self, pod: Pod) -> Self {
        self.cluster.pod_templates.push(pod);
        self
    }

    pub fn with_machine_type(self, name: &str, cpu: i64, memory: i64) -> Self {
        self.with_machine_type_in_zones(name, cpu, memory, &[])
    }

    pub fn with_machine_type_in_zones(
        mut self,
        name: &str,
        cpu: i64,
        memory: i64,
        extra_zones: &[&str],
    ) -> Self {
        self.cluster.machine_types.push(MachineType {
            name: name.to_string(),
            cpu,
            memory,
            extra_zones: extra_zones.iter().map(|zone| zone.to_string()).collect(),
        });
        self
    }

    pub fn with_min_limits(mut self, min_limits: ResourceList) -> Self {
        self.cluster
            .resource_limiter
            .get_or_insert_with(ResourceLimiter::default)
            .min_limits = min_limits;
        self
    }

    pub fn with_max_limits(mut self, max_limits: ResourceList) -> Self {
        self.cluster
            .resource_limiter
            .get_or_insert_with(ResourceLimiter::default)
            .max_limits = max_limits;
        self
    }

    pub fn with_node_price(mut self, group: &str, hourly: f64) -> Self {
        self.cluster.node_prices.insert(group.to_string(), hourly);
        self
    }

    pub fn build(mut self) -> TestEnv {
        let defaults = self.config.node_group_defaults();
        for spec in self.cluster.node_groups.iter_mut() {
            if self.atomic_groups.contains(&spec.id) {
                let mut options = defaults.clone();
                options.zero_or_max_node_scaling = true;
                spec.options = Some(options);
            }
        }

        let cluster = Rc::new(RefCell::new(self.cluster));
        let metrics = Rc::new(RefCell::new(MetricsCollector::new()));
        let (context, events) = in_memory_context(self.config, cluster.clone(), metrics.clone());
        let autoscaler = ClusterAutoscaler::new(context).unwrap();
        TestEnv {
            autoscaler,
            cluster,
            events,
            metrics,
        }
    }
}

/// Ready node registered in `group`.
pub fn node_in_group(name: &str, group: &str, cpu: i64, memory: i64) -> Node {
    let mut node = Node::new(name, cpu, memory);
    node.metadata
        .labels
        .insert(NODE_GROUP_LABEL.to_string(), group.to_string());
    node
}

/// Node labeled with a gpu type which publishes `gpus` allocatable gpus.
pub fn gpu_node(name: &str, group: &str, gpus: i64) -> Node {
    let mut node = node_in_group(name, group, 4000, 16 << 30);
    node.metadata
        .labels
        .insert("gpu".to_string(), TEST_GPU_TYPE.to_string());
    if gpus > 0 {
        node.status
            .allocatable
            .insert(RESOURCE_NVIDIA_GPU.to_string(), gpus);
    }
    node
}

/// Pod managed by a ReplicaSet with uid `owner_uid`.
pub fn owned_pod(name: &str, owner_uid: &str, cpu: i64, memory: i64) -> Pod {
    let mut pod = Pod::new(name, cpu, memory);
    pod.metadata.owner_references.push(OwnerReference {
        kind: "ReplicaSet".to_string(),
        name: owner_uid.to_string(),
        uid: owner_uid.to_string(),
        controller: true,
    });
    pod
}

pub fn daemonset_pod(name: &str, cpu: i64, memory: i64) -> Pod {
    let mut pod = Pod::new(name, cpu, memory);
    pod.metadata.owner_references.push(OwnerReference {
        kind: DAEMONSET_KIND.to_string(),
        name: name.to_string(),
        uid: name.to_string(),
        controller: true,
    });
    pod
}

pub fn on_node(mut pod: Pod, node: &str) -> Pod {
    pod.spec.node_name = node.to_string();
    pod
}
