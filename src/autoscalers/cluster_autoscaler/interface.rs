//! Interfaces of the collaborators the autoscaler drives: cloud provider, node groups,
//! actuator, listers and event recorder.

use std::collections::BTreeMap;

use downcast_rs::{impl_downcast, Downcast};
use dyn_clone::DynClone;
use serde::{Deserialize, Serialize};

use crate::core::common::{ResourceList, Taint, RESOURCE_NVIDIA_GPU};
use crate::core::csi::CsiNode;
use crate::core::errors::{AutoscalerError, AutoscalerResult};
use crate::core::node::Node;
use crate::core::node_info::NodeInfo;
use crate::core::pod::Pod;
use crate::core::resource_slice::ResourceSlice;

/// Per node group autoscaling options. Groups may override the defaults from config.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct NodeGroupAutoscalingOptions {
    pub scale_down_utilization_threshold: f64,
    pub scale_down_unneeded_time: f64,
    /// Atomic group: either all nodes of the group exist or none do.
    pub zero_or_max_node_scaling: bool,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum InstanceState {
    Running,
    Creating,
    Deleting,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Instance {
    /// Name of the node backing the instance.
    pub id: String,
    pub state: InstanceState,
}

pub trait NodeGroup: DynClone + Downcast {
    fn id(&self) -> String;
    fn min_size(&self) -> usize;
    fn max_size(&self) -> usize;
    fn target_size(&self) -> AutoscalerResult<usize>;

    /// Requests `delta` more nodes. Target size must stay within max size.
    fn increase_size(&self, delta: usize) -> AutoscalerResult<()>;
    fn delete_nodes(&self, nodes: &[Node]) -> AutoscalerResult<()>;
    fn nodes(&self) -> AutoscalerResult<Vec<Instance>>;

    /// Node info describing a node which would be created in this group.
    /// `NotImplemented` if the provider cannot tell.
    fn template_node_info(&self) -> AutoscalerResult<NodeInfo>;

    /// False for autoprovisioning candidates which were not created yet.
    fn exist(&self) -> bool;
    fn create(&self) -> AutoscalerResult<Box<dyn NodeGroup>>;
    fn delete(&self) -> AutoscalerResult<()>;
    fn autoprovisioned(&self) -> bool;

    fn get_options(
        &self,
        defaults: &NodeGroupAutoscalingOptions,
    ) -> AutoscalerResult<NodeGroupAutoscalingOptions> {
        Ok(defaults.clone())
    }

    fn debug(&self) -> String {
        format!("{} (target size unknown)", self.id())
    }
}

dyn_clone::clone_trait_object!(NodeGroup);
impl_downcast!(NodeGroup);

/// Min and max limits on cluster-wide resources reported by the cloud provider.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ResourceLimiter {
    #[serde(default)]
    pub min_limits: ResourceList,
    #[serde(default)]
    pub max_limits: ResourceList,
}

impl ResourceLimiter {
    pub fn max(&self, resource: &str) -> Option<i64> {
        self.max_limits.get(resource).copied()
    }
}

/// How the GPUs of a node are exposed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GpuConfig {
    pub label: String,
    pub gpu_type: String,
    /// Resource advertised by the device plugin, empty for DRA managed GPUs.
    pub extended_resource_name: String,
    /// Driver publishing the GPUs as resource slices.
    pub dra_driver_name: String,
}

impl GpuConfig {
    pub fn exposed_via_dra(&self) -> bool {
        !self.dra_driver_name.is_empty()
    }
}

pub trait PricingModel {
    /// Price of running `node` between `start` and `end`.
    fn node_price(&self, node: &Node, start: f64, end: f64) -> AutoscalerResult<f64>;
    fn pod_price(&self, pod: &Pod, start: f64, end: f64) -> AutoscalerResult<f64>;
}

pub trait CloudProvider {
    fn name(&self) -> &str;

    fn node_groups(&self) -> Vec<Box<dyn NodeGroup>>;

    /// Node group of the node or `None` if the node is not autoscaled.
    fn node_group_for_node(&self, node: &Node) -> AutoscalerResult<Option<Box<dyn NodeGroup>>>;

    fn has_instance(&self, node: &Node) -> AutoscalerResult<bool>;

    fn pricing(&self) -> AutoscalerResult<Box<dyn PricingModel>> {
        Err(AutoscalerError::NotImplemented)
    }

    fn get_available_machine_types(&self) -> AutoscalerResult<Vec<String>> {
        Err(AutoscalerError::NotImplemented)
    }

    /// Builds a not yet existing node group which autoprovisioning may create.
    fn new_node_group(
        &self,
        machine_type: &str,
        labels: &BTreeMap<String, String>,
        system_labels: &BTreeMap<String, String>,
        taints: &[Taint],
        extra_resources: &ResourceList,
    ) -> AutoscalerResult<Box<dyn NodeGroup>>;

    fn get_resource_limiter(&self) -> AutoscalerResult<ResourceLimiter>;

    /// Label marking nodes with GPUs attached.
    fn gpu_label(&self) -> &str;

    /// GPU setup of the node, `None` if it has no GPUs.
    fn get_node_gpu_config(&self, node: &Node) -> Option<GpuConfig> {
        let gpu_type = node.metadata.labels.get(self.gpu_label())?;
        Some(GpuConfig {
            label: self.gpu_label().to_string(),
            gpu_type: gpu_type.clone(),
            extended_resource_name: RESOURCE_NVIDIA_GPU.to_string(),
            dra_driver_name: String::new(),
        })
    }

    fn refresh(&self) -> AutoscalerResult<()>;

    fn cleanup(&self) -> AutoscalerResult<()>;
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
pub enum ScaleDownResult {
    Error,
    NoUnneeded,
    NoNodeDeleted,
    NodeDeleteStarted,
    NotTried,
    InCooldown,
}

#[derive(Clone, Debug, PartialEq)]
pub enum NodeDeleteResultType {
    Ok,
    Failed(AutoscalerError),
}

#[derive(Clone, Debug, PartialEq)]
pub struct NodeDeleteResult {
    pub node_name: String,
    pub node_group_id: String,
    pub result_type: NodeDeleteResultType,
    pub timestamp: f64,
}

/// State of deletions started by the actuator.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ActuationStatus {
    /// Nodes whose pods are being evicted right now.
    pub currently_drained_nodes: Vec<String>,
    /// Node group id to the number of nodes being deleted.
    pub deletions_in_progress: BTreeMap<String, usize>,
}

/// Deletes nodes chosen by scale-down. The only mutator of the real cluster on that path.
pub trait Actuator {
    /// Starts deletion of `empty` nodes and of `drain` nodes, whose pods get evicted first.
    /// Returns the nodes for which deletion was started.
    fn start_deletion(
        &mut self,
        empty: &[Node],
        drain: &[Node],
        now: f64,
    ) -> AutoscalerResult<(ScaleDownResult, Vec<Node>)>;

    fn check_status(&self) -> ActuationStatus;

    fn clear_results_not_newer_than(&mut self, timestamp: f64);

    /// Results of finished deletions keyed by node name.
    fn deletion_results(&self) -> BTreeMap<String, NodeDeleteResult>;
}

pub trait ListerRegistry {
    fn all_nodes(&self) -> AutoscalerResult<Vec<Node>>;
    fn ready_nodes(&self) -> AutoscalerResult<Vec<Node>>;
    /// Both scheduled and pending pods.
    fn all_pods(&self) -> AutoscalerResult<Vec<Pod>>;
    /// Pods that DaemonSets would start on every matching node.
    fn daemonset_pods(&self) -> AutoscalerResult<Vec<Pod>>;
    fn pod_templates(&self) -> AutoscalerResult<Vec<Pod>>;
    fn csi_nodes(&self) -> AutoscalerResult<Vec<CsiNode>>;
    fn resource_slices(&self) -> AutoscalerResult<Vec<ResourceSlice>>;
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Event {
    /// Object the event is about: a node group, node or pod name.
    pub object: String,
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
}

pub trait EventRecorder {
    fn record(&mut self, event: Event);

    fn event(&mut self, object: &str, event_type: EventType, reason: &str, message: String) {
        self.record(Event {
            object: object.to_string(),
            event_type,
            reason: reason.to_string(),
            message,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum AutoscaleAction {
    ScaleUp { node_group_id: String, delta: usize },
    /// Scale down action with node name as string
    ScaleDown { node_group_id: String, node_name: String },
}
