//! Type definitions for the Node primitive as seen by the autoscaler.

use serde::{Deserialize, Serialize};

use crate::core::common::{ObjectMeta, ResourceList, Taint, RESOURCE_CPU, RESOURCE_MEMORY};

/// Marks a node which is expected but has not registered yet.
pub const NODE_UPCOMING_ANNOTATION: &str = "cluster-autoscaler.kubernetes.io/node-upcoming";
/// Opts a node out of scale-down.
pub const SCALE_DOWN_DISABLED_ANNOTATION: &str =
    "cluster-autoscaler.kubernetes.io/scale-down-disabled";
/// Reason put on the overridden Ready condition of nodes whose custom resources are not
/// advertised yet.
pub const RESOURCE_UNREADY_REASON: &str = "ResourceUnready";

#[derive(Default, Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NodeSpec {
    #[serde(default)]
    pub taints: Vec<Taint>,
    #[serde(default)]
    pub unschedulable: bool,
    #[serde(default)]
    pub provider_id: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum NodeConditionType {
    Ready,
    // taken from https://kubernetes.io/docs/reference/node/node-status/#condition
    DiskPressure,
    MemoryPressure,
    PIDPressure,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NodeCondition {
    pub condition_type: NodeConditionType,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    // Last event time the condition transit from one status to another.
    #[serde(default)]
    pub last_transition_time: f64,
}

#[derive(Default, Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NodeStatus {
    // Total amount of resources.
    #[serde(default)]
    pub capacity: ResourceList,
    // Resources available for pods, defaults to capacity when omitted in templates.
    #[serde(default)]
    pub allocatable: ResourceList,
    #[serde(default)]
    pub conditions: Vec<NodeCondition>,
}

#[derive(Default, Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Node {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: NodeSpec,
    #[serde(default)]
    pub status: NodeStatus,
}

impl Node {
    /// Ready node with `cpu` millicores and `ram` bytes of capacity and allocatable.
    pub fn new(name: &str, cpu: i64, ram: i64) -> Self {
        let resources = ResourceList::from([
            (RESOURCE_CPU.to_string(), cpu),
            (RESOURCE_MEMORY.to_string(), ram),
        ]);
        let mut node = Self {
            metadata: ObjectMeta::new(name),
            spec: Default::default(),
            status: NodeStatus {
                capacity: resources.clone(),
                allocatable: resources,
                conditions: Default::default(),
            },
        };
        node.update_condition(NodeConditionType::Ready, ConditionStatus::True, "", 0.0);
        node
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn update_condition(
        &mut self,
        condition_type: NodeConditionType,
        status: ConditionStatus,
        reason: &str,
        last_transition_time: f64,
    ) {
        let conditions = &mut self.status.conditions;
        match conditions
            .iter_mut()
            .find(|elem| elem.condition_type == condition_type)
        {
            Some(condition) => {
                condition.status = status;
                condition.reason = reason.to_string();
                condition.last_transition_time = last_transition_time;
            }
            None => {
                conditions.push(NodeCondition {
                    condition_type,
                    status,
                    reason: reason.to_string(),
                    last_transition_time,
                });
            }
        }
    }

    // Ref to condition if it exists else None.
    pub fn get_condition(&self, condition_type: NodeConditionType) -> Option<&NodeCondition> {
        self.status
            .conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    pub fn is_ready(&self) -> bool {
        self.get_condition(NodeConditionType::Ready)
            .map(|c| c.status == ConditionStatus::True)
            .unwrap_or(false)
    }

    pub fn is_upcoming(&self) -> bool {
        self.metadata.has_annotation(NODE_UPCOMING_ANNOTATION, "true")
    }

    pub fn is_scale_down_disabled(&self) -> bool {
        self.metadata
            .has_annotation(SCALE_DOWN_DISABLED_ANNOTATION, "true")
    }

    /// Returns a copy whose Ready condition is forced to False with `ResourceUnready` reason.
    /// The transition time of the original condition is kept.
    pub fn with_unready_resources(&self) -> Node {
        let mut copy = self.clone();
        let last_transition_time = self
            .get_condition(NodeConditionType::Ready)
            .map(|c| c.last_transition_time)
            .unwrap_or(self.metadata.creation_timestamp);
        copy.update_condition(
            NodeConditionType::Ready,
            ConditionStatus::False,
            RESOURCE_UNREADY_REASON,
            last_transition_time,
        );
        copy
    }
}
