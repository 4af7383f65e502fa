//! Type definitions shared by nodes, pods and templates: object metadata, resource lists,
//! taints and tolerations.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Cpu in millicores.
pub const RESOURCE_CPU: &str = "cpu";
/// Memory in bytes.
pub const RESOURCE_MEMORY: &str = "memory";
pub const RESOURCE_PODS: &str = "pods";
pub const RESOURCE_NVIDIA_GPU: &str = "nvidia.com/gpu";
pub const RESOURCE_DIRECTX: &str = "gpu.intel.com/xe";

/// Resource name to quantity. Ordered to keep every derived serialization stable.
pub type ResourceList = BTreeMap<String, i64>;

#[derive(Default, Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
    pub uid: String,
    #[serde(default)]
    pub controller: bool,
}

#[derive(Default, Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub creation_timestamp: f64,
    /// Set once the object is marked for deletion.
    #[serde(default)]
    pub deletion_timestamp: Option<f64>,
    #[serde(default)]
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectMeta {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            uid: name.to_string(),
            ..Default::default()
        }
    }

    /// Owner reference flagged as the managing controller, if any.
    pub fn controller_ref(&self) -> Option<&OwnerReference> {
        self.owner_references.iter().find(|owner| owner.controller)
    }

    pub fn has_annotation(&self, key: &str, value: &str) -> bool {
        self.annotations.get(key).map(|v| v == value).unwrap_or(false)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaintEffect {
    NoSchedule,
    PreferNoSchedule,
    NoExecute,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Taint {
    pub key: String,
    #[serde(default)]
    pub value: String,
    pub effect: TaintEffect,
}

#[derive(Default, Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum TolerationOperator {
    #[default]
    Equal,
    Exists,
}

#[derive(Default, Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Toleration {
    /// Empty key together with `Exists` operator tolerates everything.
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub operator: TolerationOperator,
    #[serde(default)]
    pub value: String,
    /// None matches all effects.
    #[serde(default)]
    pub effect: Option<TaintEffect>,
}

impl Toleration {
    pub fn tolerates_everything(&self) -> bool {
        self.key.is_empty() && self.operator == TolerationOperator::Exists && self.effect.is_none()
    }

    pub fn tolerates(&self, taint: &Taint) -> bool {
        if let Some(effect) = self.effect {
            if effect != taint.effect {
                return false;
            }
        }
        if self.key.is_empty() {
            return self.operator == TolerationOperator::Exists;
        }
        if self.key != taint.key {
            return false;
        }
        match self.operator {
            TolerationOperator::Exists => true,
            TolerationOperator::Equal => self.value == taint.value,
        }
    }
}

/// Adds every quantity of `other` into `target`.
pub fn add_resources(target: &mut ResourceList, other: &ResourceList) {
    for (name, quantity) in other.iter() {
        *target.entry(name.clone()).or_insert(0) += quantity;
    }
}

pub fn resource_quantity(resources: &ResourceList, name: &str) -> i64 {
    resources.get(name).copied().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::{Taint, TaintEffect, Toleration, TolerationOperator};

    fn taint(key: &str, value: &str, effect: TaintEffect) -> Taint {
        Taint {
            key: key.to_string(),
            value: value.to_string(),
            effect,
        }
    }

    #[test]
    fn test_toleration_matching() {
        let gpu_taint = taint("nvidia.com/gpu", "present", TaintEffect::NoSchedule);

        let exact = Toleration {
            key: "nvidia.com/gpu".to_string(),
            operator: TolerationOperator::Equal,
            value: "present".to_string(),
            effect: Some(TaintEffect::NoSchedule),
        };
        assert!(exact.tolerates(&gpu_taint));

        let wrong_value = Toleration {
            value: "absent".to_string(),
            ..exact.clone()
        };
        assert!(!wrong_value.tolerates(&gpu_taint));

        let exists_any_effect = Toleration {
            key: "nvidia.com/gpu".to_string(),
            operator: TolerationOperator::Exists,
            value: Default::default(),
            effect: None,
        };
        assert!(exists_any_effect.tolerates(&gpu_taint));

        let wrong_effect = Toleration {
            effect: Some(TaintEffect::NoExecute),
            ..exact
        };
        assert!(!wrong_effect.tolerates(&gpu_taint));

        let wildcard = Toleration {
            operator: TolerationOperator::Exists,
            ..Default::default()
        };
        assert!(wildcard.tolerates(&gpu_taint));
    }
}
