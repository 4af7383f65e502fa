use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::core::common::{ResourceList, Taint};

/// Signature of a descriptor with nothing set.
pub const EMPTY_SIGNATURE: &str = "_";

/// Shape of the node group a set of pods needs.
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct NodeGroupDescriptor {
    pub labels: BTreeMap<String, String>,
    pub system_labels: BTreeMap<String, String>,
    pub taints: BTreeSet<Taint>,
    pub extra_resources: ResourceList,
    pub provisioning_class_name: String,
}

impl NodeGroupDescriptor {
    pub fn is_empty(&self) -> bool {
        self == &NodeGroupDescriptor::default()
    }

    /// Canonical serialization. Every collection is ordered, so equal descriptors always give
    /// byte-equal signatures.
    pub fn signature(&self) -> String {
        if self.is_empty() {
            return EMPTY_SIGNATURE.to_string();
        }
        // Serialization of ordered maps and plain structs cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| EMPTY_SIGNATURE.to_string())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PodShard {
    pub descriptor: NodeGroupDescriptor,
    pub pod_uids: BTreeSet<String>,
}

impl PodShard {
    pub fn signature(&self) -> String {
        self.descriptor.signature()
    }
}

#[cfg(test)]
mod tests {
    use crate::autoscalers::cluster_autoscaler::podsharding::descriptor::NodeGroupDescriptor;
    use crate::core::common::{Taint, TaintEffect};

    #[test]
    fn test_signature_is_order_independent() {
        assert_eq!("_", NodeGroupDescriptor::default().signature());

        let mut first = NodeGroupDescriptor::default();
        first.labels.insert("zone".to_string(), "a".to_string());
        first.labels.insert("arch".to_string(), "arm".to_string());
        first.taints.insert(Taint {
            key: "b".to_string(),
            value: "".to_string(),
            effect: TaintEffect::NoSchedule,
        });
        first.taints.insert(Taint {
            key: "a".to_string(),
            value: "".to_string(),
            effect: TaintEffect::NoSchedule,
        });

        let mut second = NodeGroupDescriptor::default();
        second.taints.insert(Taint {
            key: "a".to_string(),
            value: "".to_string(),
            effect: TaintEffect::NoSchedule,
        });
        second.taints.insert(Taint {
            key: "b".to_string(),
            value: "".to_string(),
            effect: TaintEffect::NoSchedule,
        });
        second.labels.insert("arch".to_string(), "arm".to_string());
        second.labels.insert("zone".to_string(), "a".to_string());

        assert_eq!(first.signature(), second.signature());
        assert!(first.signature().starts_with("{\"labels\":{\"arch\":\"arm\",\"zone\":\"a\"}"));
    }
}
