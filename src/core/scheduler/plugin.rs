//! Filter plugins consulted by the predicate scheduler oracle.

use std::collections::HashMap;

use lazy_static::lazy_static;

use crate::core::common::{resource_quantity, TaintEffect, RESOURCE_PODS};
use crate::core::node_info::NodeInfo;
use crate::core::pod::Pod;

pub const NODE_RESOURCES_FIT: &str = "NodeResourcesFit";
pub const TAINT_TOLERATION: &str = "TaintToleration";
pub const NODE_AFFINITY: &str = "NodeAffinity";
pub const NODE_UNSCHEDULABLE: &str = "NodeUnschedulable";

pub const UNSCHEDULABLE_TAINT_KEY: &str = "node.kubernetes.io/unschedulable";

lazy_static! {
    pub static ref PLUGIN_REGISTRY: HashMap<&'static str, Box<dyn FilterPlugin>> = {
        let plugins: Vec<Box<dyn FilterPlugin>> = vec![
            Box::new(NodeResourcesFit {}),
            Box::new(TaintToleration {}),
            Box::new(NodeAffinity {}),
            Box::new(NodeUnschedulable {}),
        ];
        plugins.into_iter().map(|p| (p.name(), p)).collect()
    };
}

pub trait FilterPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    /// Ok if `pod` may run on the node, otherwise the reason why not.
    fn filter(&self, pod: &Pod, node_info: &NodeInfo) -> Result<(), String>;
}

// NodeResourcesFit is a plugin that checks if a node has sufficient resources.
pub struct NodeResourcesFit {}
impl FilterPlugin for NodeResourcesFit {
    fn name(&self) -> &'static str {
        NODE_RESOURCES_FIT
    }

    fn filter(&self, pod: &Pod, node_info: &NodeInfo) -> Result<(), String> {
        let free = node_info.free();
        for (name, quantity) in pod.requests().iter() {
            if *quantity <= 0 {
                continue;
            }
            if resource_quantity(&free, name) < *quantity {
                return Err(format!("insufficient {}", name));
            }
        }
        let allocatable = &node_info.node.status.allocatable;
        if let Some(max_pods) = allocatable.get(RESOURCE_PODS) {
            if node_info.pods.len() as i64 >= *max_pods {
                return Err("too many pods".to_string());
            }
        }
        Ok(())
    }
}

// Every NoSchedule and NoExecute taint of the node must be tolerated.
pub struct TaintToleration {}
impl FilterPlugin for TaintToleration {
    fn name(&self) -> &'static str {
        TAINT_TOLERATION
    }

    fn filter(&self, pod: &Pod, node_info: &NodeInfo) -> Result<(), String> {
        for taint in node_info.node.spec.taints.iter() {
            if taint.effect == TaintEffect::PreferNoSchedule {
                continue;
            }
            if !pod.spec.tolerations.iter().any(|t| t.tolerates(taint)) {
                return Err(format!("untolerated taint {}={}", taint.key, taint.value));
            }
        }
        Ok(())
    }
}

// Node labels must contain the pod's node selector.
pub struct NodeAffinity {}
impl FilterPlugin for NodeAffinity {
    fn name(&self) -> &'static str {
        NODE_AFFINITY
    }

    fn filter(&self, pod: &Pod, node_info: &NodeInfo) -> Result<(), String> {
        let labels = &node_info.node.metadata.labels;
        for (key, value) in pod.spec.node_selector.iter() {
            if labels.get(key) != Some(value) {
                return Err(format!("node selector {}={} mismatch", key, value));
            }
        }
        Ok(())
    }
}

pub struct NodeUnschedulable {}
impl FilterPlugin for NodeUnschedulable {
    fn name(&self) -> &'static str {
        NODE_UNSCHEDULABLE
    }

    fn filter(&self, pod: &Pod, node_info: &NodeInfo) -> Result<(), String> {
        if !node_info.node.spec.unschedulable {
            return Ok(());
        }
        let tolerated = pod
            .spec
            .tolerations
            .iter()
            .any(|t| t.key == UNSCHEDULABLE_TAINT_KEY || t.tolerates_everything());
        if tolerated {
            Ok(())
        } else {
            Err("node is unschedulable".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::core::common::{Taint, TaintEffect, Toleration, TolerationOperator};
    use crate::core::node::Node;
    use crate::core::node_info::NodeInfo;
    use crate::core::pod::Pod;
    use crate::core::scheduler::plugin::{
        NODE_AFFINITY, NODE_RESOURCES_FIT, PLUGIN_REGISTRY, TAINT_TOLERATION,
    };

    #[test]
    fn test_resources_fit() {
        let mut info = NodeInfo::new(Node::new("n", 2000, 2000));
        info.add_pod(Pod::new("existing", 1500, 100));
        let fit = PLUGIN_REGISTRY.get(NODE_RESOURCES_FIT).unwrap();
        assert!(fit.filter(&Pod::new("small", 500, 100), &info).is_ok());
        assert!(fit.filter(&Pod::new("big", 501, 100), &info).is_err());
    }

    #[test]
    fn test_taints_and_selector() {
        let mut node = Node::new("n", 2000, 2000);
        node.metadata
            .labels
            .insert("pool".to_string(), "gpu".to_string());
        node.spec.taints.push(Taint {
            key: "dedicated".to_string(),
            value: "gpu".to_string(),
            effect: TaintEffect::NoSchedule,
        });
        let info = NodeInfo::new(node);

        let mut pod = Pod::new("p", 1, 1);
        let taints = PLUGIN_REGISTRY.get(TAINT_TOLERATION).unwrap();
        let affinity = PLUGIN_REGISTRY.get(NODE_AFFINITY).unwrap();
        assert!(taints.filter(&pod, &info).is_err());

        pod.spec.tolerations.push(Toleration {
            key: "dedicated".to_string(),
            operator: TolerationOperator::Exists,
            value: Default::default(),
            effect: None,
        });
        assert!(taints.filter(&pod, &info).is_ok());

        pod.spec
            .node_selector
            .insert("pool".to_string(), "cpu".to_string());
        assert!(affinity.filter(&pod, &info).is_err());
        pod.spec
            .node_selector
            .insert("pool".to_string(), "gpu".to_string());
        assert!(affinity.filter(&pod, &info).is_ok());
    }
}
