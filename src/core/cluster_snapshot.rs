//! In-memory cluster snapshot used for scheduling simulations.
//!
//! The snapshot can be forked: every fork saves a copy of the current state which is restored
//! on `revert` or dropped on `commit`. Forks nest. Whoever forks must revert or commit before
//! returning.

use std::collections::BTreeMap;

use crate::core::errors::{AutoscalerError, AutoscalerResult};
use crate::core::node::Node;
use crate::core::node_info::NodeInfo;
use crate::core::pod::Pod;

#[derive(Default, Debug, Clone)]
pub struct ClusterSnapshot {
    node_infos: BTreeMap<String, NodeInfo>,
    forks: Vec<BTreeMap<String, NodeInfo>>,
}

impl ClusterSnapshot {
    pub fn new() -> Self {
        Default::default()
    }

    /// Drops all nodes and any forks.
    pub fn clear(&mut self) {
        self.node_infos.clear();
        self.forks.clear();
    }

    pub fn add_node_info(&mut self, node_info: NodeInfo) -> AutoscalerResult<()> {
        let name = node_info.name().to_string();
        if self.node_infos.contains_key(&name) {
            return Err(AutoscalerError::Internal(format!(
                "node {} already in snapshot",
                name
            )));
        }
        self.node_infos.insert(name, node_info);
        Ok(())
    }

    pub fn add_node(&mut self, node: Node) -> AutoscalerResult<()> {
        self.add_node_info(NodeInfo::new(node))
    }

    pub fn remove_node(&mut self, name: &str) -> AutoscalerResult<NodeInfo> {
        self.node_infos
            .remove(name)
            .ok_or_else(|| AutoscalerError::Internal(format!("node {} not in snapshot", name)))
    }

    /// Places `pod` on `node_name` without running any scheduling predicates.
    pub fn force_add_pod(&mut self, pod: Pod, node_name: &str) -> AutoscalerResult<()> {
        match self.node_infos.get_mut(node_name) {
            Some(node_info) => {
                node_info.add_pod(pod);
                Ok(())
            }
            None => Err(AutoscalerError::Internal(format!(
                "cannot add pod {} to node {}: node not in snapshot",
                pod.metadata.name, node_name
            ))),
        }
    }

    pub fn remove_pod(&mut self, uid: &str, node_name: &str) -> AutoscalerResult<Pod> {
        self.node_infos
            .get_mut(node_name)
            .and_then(|node_info| node_info.remove_pod(uid))
            .ok_or_else(|| {
                AutoscalerError::Internal(format!("pod {} not found on node {}", uid, node_name))
            })
    }

    pub fn get(&self, name: &str) -> Option<&NodeInfo> {
        self.node_infos.get(name)
    }

    /// Node infos ordered by node name.
    pub fn node_infos(&self) -> impl Iterator<Item = &NodeInfo> {
        self.node_infos.values()
    }

    pub fn node_count(&self) -> usize {
        self.node_infos.len()
    }

    pub fn fork(&mut self) {
        self.forks.push(self.node_infos.clone());
    }

    /// Keeps the changes made since the last fork.
    pub fn commit(&mut self) -> AutoscalerResult<()> {
        self.forks
            .pop()
            .map(|_| ())
            .ok_or_else(|| AutoscalerError::Internal("commit on unforked snapshot".to_string()))
    }

    /// Restores the state saved by the last fork.
    pub fn revert(&mut self) -> AutoscalerResult<()> {
        match self.forks.pop() {
            Some(saved) => {
                self.node_infos = saved;
                Ok(())
            }
            None => Err(AutoscalerError::Internal(
                "revert on unforked snapshot".to_string(),
            )),
        }
    }

    pub fn is_forked(&self) -> bool {
        !self.forks.is_empty()
    }
}
