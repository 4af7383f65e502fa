//! Actuator deleting nodes synchronously through their node group. Drained nodes lose their
//! pods together with the node, recreatable ones return to pending.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use log::{info, warn};

use crate::autoscalers::cluster_autoscaler::in_memory::cloud_provider::InMemoryCloudProvider;
use crate::autoscalers::cluster_autoscaler::in_memory::cluster::InMemoryCluster;
use crate::autoscalers::cluster_autoscaler::interface::{
    ActuationStatus, Actuator, CloudProvider, NodeDeleteResult, NodeDeleteResultType,
    ScaleDownResult,
};
use crate::core::errors::{AutoscalerError, AutoscalerResult};
use crate::core::node::Node;

pub struct InMemoryActuator {
    cluster: Rc<RefCell<InMemoryCluster>>,
    results: BTreeMap<String, NodeDeleteResult>,
}

impl InMemoryActuator {
    pub fn new(cluster: Rc<RefCell<InMemoryCluster>>) -> Self {
        Self {
            cluster,
            results: Default::default(),
        }
    }

    fn delete_node(&self, provider: &InMemoryCloudProvider, node: &Node) -> NodeDeleteResult {
        let mut node_group_id = String::new();
        let outcome = provider.node_group_for_node(node).and_then(|group| {
            let group = group.ok_or_else(|| {
                AutoscalerError::CloudProvider(format!("node {} has no node group", node.name()))
            })?;
            node_group_id = group.id();
            group.delete_nodes(std::slice::from_ref(node))
        });
        let result_type = match outcome {
            Ok(()) => {
                info!("Node {} of group {} deleted", node.name(), node_group_id);
                NodeDeleteResultType::Ok
            }
            Err(err) => {
                warn!("Failed to delete node {}: {}", node.name(), err);
                NodeDeleteResultType::Failed(err)
            }
        };
        NodeDeleteResult {
            node_name: node.name().to_string(),
            node_group_id,
            result_type,
            timestamp: 0.0,
        }
    }
}

impl Actuator for InMemoryActuator {
    fn start_deletion(
        &mut self,
        empty: &[Node],
        drain: &[Node],
        now: f64,
    ) -> AutoscalerResult<(ScaleDownResult, Vec<Node>)> {
        if empty.is_empty() && drain.is_empty() {
            return Ok((ScaleDownResult::NoNodeDeleted, vec![]));
        }
        let provider = InMemoryCloudProvider::new(self.cluster.clone());
        let mut started = Vec::with_capacity(empty.len() + drain.len());
        for node in empty.iter().chain(drain.iter()) {
            let mut result = self.delete_node(&provider, node);
            result.timestamp = now;
            self.results.insert(result.node_name.clone(), result);
            started.push(node.clone());
        }
        Ok((ScaleDownResult::NodeDeleteStarted, started))
    }

    fn check_status(&self) -> ActuationStatus {
        ActuationStatus {
            currently_drained_nodes: self.cluster.borrow().currently_drained.clone(),
            deletions_in_progress: Default::default(),
        }
    }

    fn clear_results_not_newer_than(&mut self, timestamp: f64) {
        self.results.retain(|_, result| result.timestamp > timestamp);
    }

    fn deletion_results(&self) -> BTreeMap<String, NodeDeleteResult> {
        self.results.clone()
    }
}
