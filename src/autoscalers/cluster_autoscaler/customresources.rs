//! Readiness processors for nodes whose custom resources (GPUs, CSI drivers, DRA slices) are
//! published some time after the node itself becomes Ready.
//!
//! A node judged logically unready is dropped from the ready list and replaced in the list of
//! all nodes by a copy with the Ready condition forced to False. Stored nodes are never touched.

pub mod composite;
pub mod csi;
pub mod dra;
pub mod gpu;

use std::collections::BTreeSet;

use serde::Serialize;

use crate::autoscalers::cluster_autoscaler::context::AutoscalingContext;
use crate::autoscalers::cluster_autoscaler::interface::NodeGroup;
use crate::core::errors::{AutoscalerError, AutoscalerResult};
use crate::core::node::Node;
use crate::core::node_info::NodeInfo;

/// Amount of a custom resource a node is meant to provide, possibly before it advertises it.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct CustomResourceTarget {
    pub resource_type: String,
    pub resource_count: i64,
}

pub trait CustomResourcesProcessor {
    /// Returns revised `(all_nodes, ready_nodes)`.
    fn filter_unready_nodes_with_custom_resources(
        &self,
        ctx: &AutoscalingContext,
        all_nodes: Vec<Node>,
        ready_nodes: Vec<Node>,
    ) -> AutoscalerResult<(Vec<Node>, Vec<Node>)>;

    fn get_node_resource_targets(
        &self,
        ctx: &AutoscalingContext,
        node: &Node,
        node_group: Option<&dyn NodeGroup>,
    ) -> AutoscalerResult<Vec<CustomResourceTarget>>;

    fn clean_up(&mut self) {}
}

/// Removes `unready` names from the ready list and swaps their entries in the all list for
/// overridden copies.
pub fn override_unready(
    all_nodes: Vec<Node>,
    ready_nodes: Vec<Node>,
    unready: &BTreeSet<String>,
) -> (Vec<Node>, Vec<Node>) {
    if unready.is_empty() {
        return (all_nodes, ready_nodes);
    }
    let new_ready = ready_nodes
        .into_iter()
        .filter(|node| !unready.contains(node.name()))
        .collect();
    let new_all = all_nodes
        .into_iter()
        .map(|node| {
            if unready.contains(node.name()) {
                node.with_unready_resources()
            } else {
                node
            }
        })
        .collect();
    (new_all, new_ready)
}

/// Template of the node's group, `None` when the node is not autoscaled or the provider cannot
/// build templates.
pub fn node_group_template(
    ctx: &AutoscalingContext,
    node: &Node,
) -> AutoscalerResult<Option<NodeInfo>> {
    let node_group = match ctx.cloud_provider.node_group_for_node(node)? {
        Some(node_group) => node_group,
        None => return Ok(None),
    };
    match node_group.template_node_info() {
        Ok(template) => Ok(Some(template)),
        Err(AutoscalerError::NotImplemented) => Ok(None),
        Err(err) => Err(err.prefixed(&format!(
            "cannot get template of node group {}: ",
            node_group.id()
        ))),
    }
}
