//! Template node infos: what a freshly created node of every node group would look like,
//! including the DaemonSet pods which would start on it.

use std::collections::BTreeMap;

use log::{debug, warn};

use crate::autoscalers::cluster_autoscaler::context::AutoscalingContext;
use crate::autoscalers::cluster_autoscaler::interface::NodeGroup;
use crate::core::errors::{AutoscalerError, AutoscalerResult};
use crate::core::node::{Node, NODE_UPCOMING_ANNOTATION};
use crate::core::node_info::NodeInfo;
use crate::core::pod::{Pod, DAEMONSET_POD_ANNOTATION};
use crate::core::scheduler::plugin::{
    NODE_AFFINITY, PLUGIN_REGISTRY, TAINT_TOLERATION, UNSCHEDULABLE_TAINT_KEY,
};

pub const TEMPLATE_NODE_PREFIX: &str = "template-node-for-";

#[derive(Default)]
pub struct TemplateNodeInfoProvider {
    // Last template built for every group, used once a templateless group loses its ready nodes.
    cache: BTreeMap<String, NodeInfo>,
}

impl TemplateNodeInfoProvider {
    pub fn new() -> Self {
        Default::default()
    }

    /// Templates keyed by node group id. Groups without any way to build a template are skipped.
    pub fn process(
        &mut self,
        ctx: &AutoscalingContext,
        ready_nodes: &[Node],
    ) -> AutoscalerResult<BTreeMap<String, NodeInfo>> {
        let daemonsets = daemonset_pods(ctx)?;
        let mut templates = BTreeMap::new();

        for node_group in ctx.cloud_provider.node_groups().iter() {
            let id = node_group.id();
            match template_node_info(ctx, node_group.as_ref(), ready_nodes, &daemonsets)? {
                Some(template) => {
                    self.cache.insert(id.clone(), template.clone());
                    templates.insert(id, template);
                }
                None => match self.cache.get(&id) {
                    Some(cached) => {
                        debug!("Using cached template for node group {}", id);
                        templates.insert(id, cached.clone());
                    }
                    None => warn!("Unable to build template for node group {}", id),
                },
            }
        }

        self.cache.retain(|id, _| templates.contains_key(id));
        Ok(templates)
    }

    pub fn clean_up(&mut self) {
        self.cache.clear();
    }
}

/// DaemonSet pods from the lister plus pod templates marked as synthetic DaemonSets.
pub fn daemonset_pods(ctx: &AutoscalingContext) -> AutoscalerResult<Vec<Pod>> {
    let mut pods = ctx.listers.daemonset_pods()?;
    pods.extend(
        ctx.listers
            .pod_templates()?
            .into_iter()
            .filter(|pod| pod.metadata.has_annotation(DAEMONSET_POD_ANNOTATION, "true")),
    );
    Ok(pods)
}

/// Template of one group. Falls back to a sanitized ready node of the group when the provider
/// does not build templates, `None` if there is no such node either.
pub fn template_node_info(
    ctx: &AutoscalingContext,
    node_group: &dyn NodeGroup,
    ready_nodes: &[Node],
    daemonsets: &[Pod],
) -> AutoscalerResult<Option<NodeInfo>> {
    let id = node_group.id();
    let base = match node_group.template_node_info() {
        Ok(template) => template,
        Err(AutoscalerError::NotImplemented) => {
            match example_node_info(ctx, &id, ready_nodes)? {
                Some(node_info) => sanitize_node_info(&node_info, &id),
                None => return Ok(None),
            }
        }
        Err(err) => {
            return Err(err.prefixed(&format!("cannot get template of node group {}: ", id)))
        }
    };
    Ok(Some(add_daemonset_pods(base, daemonsets)))
}

fn example_node_info(
    ctx: &AutoscalingContext,
    group_id: &str,
    ready_nodes: &[Node],
) -> AutoscalerResult<Option<NodeInfo>> {
    for node in ready_nodes.iter() {
        let in_group = ctx
            .cloud_provider
            .node_group_for_node(node)?
            .map_or(false, |node_group| node_group.id() == group_id);
        if !in_group {
            continue;
        }
        // The snapshot knows the node's pods, a bare node is fine too.
        let node_info = match ctx.snapshot.get(node.name()) {
            Some(node_info) => node_info.clone(),
            None => NodeInfo::new(node.clone()),
        };
        return Ok(Some(node_info));
    }
    Ok(None)
}

/// Copy of a real node info usable as a template: renamed, schedulable, with only the pods
/// which would start on any new node.
pub fn sanitize_node_info(node_info: &NodeInfo, group_id: &str) -> NodeInfo {
    let name = format!("{}{}", TEMPLATE_NODE_PREFIX, group_id);

    let mut node = node_info.node.clone();
    node.metadata.name = name.clone();
    node.metadata.uid = name.clone();
    node.metadata.annotations.remove(NODE_UPCOMING_ANNOTATION);
    node.spec.unschedulable = false;
    node.spec.taints.retain(|taint| taint.key != UNSCHEDULABLE_TAINT_KEY);

    let mut sanitized = NodeInfo::new(node);
    for pod in node_info
        .pods
        .iter()
        .filter(|pod| pod.is_daemonset_pod() || pod.is_mirror_pod())
    {
        sanitized.add_pod(pod_for_node(pod, &name));
    }
    sanitized.resource_slices = node_info
        .resource_slices
        .iter()
        .cloned()
        .map(|mut slice| {
            slice.node_name = name.clone();
            slice
        })
        .collect();
    sanitized.csi_node = node_info.csi_node.clone().map(|mut csi_node| {
        csi_node.name = name.clone();
        csi_node
    });
    sanitized
}

fn add_daemonset_pods(mut template: NodeInfo, daemonsets: &[Pod]) -> NodeInfo {
    let node_name = template.name().to_string();
    for daemonset in daemonsets.iter() {
        let already_running = template
            .pods
            .iter()
            .any(|pod| pod.controller_uid() == daemonset.controller_uid());
        if already_running {
            continue;
        }
        let schedulable = [TAINT_TOLERATION, NODE_AFFINITY].iter().all(|name| {
            PLUGIN_REGISTRY
                .get(name)
                .map_or(true, |plugin| plugin.filter(daemonset, &template).is_ok())
        });
        if schedulable {
            template.add_pod(pod_for_node(daemonset, &node_name));
        }
    }
    template
}

fn pod_for_node(pod: &Pod, node_name: &str) -> Pod {
    let mut copy = pod.clone();
    copy.metadata.name = format!("{}-{}", pod.metadata.name, node_name);
    copy.metadata.uid = format!("{}-{}", pod.metadata.uid, node_name);
    copy
}

#[cfg(test)]
mod tests {
    use crate::autoscalers::cluster_autoscaler::nodeinfos::{
        TemplateNodeInfoProvider, TEMPLATE_NODE_PREFIX,
    };
    use crate::core::common::{Taint, TaintEffect};
    use crate::core::pod::DAEMONSET_POD_ANNOTATION;
    use crate::test_util::helpers::{daemonset_pod, node_in_group, TestAutoscalerBuilder};

    #[test]
    fn test_template_gets_tolerating_daemonsets() {
        let mut picky = daemonset_pod("picky", 100, 100);
        picky
            .spec
            .node_selector
            .insert("disk".to_string(), "ssd".to_string());
        let mut synthetic = daemonset_pod("synthetic", 100, 100);
        synthetic.metadata.owner_references.clear();
        synthetic
            .metadata
            .annotations
            .insert(DAEMONSET_POD_ANNOTATION.to_string(), "true".to_string());

        let env = TestAutoscalerBuilder::new()
            .with_node_group("ng", 0, 3, 4000, 8000)
            .with_daemonset_pod(daemonset_pod("logs", 100, 100))
            .with_daemonset_pod(picky)
            .with_pod_template(synthetic)
            .build();
        let ctx = env.autoscaler.context();

        let templates = TemplateNodeInfoProvider::new().process(ctx, &[]).unwrap();
        let pod_names: Vec<&str> = templates["ng"]
            .pods
            .iter()
            .map(|pod| pod.metadata.name.as_str())
            .collect();
        assert_eq!(
            vec!["logs-template-node-for-ng", "synthetic-template-node-for-ng"],
            pod_names
        );
    }

    #[test]
    fn test_templateless_group_uses_sanitized_ready_node() {
        let mut node = node_in_group("real-1", "bare", 2000, 4000);
        node.spec.unschedulable = true;
        node.spec.taints.push(Taint {
            key: "dedicated".to_string(),
            value: "batch".to_string(),
            effect: TaintEffect::NoSchedule,
        });
        let env = TestAutoscalerBuilder::new()
            .with_templateless_node_group("bare", 0, 3)
            .with_node(node.clone())
            .build();
        let ctx = env.autoscaler.context();
        let mut provider = TemplateNodeInfoProvider::new();

        let templates = provider.process(ctx, &[node]).unwrap();
        let template = &templates["bare"];
        assert_eq!(format!("{}bare", TEMPLATE_NODE_PREFIX), template.name());
        assert!(!template.node.spec.unschedulable);
        assert_eq!(1, template.node.spec.taints.len());

        // Without ready nodes the last template is reused.
        let templates = provider.process(ctx, &[]).unwrap();
        assert!(templates.contains_key("bare"));
    }
}
