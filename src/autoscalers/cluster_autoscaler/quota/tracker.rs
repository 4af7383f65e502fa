//! Tracks remaining headroom of every quota within one iteration.
//!
//! `check_delta` tells how many copies of a node fit; `apply_delta` consumes headroom only when
//! all requested copies fit, partial applies never happen.

use std::collections::HashMap;

use serde::Serialize;

use crate::autoscalers::cluster_autoscaler::context::AutoscalingContext;
use crate::autoscalers::cluster_autoscaler::customresources::CustomResourcesProcessor;
use crate::autoscalers::cluster_autoscaler::interface::NodeGroup;
use crate::autoscalers::cluster_autoscaler::quota::quotas::{Quota, RESOURCE_NODES};
use crate::core::common::{resource_quantity, ResourceList, RESOURCE_CPU, RESOURCE_MEMORY};
use crate::core::errors::{AutoscalerError, AutoscalerResult};
use crate::core::node::Node;

pub trait NodeDeltaSource {
    fn node_group_for_node(&self, node: &Node) -> AutoscalerResult<Option<Box<dyn NodeGroup>>>;

    /// Resources one node contributes to quotas.
    fn node_delta(
        &self,
        node: &Node,
        node_group: Option<&dyn NodeGroup>,
    ) -> AutoscalerResult<ResourceList>;
}

/// Cpu cores rounded up, memory bytes and one node.
pub fn node_resources_delta(node: &Node) -> ResourceList {
    let cpu_millis = resource_quantity(&node.status.capacity, RESOURCE_CPU);
    ResourceList::from([
        (RESOURCE_CPU.to_string(), (cpu_millis + 999) / 1000),
        (
            RESOURCE_MEMORY.to_string(),
            resource_quantity(&node.status.capacity, RESOURCE_MEMORY),
        ),
        (RESOURCE_NODES.to_string(), 1),
    ])
}

/// Node resources plus the custom resource targets reported by readiness processors.
pub struct CustomResourcesDeltaSource<'a> {
    pub ctx: &'a AutoscalingContext,
    pub processor: &'a dyn CustomResourcesProcessor,
}

impl<'a> NodeDeltaSource for CustomResourcesDeltaSource<'a> {
    fn node_group_for_node(&self, node: &Node) -> AutoscalerResult<Option<Box<dyn NodeGroup>>> {
        self.ctx.cloud_provider.node_group_for_node(node)
    }

    fn node_delta(
        &self,
        node: &Node,
        node_group: Option<&dyn NodeGroup>,
    ) -> AutoscalerResult<ResourceList> {
        let mut delta = node_resources_delta(node);
        let targets = self
            .processor
            .get_node_resource_targets(self.ctx, node, node_group)
            .map_err(|err| match err {
                AutoscalerError::Internal(_) => err,
                other => AutoscalerError::Internal(format!(
                    "failed to get custom resources of node {}: {}",
                    node.name(),
                    other
                )),
            })?;
        for target in targets.into_iter() {
            *delta.entry(target.resource_type).or_insert(0) += target.resource_count;
        }
        Ok(delta)
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ExceededQuota {
    pub id: String,
    pub exceeded_resources: Vec<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct CheckDeltaResult {
    pub allowed_delta: usize,
    pub exceeded_quotas: Vec<ExceededQuota>,
}

impl CheckDeltaResult {
    pub fn exceeded(&self) -> bool {
        !self.exceeded_quotas.is_empty()
    }
}

struct QuotaStatus {
    quota: Box<dyn Quota>,
    remaining: ResourceList,
}

pub struct QuotaTracker {
    statuses: Vec<QuotaStatus>,
    // Node group id to the delta of one of its nodes.
    delta_cache: HashMap<String, ResourceList>,
}

impl QuotaTracker {
    /// Initial usage of every quota is summed over the `nodes` it applies to.
    pub fn new(
        quotas: Vec<Box<dyn Quota>>,
        nodes: &[Node],
        source: &dyn NodeDeltaSource,
    ) -> AutoscalerResult<Self> {
        let mut tracker = Self {
            statuses: vec![],
            delta_cache: Default::default(),
        };

        let mut used: Vec<ResourceList> = vec![ResourceList::new(); quotas.len()];
        for node in nodes.iter() {
            let node_group = source.node_group_for_node(node)?;
            let delta = tracker.delta(source, node, node_group.as_deref())?;
            for (idx, quota) in quotas.iter().enumerate() {
                if !quota.applies_to(node) {
                    continue;
                }
                for resource in quota.limits().keys() {
                    *used[idx].entry(resource.clone()).or_insert(0) +=
                        resource_quantity(&delta, resource);
                }
            }
        }

        for (quota, used) in quotas.into_iter().zip(used.into_iter()) {
            let remaining = quota
                .limits()
                .iter()
                .map(|(resource, limit)| {
                    let left = limit - resource_quantity(&used, resource);
                    (resource.clone(), i64::max(0, left))
                })
                .collect();
            tracker.statuses.push(QuotaStatus { quota, remaining });
        }
        Ok(tracker)
    }

    fn delta(
        &mut self,
        source: &dyn NodeDeltaSource,
        node: &Node,
        node_group: Option<&dyn NodeGroup>,
    ) -> AutoscalerResult<ResourceList> {
        let group_id = match node_group {
            Some(node_group) => node_group.id(),
            None => return source.node_delta(node, None),
        };
        if let Some(delta) = self.delta_cache.get(&group_id) {
            return Ok(delta.clone());
        }
        let delta = source.node_delta(node, node_group)?;
        self.delta_cache.insert(group_id, delta.clone());
        Ok(delta)
    }

    /// How many of `count` copies of `node` fit into every applicable quota.
    pub fn check_delta(
        &mut self,
        source: &dyn NodeDeltaSource,
        node: &Node,
        node_group: Option<&dyn NodeGroup>,
        count: usize,
    ) -> AutoscalerResult<CheckDeltaResult> {
        let delta = self.delta(source, node, node_group)?;
        Ok(self.check(node, &delta, count))
    }

    fn check(&self, node: &Node, delta: &ResourceList, count: usize) -> CheckDeltaResult {
        let mut result = CheckDeltaResult {
            allowed_delta: count,
            exceeded_quotas: vec![],
        };
        for status in self.statuses.iter() {
            if !status.quota.applies_to(node) {
                continue;
            }
            let mut exceeded_resources = vec![];
            for (resource, remaining) in status.remaining.iter() {
                let per_node = resource_quantity(delta, resource);
                if per_node <= 0 {
                    continue;
                }
                if *remaining < per_node * count as i64 {
                    let allowed = (remaining / per_node) as usize;
                    result.allowed_delta = usize::min(result.allowed_delta, allowed);
                    exceeded_resources.push(resource.clone());
                }
            }
            if !exceeded_resources.is_empty() {
                result.exceeded_quotas.push(ExceededQuota {
                    id: status.quota.id().to_string(),
                    exceeded_resources,
                });
            }
        }
        result
    }

    /// Like `check_delta`, then consumes headroom if all `count` copies fit.
    pub fn apply_delta(
        &mut self,
        source: &dyn NodeDeltaSource,
        node: &Node,
        node_group: Option<&dyn NodeGroup>,
        count: usize,
    ) -> AutoscalerResult<CheckDeltaResult> {
        let delta = self.delta(source, node, node_group)?;
        let result = self.check(node, &delta, count);
        if result.allowed_delta != count {
            return Ok(result);
        }
        for status in self.statuses.iter_mut() {
            if !status.quota.applies_to(node) {
                continue;
            }
            for (resource, remaining) in status.remaining.iter_mut() {
                let used = resource_quantity(&delta, resource) * count as i64;
                *remaining = i64::max(0, *remaining - used);
            }
        }
        Ok(result)
    }

    /// Remaining headroom of a quota, `None` for unknown quota ids.
    pub fn remaining(&self, quota_id: &str) -> Option<&ResourceList> {
        self.statuses
            .iter()
            .find(|status| status.quota.id() == quota_id)
            .map(|status| &status.remaining)
    }
}

#[cfg(test)]
mod tests {
    use crate::autoscalers::cluster_autoscaler::interface::NodeGroup;
    use crate::autoscalers::cluster_autoscaler::quota::quotas::{
        ClusterWideQuota, LabelSelectorQuota, Quota, CLUSTER_WIDE_QUOTA_ID,
    };
    use crate::autoscalers::cluster_autoscaler::quota::tracker::{
        node_resources_delta, ExceededQuota, NodeDeltaSource, QuotaTracker,
    };
    use crate::core::common::{ResourceList, RESOURCE_CPU, RESOURCE_MEMORY};
    use crate::core::errors::AutoscalerResult;
    use crate::core::node::Node;

    const GI: i64 = 1 << 30;

    struct PlainSource {}
    impl NodeDeltaSource for PlainSource {
        fn node_group_for_node(
            &self,
            _node: &Node,
        ) -> AutoscalerResult<Option<Box<dyn NodeGroup>>> {
            Ok(None)
        }

        fn node_delta(
            &self,
            node: &Node,
            _node_group: Option<&dyn NodeGroup>,
        ) -> AutoscalerResult<ResourceList> {
            Ok(node_resources_delta(node))
        }
    }

    fn cluster_quota(cpu: i64, memory: i64) -> Vec<Box<dyn Quota>> {
        vec![Box::new(ClusterWideQuota::new(ResourceList::from([
            (RESOURCE_CPU.to_string(), cpu),
            (RESOURCE_MEMORY.to_string(), memory),
        ])))]
    }

    #[test]
    fn test_partial_shortfall_consumes_nothing() {
        let nodes = vec![
            Node::new("a", 2000, 4 * GI),
            Node::new("b", 2000, 4 * GI),
            Node::new("c", 2000, 6 * GI),
        ];
        let mut tracker =
            QuotaTracker::new(cluster_quota(6, 16 * GI), &nodes, &PlainSource {}).unwrap();
        let template = Node::new("template", 2000, 4 * GI);

        let result = tracker
            .check_delta(&PlainSource {}, &template, None, 2)
            .unwrap();
        assert_eq!(0, result.allowed_delta);
        assert_eq!(
            vec![ExceededQuota {
                id: CLUSTER_WIDE_QUOTA_ID.to_string(),
                exceeded_resources: vec![RESOURCE_CPU.to_string(), RESOURCE_MEMORY.to_string()],
            }],
            result.exceeded_quotas
        );

        let before = tracker.remaining(CLUSTER_WIDE_QUOTA_ID).unwrap().clone();
        let applied = tracker
            .apply_delta(&PlainSource {}, &template, None, 2)
            .unwrap();
        assert_eq!(0, applied.allowed_delta);
        assert_eq!(&before, tracker.remaining(CLUSTER_WIDE_QUOTA_ID).unwrap());
    }

    #[test]
    fn test_apply_sees_previous_applies() {
        let mut tracker = QuotaTracker::new(cluster_quota(10, 100 * GI), &[], &PlainSource {})
            .unwrap();
        let template = Node::new("template", 4000, GI);

        let first = tracker
            .apply_delta(&PlainSource {}, &template, None, 2)
            .unwrap();
        assert_eq!(2, first.allowed_delta);
        assert!(!first.exceeded());
        assert_eq!(2, tracker.remaining(CLUSTER_WIDE_QUOTA_ID).unwrap()[RESOURCE_CPU]);

        // Only floor(2 / 4) = 0 more fit, nothing is consumed.
        let second = tracker
            .apply_delta(&PlainSource {}, &template, None, 1)
            .unwrap();
        assert_eq!(0, second.allowed_delta);
        assert_eq!(2, tracker.remaining(CLUSTER_WIDE_QUOTA_ID).unwrap()[RESOURCE_CPU]);
    }

    #[test]
    fn test_label_quota_and_clamping() {
        let mut gpu_node = Node::new("gpu-1", 8000, 8 * GI);
        gpu_node
            .metadata
            .labels
            .insert("pool".to_string(), "gpu".to_string());
        let quotas: Vec<Box<dyn Quota>> = vec![Box::new(LabelSelectorQuota::new(
            "gpu-pool",
            [("pool".to_string(), "gpu".to_string())].into(),
            ResourceList::from([(RESOURCE_CPU.to_string(), 4)]),
        ))];
        // Usage over the limit is clamped to zero headroom.
        let mut tracker =
            QuotaTracker::new(quotas, &[gpu_node.clone()], &PlainSource {}).unwrap();
        assert_eq!(0, tracker.remaining("gpu-pool").unwrap()[RESOURCE_CPU]);

        let other = Node::new("other", 8000, GI);
        let result = tracker
            .check_delta(&PlainSource {}, &other, None, 3)
            .unwrap();
        assert_eq!(3, result.allowed_delta);
        let result = tracker
            .check_delta(&PlainSource {}, &gpu_node, None, 1)
            .unwrap();
        assert_eq!(0, result.allowed_delta);
    }
}
