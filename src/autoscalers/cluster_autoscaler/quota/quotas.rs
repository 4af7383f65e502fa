use std::collections::BTreeMap;

use crate::autoscalers::cluster_autoscaler::context::AutoscalingContext;
use crate::core::common::{ResourceList, RESOURCE_CPU, RESOURCE_MEMORY};
use crate::core::errors::{AutoscalerError, AutoscalerResult};
use crate::core::node::Node;

pub const CLUSTER_WIDE_QUOTA_ID: &str = "cluster-wide";
/// Pseudo resource counting nodes.
pub const RESOURCE_NODES: &str = "nodes";

pub trait Quota {
    fn id(&self) -> &str;
    fn applies_to(&self, node: &Node) -> bool;
    /// Resource name to its limit. Cpu is in cores, memory in bytes.
    fn limits(&self) -> &ResourceList;
}

/// Quota applying to every node.
pub struct ClusterWideQuota {
    limits: ResourceList,
}

impl ClusterWideQuota {
    pub fn new(limits: ResourceList) -> Self {
        Self { limits }
    }
}

impl Quota for ClusterWideQuota {
    fn id(&self) -> &str {
        CLUSTER_WIDE_QUOTA_ID
    }

    fn applies_to(&self, _node: &Node) -> bool {
        true
    }

    fn limits(&self) -> &ResourceList {
        &self.limits
    }
}

/// Quota applying to nodes whose labels contain the selector.
pub struct LabelSelectorQuota {
    id: String,
    selector: BTreeMap<String, String>,
    limits: ResourceList,
}

impl LabelSelectorQuota {
    pub fn new(id: &str, selector: BTreeMap<String, String>, limits: ResourceList) -> Self {
        Self {
            id: id.to_string(),
            selector,
            limits,
        }
    }
}

impl Quota for LabelSelectorQuota {
    fn id(&self) -> &str {
        &self.id
    }

    fn applies_to(&self, node: &Node) -> bool {
        self.selector
            .iter()
            .all(|(key, value)| node.metadata.labels.get(key) == Some(value))
    }

    fn limits(&self) -> &ResourceList {
        &self.limits
    }
}

pub trait QuotasProvider {
    fn quotas(&self, ctx: &AutoscalingContext) -> AutoscalerResult<Vec<Box<dyn Quota>>>;
}

/// Cluster-wide quota out of the cloud provider resource limiter and the configured totals,
/// plus the label selector quotas from config.
#[derive(Default)]
pub struct DefaultQuotasProvider {}

impl QuotasProvider for DefaultQuotasProvider {
    fn quotas(&self, ctx: &AutoscalingContext) -> AutoscalerResult<Vec<Box<dyn Quota>>> {
        let mut limits = match ctx.cloud_provider.get_resource_limiter() {
            Ok(limiter) => limiter.max_limits,
            Err(AutoscalerError::NotImplemented) => ResourceList::new(),
            Err(err) => return Err(err),
        };
        let options = &ctx.options;
        let totals = [
            (RESOURCE_NODES, options.max_nodes_total as i64),
            (RESOURCE_CPU, options.max_cores_total),
            (RESOURCE_MEMORY, options.max_memory_total),
        ];
        for (resource, total) in totals {
            if total <= 0 {
                continue;
            }
            let limit = limits.entry(resource.to_string()).or_insert(total);
            *limit = i64::min(*limit, total);
        }

        let mut quotas: Vec<Box<dyn Quota>> = vec![];
        if !limits.is_empty() {
            quotas.push(Box::new(ClusterWideQuota::new(limits)));
        }
        for quota in options.quotas.iter() {
            quotas.push(Box::new(LabelSelectorQuota::new(
                &quota.id,
                quota.node_selector.clone(),
                quota.limits.clone(),
            )));
        }
        Ok(quotas)
    }
}
