//! Stages narrowing the set of nodes scale-down may remove. Every node dropped by a stage for
//! a reason is reported as unremovable.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::autoscalers::cluster_autoscaler::context::AutoscalingContext;
use crate::autoscalers::cluster_autoscaler::interface::NodeGroup;
use crate::autoscalers::cluster_autoscaler::scaledown::cooldown::CooldownRegistry;
use crate::autoscalers::cluster_autoscaler::scaledown::unremovable::{
    UnremovableNode, UnremovableReason,
};
use crate::core::errors::AutoscalerResult;
use crate::core::node::Node;
use crate::core::pod::Pod;

#[derive(Clone)]
pub struct ScaleDownCandidate {
    pub node: Node,
    pub node_group: Box<dyn NodeGroup>,
    pub utilization: f64,
    /// Runs nothing but DaemonSet and mirror pods.
    pub empty: bool,
}

impl ScaleDownCandidate {
    pub fn name(&self) -> &str {
        self.node.name()
    }

    pub fn node_group_id(&self) -> String {
        self.node_group.id()
    }
}

/// Pods which would not need a new place if their node went away.
pub fn ignored_for_removal(pod: &Pod) -> bool {
    pod.is_daemonset_pod() || pod.is_mirror_pod()
}

/// Drops nodes which are not autoscaled, belong to groups at min size, are marked as not to
/// be scaled down, are upcoming or are utilized above the threshold of their group.
pub fn pre_filter(
    ctx: &AutoscalingContext,
    nodes: &[Node],
    unremovable: &mut Vec<UnremovableNode>,
) -> AutoscalerResult<Vec<ScaleDownCandidate>> {
    let defaults = ctx.options.node_group_defaults();
    let mut candidates = vec![];

    for node in nodes.iter() {
        let name = node.name();
        let node_group = match ctx.cloud_provider.node_group_for_node(node)? {
            Some(node_group) => node_group,
            None => {
                unremovable.push(UnremovableNode::new(
                    name,
                    None,
                    UnremovableReason::NotAutoscaled,
                ));
                continue;
            }
        };
        let id = node_group.id();
        let mut reject = |reason| {
            debug!("Node {} is not removable: {:?}", name, reason);
            unremovable.push(UnremovableNode::new(name, Some(&id), reason));
        };

        if node.is_scale_down_disabled() {
            reject(UnremovableReason::ScaleDownDisabledAnnotation);
            continue;
        }
        if node.is_upcoming() {
            reject(UnremovableReason::UpcomingNode);
            continue;
        }
        let node_info = match ctx.snapshot.get(name) {
            Some(node_info) => node_info,
            None => {
                reject(UnremovableReason::NotInSnapshot);
                continue;
            }
        };
        if node_group.target_size()? <= node_group.min_size() {
            reject(UnremovableReason::NodeGroupMinSizeReached);
            continue;
        }
        let options = node_group.get_options(&defaults)?;
        let utilization = node_info.utilization(ignored_for_removal);
        if utilization >= options.scale_down_utilization_threshold {
            reject(UnremovableReason::NotUnderutilized);
            continue;
        }

        candidates.push(ScaleDownCandidate {
            node: node.clone(),
            empty: node_info.pods.iter().all(ignored_for_removal),
            node_group,
            utilization,
        });
    }
    Ok(candidates)
}

pub trait CandidateComparator {
    fn compare(&self, a: &ScaleDownCandidate, b: &ScaleDownCandidate) -> Ordering;
}

/// Puts nodes which were already candidates in the previous iteration first.
pub struct PreviousCandidatesComparator {
    previous: BTreeSet<String>,
}

impl PreviousCandidatesComparator {
    pub fn new(previous: BTreeSet<String>) -> Self {
        Self { previous }
    }
}

impl CandidateComparator for PreviousCandidatesComparator {
    fn compare(&self, a: &ScaleDownCandidate, b: &ScaleDownCandidate) -> Ordering {
        let a_previous = self.previous.contains(a.name());
        let b_previous = self.previous.contains(b.name());
        b_previous.cmp(&a_previous)
    }
}

/// Stable sort by the first comparator which tells candidates apart.
pub fn sort_candidates(
    candidates: &mut [ScaleDownCandidate],
    comparators: &[Box<dyn CandidateComparator>],
) {
    candidates.sort_by(|a, b| {
        comparators
            .iter()
            .map(|comparator| comparator.compare(a, b))
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
}

pub fn post_filter(
    mut candidates: Vec<ScaleDownCandidate>,
    max_count: usize,
) -> Vec<ScaleDownCandidate> {
    candidates.truncate(max_count);
    candidates
}

/// Number of registered nodes of every group, upcoming nodes excluded.
pub fn registered_node_counts(
    ctx: &AutoscalingContext,
    all_nodes: &[Node],
) -> AutoscalerResult<BTreeMap<String, usize>> {
    let mut counts = BTreeMap::new();
    for node in all_nodes.iter().filter(|node| !node.is_upcoming()) {
        if let Some(node_group) = ctx.cloud_provider.node_group_for_node(node)? {
            *counts.entry(node_group.id()).or_insert(0) += 1;
        }
    }
    Ok(counts)
}

/// Candidates of a zero-or-max group pass only when the whole group is removable.
pub fn filter_atomic_groups(
    ctx: &AutoscalingContext,
    candidates: Vec<ScaleDownCandidate>,
    registered: &BTreeMap<String, usize>,
    unremovable: &mut Vec<UnremovableNode>,
) -> AutoscalerResult<Vec<ScaleDownCandidate>> {
    let defaults = ctx.options.node_group_defaults();
    let mut per_group: BTreeMap<String, usize> = BTreeMap::new();
    for candidate in candidates.iter() {
        *per_group.entry(candidate.node_group_id()).or_insert(0) += 1;
    }

    let mut result = vec![];
    for candidate in candidates.into_iter() {
        let id = candidate.node_group_id();
        let options = candidate.node_group.get_options(&defaults)?;
        if options.zero_or_max_node_scaling {
            let count = per_group.get(&id).copied().unwrap_or(0);
            let total = registered.get(&id).copied().unwrap_or(0);
            if count != total {
                debug!(
                    "Node {} is not removable: only {} of {} nodes of atomic group {} can go",
                    candidate.name(),
                    count,
                    total,
                    id
                );
                unremovable.push(UnremovableNode::new(
                    candidate.name(),
                    Some(&id),
                    UnremovableReason::AtomicScaleDownFailed,
                ));
                continue;
            }
        }
        result.push(candidate);
    }
    Ok(result)
}

pub fn filter_cooldown(
    ctx: &AutoscalingContext,
    cooldowns: &CooldownRegistry,
    candidates: Vec<ScaleDownCandidate>,
    now: f64,
    unremovable: &mut Vec<UnremovableNode>,
) -> Vec<ScaleDownCandidate> {
    candidates
        .into_iter()
        .filter(|candidate| {
            let id = candidate.node_group_id();
            if cooldowns.in_scale_down_cooldown(&id, &ctx.options, now) {
                unremovable.push(UnremovableNode::new(
                    candidate.name(),
                    Some(&id),
                    UnremovableReason::InCooldown,
                ));
                return false;
            }
            true
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use crate::autoscalers::cluster_autoscaler::scaledown::candidates::{
        filter_atomic_groups, post_filter, pre_filter, registered_node_counts, sort_candidates,
        CandidateComparator, PreviousCandidatesComparator,
    };
    use crate::autoscalers::cluster_autoscaler::scaledown::unremovable::UnremovableReason;
    use crate::core::node::{NODE_UPCOMING_ANNOTATION, SCALE_DOWN_DISABLED_ANNOTATION};
    use crate::core::pod::Pod;
    use crate::test_util::helpers::{node_in_group, TestAutoscalerBuilder};

    #[test]
    fn test_pre_filter_reasons() {
        let mut disabled = node_in_group("disabled", "ng", 1000, 1000);
        disabled
            .metadata
            .annotations
            .insert(SCALE_DOWN_DISABLED_ANNOTATION.to_string(), "true".to_string());
        let mut busy_pod = Pod::new("busy-pod", 900, 100);
        busy_pod.spec.node_name = "busy".to_string();

        let mut env = TestAutoscalerBuilder::new()
            .with_node_group("ng", 0, 10, 1000, 1000)
            .with_node_group("at-min", 1, 10, 1000, 1000)
            .with_node(node_in_group("idle", "ng", 1000, 1000))
            .with_node(node_in_group("busy", "ng", 1000, 1000))
            .with_node(disabled)
            .with_node(node_in_group("lonely", "at-min", 1000, 1000))
            .with_node(crate::core::node::Node::new("static", 1000, 1000))
            .with_pod(busy_pod)
            .build();
        env.autoscaler.build_snapshot().unwrap();
        let ctx = env.autoscaler.context();
        let nodes = ctx.listers.all_nodes().unwrap();

        let mut unremovable = vec![];
        let candidates = pre_filter(ctx, &nodes, &mut unremovable).unwrap();
        let names: Vec<&str> = candidates.iter().map(|c| c.name()).collect();
        assert_eq!(vec!["idle"], names);
        assert!(candidates[0].empty);

        let reasons: Vec<(&str, UnremovableReason)> = unremovable
            .iter()
            .map(|u| (u.node_name.as_str(), u.reason))
            .collect();
        assert!(reasons.contains(&("busy", UnremovableReason::NotUnderutilized)));
        assert!(reasons.contains(&("disabled", UnremovableReason::ScaleDownDisabledAnnotation)));
        assert!(reasons.contains(&("lonely", UnremovableReason::NodeGroupMinSizeReached)));
        assert!(reasons.contains(&("static", UnremovableReason::NotAutoscaled)));
    }

    #[test]
    fn test_previous_candidates_first_then_cap() {
        let mut env = TestAutoscalerBuilder::new()
            .with_node_group("ng", 0, 10, 1000, 1000)
            .with_node(node_in_group("a", "ng", 1000, 1000))
            .with_node(node_in_group("b", "ng", 1000, 1000))
            .with_node(node_in_group("c", "ng", 1000, 1000))
            .build();
        env.autoscaler.build_snapshot().unwrap();
        let ctx = env.autoscaler.context();
        let nodes = ctx.listers.all_nodes().unwrap();
        let mut candidates = pre_filter(ctx, &nodes, &mut vec![]).unwrap();

        let comparators: Vec<Box<dyn CandidateComparator>> = vec![Box::new(
            PreviousCandidatesComparator::new(BTreeSet::from(["c".to_string()])),
        )];
        sort_candidates(&mut candidates, &comparators);
        let candidates = post_filter(candidates, 2);
        let names: Vec<&str> = candidates.iter().map(|c| c.name()).collect();
        assert_eq!(vec!["c", "a"], names);
    }

    #[test]
    fn test_atomic_group_all_or_nothing() {
        let mut upcoming = node_in_group("g2-upcoming", "g2", 1000, 1000);
        upcoming
            .metadata
            .annotations
            .insert(NODE_UPCOMING_ANNOTATION.to_string(), "true".to_string());
        let mut env = TestAutoscalerBuilder::new()
            .with_atomic_node_group("g1", 0, 3, 1000, 1000)
            .with_atomic_node_group("g2", 0, 3, 1000, 1000)
            .with_nodes_in_group("g1", 3, 1000, 1000)
            .with_nodes_in_group("g2", 2, 1000, 1000)
            .with_node(upcoming)
            .build();
        env.autoscaler.build_snapshot().unwrap();
        let ctx = env.autoscaler.context();
        let all_nodes = ctx.listers.all_nodes().unwrap();
        let mut candidates = pre_filter(ctx, &all_nodes, &mut vec![]).unwrap();
        // Only two of g1's three nodes are candidates.
        candidates.retain(|c| c.name() != "g1-3");

        let registered = registered_node_counts(ctx, &all_nodes).unwrap();
        assert_eq!(2, registered["g2"]);
        let mut unremovable = vec![];
        let passed = filter_atomic_groups(ctx, candidates, &registered, &mut unremovable).unwrap();

        let names: Vec<&str> = passed.iter().map(|c| c.name()).collect();
        assert_eq!(vec!["g2-1", "g2-2"], names);
        assert_eq!(2, unremovable.len());
        assert!(unremovable
            .iter()
            .all(|u| u.reason == UnremovableReason::AtomicScaleDownFailed));
    }
}
