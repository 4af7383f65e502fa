//! Drives one scale-down pass: finds unneeded nodes, applies unneeded time, atomic groups,
//! cooldowns, budgets and min resource limits, then hands the survivors to the actuator.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info, warn};

use crate::autoscalers::cluster_autoscaler::context::AutoscalingContext;
use crate::autoscalers::cluster_autoscaler::customresources::CustomResourcesProcessor;
use crate::autoscalers::cluster_autoscaler::interface::{
    EventType, NodeDeleteResultType, ScaleDownResult,
};
use crate::autoscalers::cluster_autoscaler::quota::quotas::ClusterWideQuota;
use crate::autoscalers::cluster_autoscaler::quota::tracker::{
    CustomResourcesDeltaSource, NodeDeltaSource, QuotaTracker,
};
use crate::autoscalers::cluster_autoscaler::scaledown::candidates::{
    filter_atomic_groups, filter_cooldown, post_filter, pre_filter, registered_node_counts,
    sort_candidates, CandidateComparator, PreviousCandidatesComparator, ScaleDownCandidate,
};
use crate::autoscalers::cluster_autoscaler::scaledown::cooldown::CooldownRegistry;
use crate::autoscalers::cluster_autoscaler::scaledown::removal::RemovalSimulator;
use crate::autoscalers::cluster_autoscaler::scaledown::unremovable::{
    UnremovableNode, UnremovableReason,
};
use crate::autoscalers::cluster_autoscaler::status::{ScaleDownNode, ScaleDownStatus};
use crate::core::common::{resource_quantity, ResourceList};
use crate::core::errors::{AutoscalerError, AutoscalerResult};
use crate::core::node::Node;

#[derive(Default)]
pub struct ScaleDownPlanner {
    // Node name to the time it was first found unneeded in a row of iterations.
    unneeded_since: BTreeMap<String, f64>,
    simulator: RemovalSimulator,
}

impl ScaleDownPlanner {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn unneeded_since(&self, node_name: &str) -> Option<f64> {
        self.unneeded_since.get(node_name).copied()
    }

    pub fn run(
        &mut self,
        ctx: &mut AutoscalingContext,
        cooldowns: &mut CooldownRegistry,
        processor: &dyn CustomResourcesProcessor,
        all_nodes: &[Node],
        now: f64,
    ) -> AutoscalerResult<ScaleDownStatus> {
        self.process_deletion_results(ctx, cooldowns);

        let mut unremovable = vec![];
        let mut candidates = pre_filter(ctx, all_nodes, &mut unremovable)?;
        let comparators: Vec<Box<dyn CandidateComparator>> =
            vec![Box::new(PreviousCandidatesComparator::new(
                self.unneeded_since.keys().cloned().collect(),
            ))];
        sort_candidates(&mut candidates, &comparators);
        let candidates = post_filter(candidates, ctx.options.scale_down_non_empty_candidates_count);

        let removable = self.simulator.find_removable(
            ctx.oracle.as_ref(),
            &mut ctx.snapshot,
            candidates,
            &mut unremovable,
        )?;
        let unneeded_nodes = self.update_unneeded(&removable, now);

        let to_delete = self.select_nodes_to_delete(
            ctx,
            cooldowns,
            processor,
            all_nodes,
            removable,
            now,
            &mut unremovable,
        )?;

        let mut status = ScaleDownStatus {
            unneeded_nodes,
            unremovable_nodes: unremovable,
            ..Default::default()
        };
        if to_delete.is_empty() {
            status.result = if status.unneeded_nodes.is_empty() {
                ScaleDownResult::NoUnneeded
            } else {
                ScaleDownResult::NoNodeDeleted
            };
            return Ok(status);
        }

        let (empty, drain): (Vec<ScaleDownCandidate>, Vec<ScaleDownCandidate>) =
            to_delete.into_iter().partition(|candidate| candidate.empty);
        let empty_nodes: Vec<Node> = empty.iter().map(|c| c.node.clone()).collect();
        let drain_nodes: Vec<Node> = drain.iter().map(|c| c.node.clone()).collect();
        let group_of: BTreeMap<String, (String, bool)> = empty
            .iter()
            .chain(drain.iter())
            .map(|c| (c.name().to_string(), (c.node_group_id(), c.empty)))
            .collect();

        match ctx.actuator.start_deletion(&empty_nodes, &drain_nodes, now) {
            Ok((result, deleted)) => {
                status.result = result;
                for node in deleted.iter() {
                    let (node_group_id, empty) = match group_of.get(node.name()) {
                        Some(entry) => entry.clone(),
                        None => continue,
                    };
                    info!("Scale-down: removing node {} from {}", node.name(), node_group_id);
                    cooldowns.register_scale_down(&node_group_id, now);
                    self.unneeded_since.remove(node.name());
                    ctx.event_recorder.event(
                        node.name(),
                        EventType::Normal,
                        "ScaleDown",
                        format!("node removed by cluster autoscaler from group {}", node_group_id),
                    );
                    status.removed_nodes.push(ScaleDownNode {
                        node_name: node.name().to_string(),
                        node_group_id,
                        empty,
                    });
                }
            }
            Err(err) => {
                warn!("Failed to start scale-down: {}", err);
                let groups: BTreeSet<&String> = group_of.values().map(|(id, _)| id).collect();
                for node_group_id in groups {
                    cooldowns.register_failed_scale_down(node_group_id, now);
                }
                ctx.metrics_collector.borrow_mut().scale_down_failed += 1;
                status.result = ScaleDownResult::Error;
                status.error = Some(err.to_string());
            }
        }

        self.process_deletion_results(ctx, cooldowns);
        Ok(status)
    }

    /// Refreshes unneeded-since stamps: nodes no longer removable are forgotten.
    fn update_unneeded(&mut self, removable: &[ScaleDownCandidate], now: f64) -> Vec<String> {
        let names: BTreeSet<String> = removable.iter().map(|c| c.name().to_string()).collect();
        self.unneeded_since.retain(|name, _| names.contains(name));
        for name in names.iter() {
            self.unneeded_since.entry(name.clone()).or_insert(now);
        }
        removable.iter().map(|c| c.name().to_string()).collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn select_nodes_to_delete(
        &self,
        ctx: &AutoscalingContext,
        cooldowns: &CooldownRegistry,
        processor: &dyn CustomResourcesProcessor,
        all_nodes: &[Node],
        removable: Vec<ScaleDownCandidate>,
        now: f64,
        unremovable: &mut Vec<UnremovableNode>,
    ) -> AutoscalerResult<Vec<ScaleDownCandidate>> {
        let defaults = ctx.options.node_group_defaults();
        let mut long_enough = vec![];
        for candidate in removable.into_iter() {
            let options = candidate.node_group.get_options(&defaults)?;
            let since = self.unneeded_since(candidate.name()).unwrap_or(now);
            if now - since < options.scale_down_unneeded_time {
                unremovable.push(UnremovableNode::new(
                    candidate.name(),
                    Some(&candidate.node_group_id()),
                    UnremovableReason::NotUnneededLongEnough,
                ));
                continue;
            }
            long_enough.push(candidate);
        }

        let registered = registered_node_counts(ctx, all_nodes)?;
        let candidates = filter_atomic_groups(ctx, long_enough, &registered, unremovable)?;
        let candidates = filter_cooldown(ctx, cooldowns, candidates, now, unremovable);
        self.apply_budgets_and_limits(ctx, processor, all_nodes, candidates, unremovable)
    }

    /// Admits candidates in order while group min sizes, deletion budgets and min resource
    /// limits allow. Atomic groups are admitted whole or not at all.
    fn apply_budgets_and_limits(
        &self,
        ctx: &AutoscalingContext,
        processor: &dyn CustomResourcesProcessor,
        all_nodes: &[Node],
        candidates: Vec<ScaleDownCandidate>,
        unremovable: &mut Vec<UnremovableNode>,
    ) -> AutoscalerResult<Vec<ScaleDownCandidate>> {
        if candidates.is_empty() {
            return Ok(candidates);
        }
        let defaults = ctx.options.node_group_defaults();
        let source = CustomResourcesDeltaSource { ctx, processor };
        let mut min_limits_tracker = min_limits_tracker(ctx, &source, all_nodes)?;

        let mut units: Vec<Vec<ScaleDownCandidate>> = vec![];
        let mut atomic_unit: BTreeMap<String, usize> = BTreeMap::new();
        for candidate in candidates.into_iter() {
            let id = candidate.node_group_id();
            if candidate.node_group.get_options(&defaults)?.zero_or_max_node_scaling {
                if let Some(idx) = atomic_unit.get(&id) {
                    units[*idx].push(candidate);
                    continue;
                }
                atomic_unit.insert(id, units.len());
            }
            units.push(vec![candidate]);
        }

        let mut empty_left = ctx.options.max_empty_bulk_delete;
        let mut total_left = ctx.options.max_scale_down_parallelism;
        let mut removed_per_group: BTreeMap<String, usize> = BTreeMap::new();
        let mut admitted = vec![];

        for unit in units.into_iter() {
            let head = &unit[0];
            let id = head.node_group_id();
            let reject = |reason, unremovable: &mut Vec<UnremovableNode>| {
                for candidate in unit.iter() {
                    unremovable.push(UnremovableNode::new(candidate.name(), Some(&id), reason));
                }
            };

            let already = removed_per_group.get(&id).copied().unwrap_or(0);
            let target = head.node_group.target_size()?;
            let min = head.node_group.min_size();
            if target < min + already + unit.len() {
                reject(UnremovableReason::NodeGroupMinSizeReached, unremovable);
                continue;
            }

            let empties = unit.iter().filter(|c| c.empty).count();
            if unit.len() > total_left || empties > empty_left {
                reject(UnremovableReason::ScaleDownBudgetExceeded, unremovable);
                continue;
            }

            if let Some(tracker) = min_limits_tracker.as_mut() {
                let result = tracker.apply_delta(
                    &source,
                    &head.node,
                    Some(head.node_group.as_ref()),
                    unit.len(),
                )?;
                if result.allowed_delta != unit.len() {
                    debug!(
                        "Removing {} node(s) of {} would cross min resource limits",
                        unit.len(),
                        id
                    );
                    reject(UnremovableReason::MinimalResourceLimitExceeded, unremovable);
                    continue;
                }
            }

            total_left -= unit.len();
            empty_left -= empties;
            *removed_per_group.entry(id.clone()).or_insert(0) += unit.len();
            admitted.extend(unit);
        }
        Ok(admitted)
    }

    /// Counts outcomes of finished deletions: failures put their group into cooldown.
    fn process_deletion_results(
        &mut self,
        ctx: &mut AutoscalingContext,
        cooldowns: &mut CooldownRegistry,
    ) {
        let results = ctx.actuator.deletion_results();
        let mut newest: Option<f64> = None;
        for (node_name, result) in results.iter() {
            match &result.result_type {
                NodeDeleteResultType::Ok => {
                    let mut metrics = ctx.metrics_collector.borrow_mut();
                    metrics.scale_down_success += 1;
                    metrics.total_scaled_down_nodes += 1;
                }
                NodeDeleteResultType::Failed(err) => {
                    warn!("Deletion of node {} failed: {}", node_name, err);
                    cooldowns.register_failed_scale_down(&result.node_group_id, result.timestamp);
                    ctx.metrics_collector.borrow_mut().scale_down_failed += 1;
                    ctx.event_recorder.event(
                        node_name,
                        EventType::Warning,
                        "ScaleDownFailed",
                        format!("failed to delete node: {}", err),
                    );
                }
            }
            newest = Some(newest.map_or(result.timestamp, |t| f64::max(t, result.timestamp)));
        }
        if let Some(timestamp) = newest {
            ctx.actuator.clear_results_not_newer_than(timestamp);
        }
    }
}

/// Tracker over the headroom above the provider's min limits, `None` if there are none.
fn min_limits_tracker(
    ctx: &AutoscalingContext,
    source: &dyn NodeDeltaSource,
    all_nodes: &[Node],
) -> AutoscalerResult<Option<QuotaTracker>> {
    let min_limits = match ctx.cloud_provider.get_resource_limiter() {
        Ok(limiter) => limiter.min_limits,
        Err(AutoscalerError::NotImplemented) => return Ok(None),
        Err(err) => return Err(err),
    };
    if min_limits.is_empty() {
        return Ok(None);
    }

    let mut totals = ResourceList::new();
    for node in all_nodes.iter() {
        let node_group = source.node_group_for_node(node)?;
        let delta = source.node_delta(node, node_group.as_deref())?;
        for resource in min_limits.keys() {
            *totals.entry(resource.clone()).or_insert(0) += resource_quantity(&delta, resource);
        }
    }
    let headroom: ResourceList = min_limits
        .iter()
        .map(|(resource, min)| {
            let left = resource_quantity(&totals, resource) - min;
            (resource.clone(), i64::max(0, left))
        })
        .collect();

    let tracker = QuotaTracker::new(vec![Box::new(ClusterWideQuota::new(headroom))], &[], source)?;
    Ok(Some(tracker))
}

#[cfg(test)]
mod tests {
    use crate::autoscalers::cluster_autoscaler::interface::ScaleDownResult;
    use crate::autoscalers::cluster_autoscaler::scaledown::unremovable::UnremovableReason;
    use crate::config::AutoscalerConfig;
    use crate::test_util::helpers::TestAutoscalerBuilder;

    fn config() -> AutoscalerConfig {
        AutoscalerConfig {
            scale_down_unneeded_time: 60.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_node_removed_after_unneeded_time() {
        let mut env = TestAutoscalerBuilder::new()
            .with_config(config())
            .with_node_group("ng", 0, 5, 1000, 1000)
            .with_nodes_in_group("ng", 2, 1000, 1000)
            .build();

        let status = env.autoscaler.run_once(0.0).unwrap();
        let scale_down = status.scale_down.unwrap();
        assert_eq!(ScaleDownResult::NoNodeDeleted, scale_down.result);
        assert_eq!(vec!["ng-1", "ng-2"], scale_down.unneeded_nodes);
        assert!(scale_down
            .unremovable_nodes
            .iter()
            .all(|u| u.reason == UnremovableReason::NotUnneededLongEnough));

        let status = env.autoscaler.run_once(60.0).unwrap();
        let scale_down = status.scale_down.unwrap();
        assert_eq!(ScaleDownResult::NodeDeleteStarted, scale_down.result);
        assert_eq!(2, scale_down.removed_nodes.len());
        assert_eq!(0, env.cluster.borrow().nodes.len());
        assert_eq!(2, env.metrics.borrow().scale_down_success);
    }

    #[test]
    fn test_min_size_and_budgets() {
        let mut env = TestAutoscalerBuilder::new()
            .with_config(AutoscalerConfig {
                scale_down_unneeded_time: 0.0,
                max_empty_bulk_delete: 1,
                ..Default::default()
            })
            .with_node_group("ng", 1, 5, 1000, 1000)
            .with_nodes_in_group("ng", 4, 1000, 1000)
            .build();

        let status = env.autoscaler.run_once(0.0).unwrap();
        let scale_down = status.scale_down.unwrap();
        let removed: Vec<&str> = scale_down
            .removed_nodes
            .iter()
            .map(|n| n.node_name.as_str())
            .collect();
        assert_eq!(vec!["ng-1"], removed);
        assert_eq!(
            3,
            scale_down
                .unremovable_nodes
                .iter()
                .filter(|u| u.reason == UnremovableReason::ScaleDownBudgetExceeded)
                .count()
        );
    }

    #[test]
    fn test_failed_deletion_puts_group_into_cooldown() {
        let mut env = TestAutoscalerBuilder::new()
            .with_config(AutoscalerConfig {
                scale_down_unneeded_time: 0.0,
                ..Default::default()
            })
            .with_node_group("ng", 0, 5, 1000, 1000)
            .with_nodes_in_group("ng", 1, 1000, 1000)
            .build();
        env.cluster.borrow_mut().failing_deletes.insert("ng-1".to_string());

        env.autoscaler.run_once(0.0).unwrap();
        assert_eq!(1, env.metrics.borrow().scale_down_failed);

        let status = env.autoscaler.run_once(10.0).unwrap();
        let scale_down = status.scale_down.unwrap();
        assert_eq!(ScaleDownResult::NoNodeDeleted, scale_down.result);
        assert_eq!(UnremovableReason::InCooldown, scale_down.unremovable_nodes[0].reason);
        assert!(env.autoscaler.cooldowns().in_scale_down_cooldown(
            "ng",
            &env.autoscaler.context().options,
            100.0
        ));
    }

    #[test]
    fn test_min_resource_limits_block_removal() {
        let mut env = TestAutoscalerBuilder::new()
            .with_config(AutoscalerConfig {
                scale_down_unneeded_time: 0.0,
                ..Default::default()
            })
            .with_node_group("ng", 0, 5, 2000, 1000)
            .with_nodes_in_group("ng", 3, 2000, 1000)
            .with_min_limits([("cpu".to_string(), 4)].into())
            .build();

        let status = env.autoscaler.run_once(0.0).unwrap();
        let scale_down = status.scale_down.unwrap();
        assert_eq!(1, scale_down.removed_nodes.len());
        assert_eq!(
            2,
            scale_down
                .unremovable_nodes
                .iter()
                .filter(|u| u.reason == UnremovableReason::MinimalResourceLimitExceeded)
                .count()
        );
    }
}
