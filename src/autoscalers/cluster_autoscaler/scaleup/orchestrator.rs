//! Scale-up orchestration: builds an expansion option for every node group able to host some
//! of the pending pods, lets the expander chain pick one, fits the delta into quotas and asks
//! the provider to grow the group.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use log::{debug, info, warn};

use crate::autoscalers::cluster_autoscaler::context::AutoscalingContext;
use crate::autoscalers::cluster_autoscaler::customresources::CustomResourcesProcessor;
use crate::autoscalers::cluster_autoscaler::interface::{EventType, NodeGroup};
use crate::autoscalers::cluster_autoscaler::node_group_manager::NodeGroupManager;
use crate::autoscalers::cluster_autoscaler::nodeinfos::{daemonset_pods, template_node_info};
use crate::autoscalers::cluster_autoscaler::podsharding::descriptor::NodeGroupDescriptor;
use crate::autoscalers::cluster_autoscaler::quota::tracker::{
    CustomResourcesDeltaSource, QuotaTracker,
};
use crate::autoscalers::cluster_autoscaler::scaledown::cooldown::CooldownRegistry;
use crate::autoscalers::cluster_autoscaler::scaleup::estimator::BinpackingEstimator;
use crate::autoscalers::cluster_autoscaler::scaleup::expander::{ExpanderChain, ExpansionOption};
use crate::autoscalers::cluster_autoscaler::status::{
    ScaleUpInfo, ScaleUpResult, ScaleUpStatus, SkipReason,
};
use crate::config::AutoscalerConfig;
use crate::core::errors::{AutoscalerError, AutoscalerResult};
use crate::core::node::Node;
use crate::core::node_info::NodeInfo;
use crate::core::pod::Pod;

pub struct ScaleUpRequest<'a> {
    pub pods: Vec<Pod>,
    /// Templates of existing groups keyed by group id.
    pub templates: &'a BTreeMap<String, NodeInfo>,
    pub ready_nodes: &'a [Node],
    /// Shape of the selected pod shard, used for autoprovisioned groups.
    pub descriptor: Option<&'a NodeGroupDescriptor>,
    /// Nodes currently in the cluster.
    pub node_count: usize,
    /// Node groups left unevaluated past this point are skipped.
    pub deadline: Option<Instant>,
}

pub struct ScaleUpOrchestrator {
    estimator: BinpackingEstimator,
    expander: ExpanderChain,
}

impl ScaleUpOrchestrator {
    pub fn new(config: &AutoscalerConfig) -> AutoscalerResult<Self> {
        Ok(Self {
            estimator: BinpackingEstimator::new(),
            expander: ExpanderChain::from_config(config)?,
        })
    }

    pub fn scale_up(
        &mut self,
        ctx: &mut AutoscalingContext,
        cooldowns: &mut CooldownRegistry,
        node_group_manager: &mut NodeGroupManager,
        processor: &dyn CustomResourcesProcessor,
        tracker: &mut QuotaTracker,
        request: ScaleUpRequest,
        now: f64,
    ) -> AutoscalerResult<ScaleUpStatus> {
        let mut status = ScaleUpStatus::default();
        if request.pods.is_empty() {
            return Ok(status);
        }

        let mut options = self.compute_options(
            ctx,
            cooldowns,
            node_group_manager,
            &request,
            now,
            &mut status,
        )?;

        while !options.is_empty() {
            let best = match self.expander.best_option(ctx, options.clone(), now)? {
                Some(best) => best,
                None => break,
            };
            let id = best.node_group.id();
            options.retain(|option| option.node_group.id() != id);

            let atomic = best
                .node_group
                .get_options(&ctx.options.node_group_defaults())?
                .zero_or_max_node_scaling;
            let fitted = self.fit_into_quotas(ctx, processor, tracker, &best, atomic)?;
            let (delta, pods) = match fitted {
                Ok(fitted) => fitted,
                Err(reason) => {
                    debug!("Skipping node group {}: {:?}", id, reason);
                    status.skipped_node_groups.insert(id, reason);
                    continue;
                }
            };

            self.execute(ctx, cooldowns, node_group_manager, &best, delta, now, &mut status);
            if status.result == ScaleUpResult::Successful {
                status.pods_triggered_scale_up =
                    pods.iter().map(|pod| pod.uid().to_string()).collect();
                for pod in pods.iter() {
                    ctx.event_recorder.event(
                        &pod.metadata.name,
                        EventType::Normal,
                        "TriggeredScaleUp",
                        format!("pod triggered scale-up: {} +{}", id, delta),
                    );
                }
            }
            break;
        }

        let triggered: BTreeSet<&String> = status.pods_triggered_scale_up.iter().collect();
        status.pods_remain_unschedulable = request
            .pods
            .iter()
            .map(|pod| pod.uid().to_string())
            .filter(|uid| !triggered.contains(uid))
            .collect();

        if status.result == ScaleUpResult::NotNeeded {
            status.result = ScaleUpResult::NoOptionsAvailable;
            for pod in request.pods.iter() {
                ctx.event_recorder.event(
                    &pod.metadata.name,
                    EventType::Normal,
                    "NotTriggerScaleUp",
                    format!(
                        "pod didn't trigger scale-up: {} node group(s) skipped",
                        status.skipped_node_groups.len()
                    ),
                );
            }
        }
        Ok(status)
    }

    /// Existing groups, groups being created asynchronously and, with autoprovisioning, a new
    /// group per machine type shaped by the shard descriptor. Ordered by id, ids unique.
    fn candidate_node_groups(
        &self,
        ctx: &AutoscalingContext,
        node_group_manager: &NodeGroupManager,
        descriptor: Option<&NodeGroupDescriptor>,
    ) -> AutoscalerResult<Vec<Box<dyn NodeGroup>>> {
        let mut groups = ctx.cloud_provider.node_groups();
        groups.extend(node_group_manager.upcoming_node_groups());

        if ctx.options.node_autoprovisioning_enabled {
            let autoprovisioned = groups.iter().filter(|group| group.autoprovisioned()).count();
            if autoprovisioned < ctx.options.max_autoprovisioned_node_group_count {
                groups.extend(self.autoprovisioning_candidates(ctx, descriptor)?);
            } else {
                debug!(
                    "Autoprovisioned node group limit of {} reached",
                    ctx.options.max_autoprovisioned_node_group_count
                );
            }
        }

        let mut seen = BTreeSet::new();
        groups.retain(|group| seen.insert(group.id()));
        groups.sort_by_key(|group| group.id());
        Ok(groups)
    }

    fn autoprovisioning_candidates(
        &self,
        ctx: &AutoscalingContext,
        descriptor: Option<&NodeGroupDescriptor>,
    ) -> AutoscalerResult<Vec<Box<dyn NodeGroup>>> {
        let machine_types = match ctx.cloud_provider.get_available_machine_types() {
            Ok(machine_types) => machine_types,
            Err(AutoscalerError::NotImplemented) => return Ok(vec![]),
            Err(err) => return Err(err),
        };
        let empty = NodeGroupDescriptor::default();
        let descriptor = descriptor.unwrap_or(&empty);
        let taints: Vec<_> = descriptor.taints.iter().cloned().collect();

        let mut candidates = vec![];
        for machine_type in machine_types.iter() {
            match ctx.cloud_provider.new_node_group(
                machine_type,
                &descriptor.labels,
                &descriptor.system_labels,
                &taints,
                &descriptor.extra_resources,
            ) {
                Ok(node_group) => candidates.push(node_group),
                Err(AutoscalerError::NotImplemented) => return Ok(vec![]),
                Err(err) => warn!(
                    "Cannot build node group for machine type {}: {}",
                    machine_type, err
                ),
            }
        }
        Ok(candidates)
    }

    fn compute_options(
        &self,
        ctx: &mut AutoscalingContext,
        cooldowns: &CooldownRegistry,
        node_group_manager: &NodeGroupManager,
        request: &ScaleUpRequest,
        now: f64,
        status: &mut ScaleUpStatus,
    ) -> AutoscalerResult<Vec<ExpansionOption>> {
        let candidates = self.candidate_node_groups(ctx, node_group_manager, request.descriptor)?;
        let upcoming: BTreeSet<String> = node_group_manager
            .upcoming_node_groups()
            .iter()
            .map(|group| group.id())
            .collect();
        let nodes_left = match ctx.options.max_nodes_total {
            0 => usize::MAX,
            max => max.saturating_sub(request.node_count),
        };
        let daemonsets = daemonset_pods(ctx)?;
        let defaults = ctx.options.node_group_defaults();

        let mut options = vec![];
        let mut timed_out = false;
        for node_group in candidates.into_iter() {
            let id = node_group.id();
            let skip = |status: &mut ScaleUpStatus, reason: SkipReason| {
                debug!("Skipping node group {}: {:?}", id, reason);
                status.skipped_node_groups.insert(id.clone(), reason);
            };

            if !timed_out {
                timed_out = request
                    .deadline
                    .is_some_and(|deadline| Instant::now() >= deadline);
                if timed_out {
                    warn!(
                        "Scale-up ran out of time with {} option(s) computed",
                        options.len()
                    );
                }
            }
            if timed_out {
                skip(status, SkipReason::OutOfTime);
                continue;
            }

            if upcoming.contains(&id) {
                skip(status, SkipReason::AlreadyBeingCreated);
                continue;
            }
            if cooldowns.is_backed_off(&id, ctx.options.node_group_backoff_duration, now) {
                skip(status, SkipReason::BackedOff);
                continue;
            }
            let target = if node_group.exist() {
                node_group.target_size()?
            } else {
                0
            };
            if target >= node_group.max_size() {
                skip(status, SkipReason::NodeGroupReachedMaxSize);
                continue;
            }
            if nodes_left == 0 {
                skip(status, SkipReason::MaxNodesTotalReached);
                continue;
            }
            let template = match request.templates.get(&id) {
                Some(template) => template.clone(),
                None => match template_node_info(
                    ctx,
                    node_group.as_ref(),
                    request.ready_nodes,
                    &daemonsets,
                )? {
                    Some(template) => template,
                    None => {
                        skip(status, SkipReason::NoTemplate);
                        continue;
                    }
                },
            };

            let headroom = node_group.max_size() - target;
            let atomic = node_group.get_options(&defaults)?.zero_or_max_node_scaling;
            if atomic && headroom > nodes_left {
                skip(status, SkipReason::MaxNodesTotalReached);
                continue;
            }
            let limit = usize::min(headroom, nodes_left);
            let estimate = self.estimator.estimate(
                ctx.oracle.as_ref(),
                &mut ctx.snapshot,
                &request.pods,
                &template,
                limit,
            )?;
            if estimate.node_count == 0 {
                skip(status, SkipReason::NoPodsFit);
                continue;
            }
            // Atomic groups only grow straight to max size.
            let node_count = if atomic { headroom } else { estimate.node_count };
            debug!(
                "Node group {} can host {} pod(s) on {} new node(s)",
                id,
                estimate.scheduled_pods.len(),
                node_count
            );
            options.push(ExpansionOption {
                node_group,
                node_count,
                pods: estimate.scheduled_pods,
                template,
            });
        }
        Ok(options)
    }

    /// Delta and pods of `option` which fit into every quota, or why nothing fits.
    fn fit_into_quotas(
        &self,
        ctx: &mut AutoscalingContext,
        processor: &dyn CustomResourcesProcessor,
        tracker: &mut QuotaTracker,
        option: &ExpansionOption,
        atomic: bool,
    ) -> AutoscalerResult<Result<(usize, Vec<Pod>), SkipReason>> {
        let node = &option.template.node;
        let node_group = Some(option.node_group.as_ref());
        let check = {
            let source = CustomResourcesDeltaSource { ctx: &*ctx, processor };
            tracker.check_delta(&source, node, node_group, option.node_count)?
        };

        let mut delta = option.node_count;
        let mut pods = option.pods.clone();
        if check.allowed_delta < delta {
            if atomic {
                return Ok(Err(SkipReason::AtomicGroupDoesNotFit));
            }
            if check.allowed_delta == 0 {
                return Ok(Err(SkipReason::QuotaExceeded(check.exceeded_quotas)));
            }
            delta = check.allowed_delta;
            debug!(
                "Quotas {:?} reduce scale-up of {} from {} to {} node(s)",
                check.exceeded_quotas,
                option.node_group.id(),
                option.node_count,
                delta
            );
            pods = self
                .estimator
                .estimate(
                    ctx.oracle.as_ref(),
                    &mut ctx.snapshot,
                    &option.pods,
                    &option.template,
                    delta,
                )?
                .scheduled_pods;
        }

        let source = CustomResourcesDeltaSource { ctx: &*ctx, processor };
        let applied = tracker.apply_delta(&source, node, node_group, delta)?;
        if applied.allowed_delta != delta {
            return Ok(Err(SkipReason::QuotaExceeded(applied.exceeded_quotas)));
        }
        Ok(Ok((delta, pods)))
    }

    fn execute(
        &self,
        ctx: &mut AutoscalingContext,
        cooldowns: &mut CooldownRegistry,
        node_group_manager: &mut NodeGroupManager,
        option: &ExpansionOption,
        delta: usize,
        now: f64,
        status: &mut ScaleUpStatus,
    ) {
        let id = option.node_group.id();
        match self.grow(ctx, node_group_manager, option, delta, status) {
            Ok(current_size) => {
                info!(
                    "Scale-up: setting group {} size to {} (max: {})",
                    id,
                    current_size + delta,
                    option.node_group.max_size()
                );
                cooldowns.register_scale_up(&id, now);
                {
                    let mut metrics = ctx.metrics_collector.borrow_mut();
                    metrics.scale_up_success += 1;
                    metrics.total_scaled_up_nodes += delta as u64;
                }
                ctx.event_recorder.event(
                    &id,
                    EventType::Normal,
                    "ScaledUpGroup",
                    format!(
                        "Scale-up: setting group {} size to {} instead of {} (max: {})",
                        id,
                        current_size + delta,
                        current_size,
                        option.node_group.max_size()
                    ),
                );
                status.scale_up_infos.push(ScaleUpInfo {
                    node_group_id: id,
                    current_size,
                    new_size: current_size + delta,
                    max_size: option.node_group.max_size(),
                });
                status.result = ScaleUpResult::Successful;
            }
            Err(err) => {
                warn!("Failed to scale up node group {}: {}", id, err);
                cooldowns.register_failed_scale_up(&id, now);
                ctx.metrics_collector.borrow_mut().scale_up_failed += 1;
                ctx.event_recorder.event(
                    &id,
                    EventType::Warning,
                    "FailedToScaleUpGroup",
                    format!("Scale-up failed for group {}: {}", id, err),
                );
                status.result = ScaleUpResult::Failed;
                status.error = Some(err.to_string());
            }
        }
    }

    /// Creates the group if needed and increases its size. Returns the size before.
    fn grow(
        &self,
        ctx: &mut AutoscalingContext,
        node_group_manager: &mut NodeGroupManager,
        option: &ExpansionOption,
        delta: usize,
        status: &mut ScaleUpStatus,
    ) -> AutoscalerResult<usize> {
        let node_group = &option.node_group;
        if node_group.exist() {
            let current_size = node_group.target_size()?;
            node_group.increase_size(delta).map_err(|err| match err {
                AutoscalerError::CloudProvider(_) => err,
                other => AutoscalerError::CloudProvider(other.to_string()),
            })?;
            return Ok(current_size);
        }

        if ctx.options.async_node_group_creation {
            let upcoming = node_group_manager.create_node_group_async(node_group.as_ref(), delta);
            status.created_node_groups.push(upcoming.id());
            return Ok(0);
        }
        let created = node_group_manager.create_node_group(ctx, node_group.as_ref())?;
        status.created_node_groups.extend(created.all_created_ids());
        created
            .main_created_node_group
            .increase_size(delta)
            .map_err(|err| match err {
                AutoscalerError::CloudProvider(_) => err,
                other => AutoscalerError::CloudProvider(other.to_string()),
            })?;
        Ok(0)
    }
}
