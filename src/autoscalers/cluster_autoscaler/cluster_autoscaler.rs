//! Implements the cluster autoscaler control loop.

use std::collections::BTreeMap;
use std::time::Instant;

use log::{debug, info, warn};

use crate::autoscalers::cluster_autoscaler::context::AutoscalingContext;
use crate::autoscalers::cluster_autoscaler::customresources::composite::CompositeCustomResourcesProcessor;
use crate::autoscalers::cluster_autoscaler::customresources::CustomResourcesProcessor;
use crate::autoscalers::cluster_autoscaler::interface::EventType;
use crate::autoscalers::cluster_autoscaler::node_group_manager::NodeGroupManager;
use crate::autoscalers::cluster_autoscaler::nodeinfos::TemplateNodeInfoProvider;
use crate::autoscalers::cluster_autoscaler::podlistprocessor::pipeline::CompositePodListProcessor;
use crate::autoscalers::cluster_autoscaler::podlistprocessor::PodListProcessor;
use crate::autoscalers::cluster_autoscaler::podsharding::filter::{
    PodShardFilter, SelectedShardFilter,
};
use crate::autoscalers::cluster_autoscaler::podsharding::selector::{
    LruPodShardSelector, PodShardSelector,
};
use crate::autoscalers::cluster_autoscaler::podsharding::sharder::{
    CompositePodSharder, PodSharder,
};
use crate::autoscalers::cluster_autoscaler::quota::quotas::{
    DefaultQuotasProvider, QuotasProvider,
};
use crate::autoscalers::cluster_autoscaler::quota::tracker::{
    CustomResourcesDeltaSource, QuotaTracker,
};
use crate::autoscalers::cluster_autoscaler::scaledown::cooldown::CooldownRegistry;
use crate::autoscalers::cluster_autoscaler::scaledown::planner::ScaleDownPlanner;
use crate::autoscalers::cluster_autoscaler::scaleup::orchestrator::{
    ScaleUpOrchestrator, ScaleUpRequest,
};
use crate::autoscalers::cluster_autoscaler::status::RunOnceStatus;
use crate::core::errors::{AutoscalerError, AutoscalerResult};
use crate::core::node::Node;
use crate::core::node_info::NodeInfo;
use crate::core::pod::Pod;

/// Every call of `run_once` is one iteration: the snapshot of the cluster is rebuilt from
/// listers, readiness overrides are applied, pending pods go through the pod list processors and
/// are sharded, then either the selected shard triggers a scale-up or scale-down is attempted.
///
/// The loop is serial. The long-pending tracker, the shard LRU, the unneeded-since map and the
/// cooldown registry live here between iterations and are touched by no one else.
pub struct ClusterAutoscaler {
    context: AutoscalingContext,

    readiness_processor: CompositeCustomResourcesProcessor,
    pod_list_processor: CompositePodListProcessor,
    template_provider: TemplateNodeInfoProvider,

    sharder: Box<dyn PodSharder>,
    shard_selector: Box<dyn PodShardSelector>,
    shard_filter: Box<dyn PodShardFilter>,

    quotas_provider: Box<dyn QuotasProvider>,
    node_group_manager: NodeGroupManager,
    scale_up_orchestrator: ScaleUpOrchestrator,
    scale_down_planner: ScaleDownPlanner,
    cooldowns: CooldownRegistry,
}

impl ClusterAutoscaler {
    pub fn new(context: AutoscalingContext) -> AutoscalerResult<Self> {
        context.options.validate()?;
        info!(
            "Cluster autoscaler created with expander {:?}, scale-down {}",
            context.options.expander,
            if context.options.scale_down_enabled {
                "enabled"
            } else {
                "disabled"
            }
        );
        Ok(Self {
            readiness_processor: CompositeCustomResourcesProcessor::from_config(&context.options),
            pod_list_processor: CompositePodListProcessor::from_config(&context.options),
            template_provider: TemplateNodeInfoProvider::new(),
            sharder: Box::new(CompositePodSharder::default()),
            shard_selector: Box::new(LruPodShardSelector::new()),
            shard_filter: Box::new(SelectedShardFilter::default()),
            quotas_provider: Box::new(DefaultQuotasProvider::default()),
            node_group_manager: NodeGroupManager::new(),
            scale_up_orchestrator: ScaleUpOrchestrator::new(&context.options)?,
            scale_down_planner: ScaleDownPlanner::new(),
            cooldowns: CooldownRegistry::new(),
            context,
        })
    }

    pub fn context(&self) -> &AutoscalingContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut AutoscalingContext {
        &mut self.context
    }

    pub fn cooldowns(&self) -> &CooldownRegistry {
        &self.cooldowns
    }

    pub fn scale_down_planner(&self) -> &ScaleDownPlanner {
        &self.scale_down_planner
    }

    /// Lists nodes, applies readiness overrides and rebuilds the snapshot out of ready nodes and
    /// the pods scheduled on them. Returns `(all_nodes, ready_nodes)` after the overrides.
    pub fn build_snapshot(&mut self) -> AutoscalerResult<(Vec<Node>, Vec<Node>)> {
        let ctx = &mut self.context;
        let all_nodes = ctx.listers.all_nodes()?;
        let ready_nodes = ctx.listers.ready_nodes()?;
        let (all_nodes, ready_nodes) = self
            .readiness_processor
            .filter_unready_nodes_with_custom_resources(ctx, all_nodes, ready_nodes)?;

        let mut csi_nodes: BTreeMap<String, _> = ctx
            .listers
            .csi_nodes()?
            .into_iter()
            .map(|csi_node| (csi_node.name.clone(), csi_node))
            .collect();
        let mut resource_slices: BTreeMap<String, Vec<_>> = Default::default();
        for slice in ctx.listers.resource_slices()?.into_iter() {
            resource_slices
                .entry(slice.node_name.clone())
                .or_default()
                .push(slice);
        }

        ctx.snapshot.clear();
        for node in ready_nodes.iter() {
            let mut node_info = NodeInfo::new(node.clone());
            node_info.csi_node = csi_nodes.remove(node.name());
            node_info.resource_slices = resource_slices.remove(node.name()).unwrap_or_default();
            ctx.snapshot.add_node_info(node_info)?;
        }
        for pod in ctx.listers.all_pods()?.into_iter() {
            if pod.spec.node_name.is_empty() || ctx.snapshot.get(&pod.spec.node_name).is_none() {
                continue;
            }
            let node_name = pod.spec.node_name.clone();
            ctx.snapshot.force_add_pod(pod, &node_name)?;
        }
        debug!(
            "Snapshot built: {} node(s), {} of them ready",
            all_nodes.len(),
            ready_nodes.len()
        );
        Ok((all_nodes, ready_nodes))
    }

    /// One iteration of the loop. Transient errors end the iteration early without failing it.
    pub fn run_once(&mut self, now: f64) -> AutoscalerResult<RunOnceStatus> {
        match self.try_run_once(now) {
            Err(AutoscalerError::Transient(message)) => {
                warn!("Iteration at {} interrupted, retrying next time: {}", now, message);
                Ok(RunOnceStatus::default())
            }
            result => result,
        }
    }

    fn try_run_once(&mut self, now: f64) -> AutoscalerResult<RunOnceStatus> {
        debug!("Cluster autoscaler iteration at {}", now);
        let deadline = self.context.options.iteration_deadline(Instant::now());
        self.context.cloud_provider.refresh()?;

        let (all_nodes, ready_nodes) = self.build_snapshot()?;
        let templates = self.template_provider.process(&self.context, &ready_nodes)?;

        let pending: Vec<Pod> = self
            .context
            .listers
            .all_pods()?
            .into_iter()
            .filter(|pod| pod.spec.node_name.is_empty() && !pod.is_marked_for_deletion())
            .collect();
        let pending = self
            .pod_list_processor
            .process(&mut self.context, pending, now)?;

        let shards = self.sharder.compute_pod_shards(&pending);
        let selected = self.shard_selector.choose_pod_shard(&shards).cloned();
        let pending = match selected.as_ref() {
            Some(shard) => self.shard_filter.filter_pods(shard, &shards, pending),
            None => pending,
        };

        let mut status = RunOnceStatus {
            pending_pods: pending.len(),
            selected_shard: selected.as_ref().map(|shard| shard.signature()),
            ..Default::default()
        };
        if shards.len() > 1 {
            debug!(
                "{} pod shard(s), scaling up for {:?}",
                shards.len(),
                status.selected_shard
            );
        }

        let max_nodes_total = self.context.options.max_nodes_total;
        let below_max = max_nodes_total == 0 || all_nodes.len() < max_nodes_total;
        if !pending.is_empty() && below_max {
            let quotas = self.quotas_provider.quotas(&self.context)?;
            let mut tracker = {
                let source = CustomResourcesDeltaSource {
                    ctx: &self.context,
                    processor: &self.readiness_processor,
                };
                QuotaTracker::new(quotas, &all_nodes, &source)?
            };
            let request = ScaleUpRequest {
                pods: pending,
                templates: &templates,
                ready_nodes: &ready_nodes,
                descriptor: selected.as_ref().map(|shard| &shard.descriptor),
                node_count: all_nodes.len(),
                deadline,
            };
            let scale_up = self.scale_up_orchestrator.scale_up(
                &mut self.context,
                &mut self.cooldowns,
                &mut self.node_group_manager,
                &self.readiness_processor,
                &mut tracker,
                request,
                now,
            )?;
            status.scale_up = Some(scale_up);
        } else if self.context.options.scale_down_enabled {
            let scale_down = self.scale_down_planner.run(
                &mut self.context,
                &mut self.cooldowns,
                &self.readiness_processor,
                &all_nodes,
                now,
            )?;
            status.scale_down = Some(scale_down);
        }

        // The decision is made, the shard goes to the back of the queue.
        if let Some(shard) = selected.as_ref() {
            self.shard_selector.mark_used(shard);
        }

        self.complete_async_creations(now);
        if self.context.options.node_autoprovisioning_enabled {
            status.removed_node_groups = self
                .node_group_manager
                .remove_unneeded_node_groups(&mut self.context)?;
        }
        Ok(status)
    }

    fn complete_async_creations(&mut self, now: f64) {
        let results = self
            .node_group_manager
            .complete_async_creations(&mut self.context);
        for result in results.into_iter() {
            let id = result.node_group_id;
            match result.result {
                Ok(created) => info!(
                    "Asynchronously created node groups {:?}, {} grown by {}",
                    created.all_created_ids(),
                    id,
                    result.delta
                ),
                Err(err) => {
                    warn!("Asynchronous creation of node group {} failed: {}", id, err);
                    self.cooldowns.register_failed_scale_up(&id, now);
                    self.context.metrics_collector.borrow_mut().scale_up_failed += 1;
                    self.context.event_recorder.event(
                        &id,
                        EventType::Warning,
                        "FailedToScaleUpGroup",
                        format!("Scale-up failed for group {}: {}", id, err),
                    );
                }
            }
        }
    }

    /// Drops cached state of every processor and lets the provider release its resources.
    pub fn shutdown(&mut self) -> AutoscalerResult<()> {
        self.pod_list_processor.clean_up();
        self.readiness_processor.clean_up();
        self.template_provider.clean_up();
        self.context.cloud_provider.cleanup()
    }
}
