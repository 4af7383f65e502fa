use std::collections::HashSet;
use std::time::Instant;

use log::debug;

use crate::autoscalers::cluster_autoscaler::context::AutoscalingContext;
use crate::autoscalers::cluster_autoscaler::podlistprocessor::PodListProcessor;
use crate::core::errors::AutoscalerResult;
use crate::core::pod::Pod;
use crate::core::scheduler::hinting::HintingSimulator;
use crate::core::scheduler::interface::all_nodes;

/// Removes pods which fit on existing nodes. Placed pods stay in the snapshot so the scale-up
/// simulation sees the capacity they take.
#[derive(Default)]
pub struct FilterOutSchedulablePodListProcessor {
    simulator: HintingSimulator,
}

impl FilterOutSchedulablePodListProcessor {
    pub fn new() -> Self {
        Default::default()
    }
}

impl PodListProcessor for FilterOutSchedulablePodListProcessor {
    fn name(&self) -> &'static str {
        "filter-out-schedulable"
    }

    fn process(
        &mut self,
        ctx: &mut AutoscalingContext,
        mut pods: Vec<Pod>,
        _now: f64,
    ) -> AutoscalerResult<Vec<Pod>> {
        let start = Instant::now();
        // Higher priority pods get the free capacity first.
        pods.sort_by(|a, b| b.spec.priority.cmp(&a.spec.priority));

        let outcome = self.simulator.try_schedule_pods(
            ctx.oracle.as_ref(),
            &mut ctx.snapshot,
            &pods,
            &all_nodes,
            false,
        )?;
        self.simulator.drop_old_hints();

        let placed: HashSet<&str> = outcome
            .placements
            .iter()
            .map(|placement| placement.pod.uid())
            .collect();
        debug!(
            "{} pods marked as unschedulable can be scheduled on existing nodes",
            placed.len()
        );
        let remaining: Vec<Pod> = pods
            .iter()
            .filter(|pod| !placed.contains(pod.uid()))
            .cloned()
            .collect();

        let mut metrics = ctx.metrics_collector.borrow_mut();
        metrics.overflowing_controllers += outcome.overflowing_controllers as u64;
        metrics.increment_filter_out_schedulable_duration(start.elapsed().as_secs_f64());
        Ok(remaining)
    }
}

#[cfg(test)]
mod tests {
    use crate::autoscalers::cluster_autoscaler::podlistprocessor::filter_out_schedulable::FilterOutSchedulablePodListProcessor;
    use crate::autoscalers::cluster_autoscaler::podlistprocessor::PodListProcessor;
    use crate::core::pod::Pod;
    use crate::test_util::helpers::{node_in_group, TestAutoscalerBuilder};

    #[test]
    fn test_higher_priority_pods_take_free_capacity() {
        let mut env = TestAutoscalerBuilder::new()
            .with_node(node_in_group("n1", "ng", 1000, 1000))
            .build();
        env.autoscaler.build_snapshot().unwrap();

        let low = Pod::new("low", 600, 100);
        let mut high = Pod::new("high", 600, 100);
        high.spec.priority = 100;
        let tiny = Pod::new("tiny", 300, 100);

        let ctx = env.autoscaler.context_mut();
        let pending = FilterOutSchedulablePodListProcessor::new()
            .process(ctx, vec![low, high, tiny], 0.0)
            .unwrap();
        assert_eq!(
            vec!["low"],
            pending.iter().map(|pod| pod.uid()).collect::<Vec<_>>()
        );
        // Placed pods hold their capacity in the snapshot for the scale-up simulation.
        assert_eq!(2, ctx.snapshot.get("n1").unwrap().pods.len());
    }
}
