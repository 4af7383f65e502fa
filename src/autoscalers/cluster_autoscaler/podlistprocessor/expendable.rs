use log::{debug, warn};

use crate::autoscalers::cluster_autoscaler::context::AutoscalingContext;
use crate::autoscalers::cluster_autoscaler::podlistprocessor::PodListProcessor;
use crate::core::errors::AutoscalerResult;
use crate::core::pod::Pod;

/// Drops pods below the priority cutoff. Pods waiting for a preemption on their nominated node
/// are put into the snapshot there and leave the pending list.
#[derive(Default)]
pub struct FilterOutExpendablePodListProcessor {}

impl PodListProcessor for FilterOutExpendablePodListProcessor {
    fn name(&self) -> &'static str {
        "filter-out-expendable"
    }

    fn process(
        &mut self,
        ctx: &mut AutoscalingContext,
        pods: Vec<Pod>,
        _now: f64,
    ) -> AutoscalerResult<Vec<Pod>> {
        let cutoff = ctx.options.expendable_pods_priority_cutoff;
        let mut pending = Vec::with_capacity(pods.len());
        for pod in pods.into_iter() {
            if pod.spec.priority < cutoff {
                debug!("Pod {:?} is expendable", pod.metadata.name);
                continue;
            }
            let nominated = pod.status.nominated_node_name.clone();
            if nominated.is_empty() {
                pending.push(pod);
                continue;
            }
            if ctx.snapshot.get(&nominated).is_none() {
                warn!(
                    "Pod {:?} is nominated to unknown node {:?}",
                    pod.metadata.name, nominated
                );
                continue;
            }
            debug!(
                "Pod {:?} waits for preemption on {:?}, injecting it there",
                pod.metadata.name, nominated
            );
            ctx.snapshot.force_add_pod(pod, &nominated)?;
        }
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use crate::autoscalers::cluster_autoscaler::podlistprocessor::expendable::FilterOutExpendablePodListProcessor;
    use crate::autoscalers::cluster_autoscaler::podlistprocessor::PodListProcessor;
    use crate::config::AutoscalerConfig;
    use crate::core::pod::Pod;
    use crate::test_util::helpers::{node_in_group, TestAutoscalerBuilder};

    fn pod_with_priority(name: &str, priority: i32) -> Pod {
        let mut pod = Pod::new(name, 100, 100);
        pod.spec.priority = priority;
        pod
    }

    #[test]
    fn test_expendable_and_nominated_pods_leave_pending() {
        let mut env = TestAutoscalerBuilder::new()
            .with_config(AutoscalerConfig {
                expendable_pods_priority_cutoff: 10,
                ..Default::default()
            })
            .with_node(node_in_group("n1", "ng", 1000, 1000))
            .build();
        env.autoscaler.build_snapshot().unwrap();

        let mut nominated = pod_with_priority("nominated", 20);
        nominated.status.nominated_node_name = "n1".to_string();
        let mut lost = pod_with_priority("lost", 20);
        lost.status.nominated_node_name = "gone".to_string();
        let pods = vec![
            pod_with_priority("low", 5),
            pod_with_priority("high", 10),
            nominated,
            lost,
        ];

        let ctx = env.autoscaler.context_mut();
        let pending = FilterOutExpendablePodListProcessor::default()
            .process(ctx, pods, 0.0)
            .unwrap();
        assert_eq!(
            vec!["high"],
            pending.iter().map(|pod| pod.uid()).collect::<Vec<_>>()
        );
        let n1 = ctx.snapshot.get("n1").unwrap();
        assert_eq!("nominated", n1.pods[0].uid());
    }
}
