use log::debug;

use crate::autoscalers::cluster_autoscaler::context::AutoscalingContext;
use crate::autoscalers::cluster_autoscaler::podlistprocessor::PodListProcessor;
use crate::core::common::{Taint, TaintEffect};
use crate::core::errors::AutoscalerResult;
use crate::core::pod::Pod;

/// Put on nodes the autoscaler is removing.
pub const TO_BE_DELETED_TAINT: &str = "ToBeDeletedByClusterAutoscaler";

/// Adds recreatable pods of nodes being drained to pending pods, they will need a place once the
/// drain completes. Drained nodes get tainted in the snapshot so the simulation never puts those
/// pods back where they came from.
#[derive(Default)]
pub struct CurrentlyDrainedNodesPodListProcessor {}

impl PodListProcessor for CurrentlyDrainedNodesPodListProcessor {
    fn name(&self) -> &'static str {
        "currently-drained-nodes"
    }

    fn process(
        &mut self,
        ctx: &mut AutoscalingContext,
        mut pods: Vec<Pod>,
        now: f64,
    ) -> AutoscalerResult<Vec<Pod>> {
        let status = ctx.actuator.check_status();
        for node_name in status.currently_drained_nodes.iter() {
            if ctx.snapshot.get(node_name).is_none() {
                continue;
            }
            let mut node_info = ctx.snapshot.remove_node(node_name)?;
            for pod in node_info.pods.iter() {
                if !pod.is_recreatable() || pod.is_marked_for_deletion() {
                    continue;
                }
                debug!(
                    "Pod {:?} of drained node {:?} treated as pending",
                    pod.metadata.name, node_name
                );
                let mut pending = pod.clone();
                pending.spec.node_name.clear();
                pods.push(pending);
            }
            let taints = &mut node_info.node.spec.taints;
            if !taints.iter().any(|taint| taint.key == TO_BE_DELETED_TAINT) {
                taints.push(Taint {
                    key: TO_BE_DELETED_TAINT.to_string(),
                    value: format!("{}", now as i64),
                    effect: TaintEffect::NoSchedule,
                });
            }
            ctx.snapshot.add_node_info(node_info)?;
        }
        Ok(pods)
    }
}

#[cfg(test)]
mod tests {
    use crate::autoscalers::cluster_autoscaler::podlistprocessor::currently_drained::{
        CurrentlyDrainedNodesPodListProcessor, TO_BE_DELETED_TAINT,
    };
    use crate::autoscalers::cluster_autoscaler::podlistprocessor::filter_out_schedulable::FilterOutSchedulablePodListProcessor;
    use crate::autoscalers::cluster_autoscaler::podlistprocessor::PodListProcessor;
    use crate::core::pod::Pod;
    use crate::test_util::helpers::{
        daemonset_pod, node_in_group, on_node, owned_pod, TestAutoscalerBuilder,
    };

    #[test]
    fn test_recreatable_pods_of_drained_node_become_pending() {
        let mut env = TestAutoscalerBuilder::new()
            .with_node(node_in_group("n1", "ng", 1000, 1000))
            .with_node(node_in_group("n2", "ng", 1000, 1000))
            .with_pod(on_node(owned_pod("web", "rs", 100, 100), "n1"))
            .with_pod(on_node(daemonset_pod("agent", 10, 10), "n1"))
            .with_pod(on_node(Pod::new("bare", 100, 100), "n1"))
            .with_pod(on_node(owned_pod("api", "rs", 100, 100), "n2"))
            .build();
        env.cluster.borrow_mut().currently_drained = vec!["n1".to_string()];
        env.autoscaler.build_snapshot().unwrap();

        let pending = CurrentlyDrainedNodesPodListProcessor::default()
            .process(
                env.autoscaler.context_mut(),
                vec![Pod::new("pending", 100, 100)],
                0.0,
            )
            .unwrap();
        assert_eq!(
            vec!["pending", "web"],
            pending.iter().map(|pod| pod.uid()).collect::<Vec<_>>()
        );
        assert!(pending[1].spec.node_name.is_empty());

        let ctx = env.autoscaler.context_mut();
        let drained = &ctx.snapshot.get("n1").unwrap().node;
        assert!(drained
            .spec
            .taints
            .iter()
            .any(|taint| taint.key == TO_BE_DELETED_TAINT));
        assert!(ctx.snapshot.get("n2").unwrap().node.spec.taints.is_empty());
    }

    #[test]
    fn test_pod_of_drained_node_is_not_placed_back_on_it() {
        // The drained node has room for its own pod, no other node does.
        let mut env = TestAutoscalerBuilder::new()
            .with_node(node_in_group("n1", "ng", 1000, 1000))
            .with_node(node_in_group("n2", "ng", 1000, 1000))
            .with_pod(on_node(owned_pod("web", "rs", 300, 100), "n1"))
            .with_pod(on_node(owned_pod("api", "rs", 900, 100), "n2"))
            .build();
        env.cluster.borrow_mut().currently_drained = vec!["n1".to_string()];
        env.autoscaler.build_snapshot().unwrap();

        let ctx = env.autoscaler.context_mut();
        let pending = CurrentlyDrainedNodesPodListProcessor::default()
            .process(ctx, vec![], 0.0)
            .unwrap();
        let still_pending = FilterOutSchedulablePodListProcessor::default()
            .process(ctx, pending, 0.0)
            .unwrap();
        assert_eq!(
            vec!["web"],
            still_pending.iter().map(|pod| pod.uid()).collect::<Vec<_>>()
        );
    }
}
