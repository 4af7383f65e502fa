mod helpers;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use kubernetriks_autoscaler::autoscalers::cluster_autoscaler::customresources::composite::CompositeCustomResourcesProcessor;
use kubernetriks_autoscaler::autoscalers::cluster_autoscaler::interface::NodeGroup;
use kubernetriks_autoscaler::autoscalers::cluster_autoscaler::quota::quotas::{
    DefaultQuotasProvider, QuotasProvider, CLUSTER_WIDE_QUOTA_ID,
};
use kubernetriks_autoscaler::autoscalers::cluster_autoscaler::quota::tracker::{
    CustomResourcesDeltaSource, ExceededQuota, QuotaTracker,
};
use kubernetriks_autoscaler::autoscalers::cluster_autoscaler::status::{ScaleUpResult, SkipReason};
use kubernetriks_autoscaler::config::{AutoscalerConfig, QuotaConfig};
use kubernetriks_autoscaler::core::pod::Pod;
use kubernetriks_autoscaler::test_util::helpers::{
    gpu_node, node_in_group, TestAutoscalerBuilder, TestEnv, TEST_GPU_TYPE,
};

use helpers::init_logger;

const GI: i64 = 1 << 30;

fn group(env: &TestEnv, id: &str) -> Box<dyn NodeGroup> {
    env.autoscaler
        .context()
        .cloud_provider
        .node_groups()
        .into_iter()
        .find(|group| group.id() == id)
        .unwrap()
}

#[test]
fn test_partial_shortfall_leaves_headroom() {
    init_logger();
    let env = TestAutoscalerBuilder::new()
        .with_node_group("ng", 0, 10, 2000, 4 * GI)
        .with_node(node_in_group("a", "ng", 2000, 4 * GI))
        .with_node(node_in_group("b", "ng", 2000, 4 * GI))
        .with_node(node_in_group("c", "other", 2000, 6 * GI))
        .with_max_limits([("cpu".to_string(), 6), ("memory".to_string(), 16 * GI)].into())
        .build();
    let ctx = env.autoscaler.context();
    let processor = CompositeCustomResourcesProcessor::from_config(&ctx.options);
    let source = CustomResourcesDeltaSource {
        ctx,
        processor: &processor,
    };
    let quotas = DefaultQuotasProvider::default().quotas(ctx).unwrap();
    let nodes = ctx.listers.all_nodes().unwrap();
    let mut tracker = QuotaTracker::new(quotas, &nodes, &source).unwrap();

    let remaining = tracker.remaining(CLUSTER_WIDE_QUOTA_ID).unwrap().clone();
    assert_eq!(0, remaining["cpu"]);
    assert_eq!(2 * GI, remaining["memory"]);

    let ng = group(&env, "ng");
    let template = ng.template_node_info().unwrap().node;
    let result = tracker
        .check_delta(&source, &template, Some(ng.as_ref()), 2)
        .unwrap();
    assert_eq!(0, result.allowed_delta);
    assert_eq!(
        vec![ExceededQuota {
            id: CLUSTER_WIDE_QUOTA_ID.to_string(),
            exceeded_resources: vec!["cpu".to_string(), "memory".to_string()],
        }],
        result.exceeded_quotas
    );

    let applied = tracker
        .apply_delta(&source, &template, Some(ng.as_ref()), 2)
        .unwrap();
    assert_eq!(0, applied.allowed_delta);
    assert_eq!(&remaining, tracker.remaining(CLUSTER_WIDE_QUOTA_ID).unwrap());
}

#[test]
fn test_gpus_are_counted_from_template_while_lagging() {
    let env = TestAutoscalerBuilder::new()
        .with_gpu_node_group("gpu-ng", 0, 10, 2)
        .with_node(gpu_node("lagging", "gpu-ng", 0))
        .with_max_limits([(TEST_GPU_TYPE.to_string(), 4)].into())
        .build();
    let ctx = env.autoscaler.context();
    let processor = CompositeCustomResourcesProcessor::from_config(&ctx.options);
    let source = CustomResourcesDeltaSource {
        ctx,
        processor: &processor,
    };
    let quotas = DefaultQuotasProvider::default().quotas(ctx).unwrap();
    let nodes = ctx.listers.all_nodes().unwrap();
    let mut tracker = QuotaTracker::new(quotas, &nodes, &source).unwrap();
    assert_eq!(
        2,
        tracker.remaining(CLUSTER_WIDE_QUOTA_ID).unwrap()[TEST_GPU_TYPE]
    );

    let gpu_ng = group(&env, "gpu-ng");
    let template = gpu_ng.template_node_info().unwrap().node;
    let result = tracker
        .check_delta(&source, &template, Some(gpu_ng.as_ref()), 2)
        .unwrap();
    assert_eq!(1, result.allowed_delta);
    assert_eq!(
        vec![TEST_GPU_TYPE.to_string()],
        result.exceeded_quotas[0].exceeded_resources
    );
}

#[test]
fn test_random_applies_never_go_negative_or_partial() {
    let env = TestAutoscalerBuilder::new()
        .with_node_group("small", 0, 100, 1000, GI)
        .with_node_group("large", 0, 100, 3000, 5 * GI)
        .with_max_limits([("cpu".to_string(), 40), ("memory".to_string(), 64 * GI)].into())
        .build();
    let ctx = env.autoscaler.context();
    let processor = CompositeCustomResourcesProcessor::from_config(&ctx.options);
    let source = CustomResourcesDeltaSource {
        ctx,
        processor: &processor,
    };
    let quotas = DefaultQuotasProvider::default().quotas(ctx).unwrap();
    let mut tracker = QuotaTracker::new(quotas, &[], &source).unwrap();
    let groups = [group(&env, "small"), group(&env, "large")];

    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..200 {
        let node_group = &groups[rng.random_range(0..groups.len())];
        let template = node_group.template_node_info().unwrap().node;
        let count = rng.random_range(1..6);
        let before = tracker.remaining(CLUSTER_WIDE_QUOTA_ID).unwrap().clone();

        let result = tracker
            .apply_delta(&source, &template, Some(node_group.as_ref()), count)
            .unwrap();
        let after = tracker.remaining(CLUSTER_WIDE_QUOTA_ID).unwrap().clone();
        assert!(after.values().all(|left| *left >= 0));
        if result.allowed_delta == count {
            let cpu = (template.status.capacity["cpu"] / 1000) * count as i64;
            assert_eq!(before["cpu"] - cpu, after["cpu"]);
        } else {
            assert!(result.allowed_delta < count);
            assert_eq!(before, after);
        }
    }
}

#[test]
fn test_label_quota_redirects_scale_up() {
    init_logger();
    let mut env = TestAutoscalerBuilder::new()
        .with_config(AutoscalerConfig {
            expander: "least-waste".to_string(),
            scale_down_enabled: false,
            quotas: vec![QuotaConfig {
                id: "only-one-a".to_string(),
                node_selector: [("node_group".to_string(), "ng-a".to_string())].into(),
                limits: [("nodes".to_string(), 1)].into(),
            }],
            ..Default::default()
        })
        .with_node_group("ng-a", 0, 10, 1000, 1000)
        .with_node_group("ng-b", 0, 10, 4000, 4000)
        .with_pod(Pod::new("p1", 800, 800))
        .with_pod(Pod::new("p2", 800, 800))
        .build();

    // Two small nodes would be best, the quota allows one.
    let scale_up = env.autoscaler.run_once(0.0).unwrap().scale_up.unwrap();
    assert_eq!(ScaleUpResult::Successful, scale_up.result);
    assert_eq!("ng-a", scale_up.scale_up_infos[0].node_group_id);
    assert_eq!(1, scale_up.scale_up_infos[0].new_size);
    assert_eq!(1, scale_up.pods_remain_unschedulable.len());

    // One pod fits on the new node, the other goes to the large group.
    let scale_up = env.autoscaler.run_once(10.0).unwrap().scale_up.unwrap();
    assert_eq!(ScaleUpResult::Successful, scale_up.result);
    assert!(matches!(
        scale_up.skipped_node_groups.get("ng-a"),
        Some(SkipReason::QuotaExceeded(_))
    ));
    assert_eq!("ng-b", scale_up.scale_up_infos[0].node_group_id);
    assert_eq!(2, env.cluster.borrow().nodes.len());
}
