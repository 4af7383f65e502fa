mod helpers;

use std::collections::BTreeSet;

use kubernetriks_autoscaler::autoscalers::cluster_autoscaler::podsharding::descriptor::{
    NodeGroupDescriptor, PodShard,
};
use kubernetriks_autoscaler::autoscalers::cluster_autoscaler::podsharding::selector::{
    LruPodShardSelector, PodShardSelector,
};
use kubernetriks_autoscaler::autoscalers::cluster_autoscaler::podsharding::sharder::{
    CompositePodSharder, PodSharder,
};
use kubernetriks_autoscaler::config::{AutoscalerConfig, LongPendingConfig};
use kubernetriks_autoscaler::core::pod::Pod;
use kubernetriks_autoscaler::test_util::helpers::TestAutoscalerBuilder;

use helpers::init_logger;

fn zonal_pod(name: &str, zone: &str) -> Pod {
    let mut pod = Pod::new(name, 100, 100);
    pod.spec
        .node_selector
        .insert("zone".to_string(), zone.to_string());
    pod
}

fn zone_signature(zone: &str) -> String {
    let mut descriptor = NodeGroupDescriptor::default();
    descriptor
        .labels
        .insert("zone".to_string(), zone.to_string());
    descriptor.signature()
}

fn zone_of(shard: &PodShard) -> String {
    shard.descriptor.labels["zone"].clone()
}

#[test]
fn test_zonal_shards_rotate() {
    init_logger();
    let pods = vec![
        zonal_pod("a-1", "a"),
        zonal_pod("b-1", "b"),
        zonal_pod("a-2", "a"),
        zonal_pod("c-1", "c"),
    ];
    let shards = CompositePodSharder::default().compute_pod_shards(&pods);
    assert_eq!(
        vec!["a", "b", "c"],
        shards.iter().map(zone_of).collect::<Vec<_>>()
    );

    let mut selector = LruPodShardSelector::new();
    let picked: Vec<String> = (0..6)
        .map(|_| zone_of(selector.select_pod_shard(&shards).unwrap()))
        .collect();
    assert_eq!(vec!["a", "b", "c", "a", "b", "c"], picked);
}

#[test]
fn test_shards_partition_pending_pods() {
    let pods = vec![
        zonal_pod("a-1", "a"),
        Pod::new("plain", 100, 100),
        zonal_pod("b-1", "b"),
        zonal_pod("a-2", "a"),
    ];
    let shards = CompositePodSharder::default().compute_pod_shards(&pods);

    let mut seen = BTreeSet::new();
    for shard in shards.iter() {
        for uid in shard.pod_uids.iter() {
            assert!(seen.insert(uid.clone()), "pod {} is in two shards", uid);
        }
    }
    let all: BTreeSet<String> = pods.iter().map(|pod| pod.metadata.uid.clone()).collect();
    assert_eq!(all, seen);
}

#[test]
fn test_signature_is_canonical() {
    let mut forward = NodeGroupDescriptor::default();
    forward.labels.insert("zone".to_string(), "a".to_string());
    forward.labels.insert("arch".to_string(), "arm".to_string());
    let mut backward = NodeGroupDescriptor::default();
    backward.labels.insert("arch".to_string(), "arm".to_string());
    backward.labels.insert("zone".to_string(), "a".to_string());

    assert_eq!(forward.signature(), backward.signature());
    assert_ne!(forward.signature(), zone_signature("a"));
    assert_eq!("_", NodeGroupDescriptor::default().signature());
}

#[test]
fn test_iterations_serve_shards_in_turn() {
    init_logger();
    let config = AutoscalerConfig {
        long_pending: LongPendingConfig {
            min_attempts: 100,
            ..Default::default()
        },
        ..Default::default()
    };
    let mut env = TestAutoscalerBuilder::new()
        .with_config(config)
        .with_pod(zonal_pod("a-1", "a"))
        .with_pod(zonal_pod("b-1", "b"))
        .with_pod(zonal_pod("c-1", "c"))
        .build();

    let mut selected = vec![];
    for iteration in 0..6 {
        let status = env.autoscaler.run_once(iteration as f64 * 10.0).unwrap();
        // Only pods of the selected shard go to scale-up.
        assert_eq!(1, status.pending_pods);
        selected.push(status.selected_shard.unwrap());
    }

    let expected: Vec<String> = ["a", "b", "c", "a", "b", "c"]
        .iter()
        .map(|zone| zone_signature(zone))
        .collect();
    assert_eq!(expected, selected);
}
