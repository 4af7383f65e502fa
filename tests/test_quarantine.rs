mod helpers;

use kubernetriks_autoscaler::autoscalers::cluster_autoscaler::podlistprocessor::long_pending::LongPendingPodListProcessor;
use kubernetriks_autoscaler::autoscalers::cluster_autoscaler::podlistprocessor::PodListProcessor;
use kubernetriks_autoscaler::config::LongPendingConfig;
use kubernetriks_autoscaler::core::pod::Pod;
use kubernetriks_autoscaler::test_util::helpers::{owned_pod, TestAutoscalerBuilder};

use helpers::init_logger;

const HOUR: f64 = 3600.0;

fn workload(owner_uid: &str, count: usize, created: f64) -> Vec<Pod> {
    (0..count)
        .map(|i| {
            let mut pod = owned_pod(&format!("{}-{}", owner_uid, i), owner_uid, 100, 100);
            pod.metadata.creation_timestamp = created;
            pod
        })
        .collect()
}

#[test]
fn test_long_pending_workload_is_quarantined() {
    init_logger();
    let mut env = TestAutoscalerBuilder::new().build();
    let ctx = env.autoscaler.context_mut();
    let mut processor =
        LongPendingPodListProcessor::new(LongPendingConfig::default(), Box::new(|_| -300.0));

    let now = 2.0 * HOUR;
    let pods = workload("web", 7, now - HOUR);

    let kept = processor.process(ctx, pods.clone(), now).unwrap();
    assert_eq!(7, kept.len());
    let tracker = processor.tracker("web").unwrap();
    assert_eq!(1, tracker.attempts);
    assert_eq!(None, tracker.next_try);

    let kept = processor.process(ctx, pods.clone(), now + 1.0).unwrap();
    assert_eq!(7, kept.len());
    let tracker = processor.tracker("web").unwrap();
    assert_eq!(2, tracker.attempts);
    // No growth yet over min attempts, the delay is the jitter alone.
    assert_eq!(Some(now + 1.0 + 300.0), tracker.next_try);

    for later in [now + 10.0, now + 200.0] {
        assert!(processor.process(ctx, pods.clone(), later).unwrap().is_empty());
    }
    assert_eq!(2, processor.tracker("web").unwrap().attempts);
    assert_eq!(14, ctx.metrics_collector.borrow().quarantined_pods);

    let kept = processor.process(ctx, pods, now + 301.0).unwrap();
    assert_eq!(7, kept.len());
    assert_eq!(3, processor.tracker("web").unwrap().attempts);
}

#[test]
fn test_quarantine_is_per_workload() {
    init_logger();
    let mut env = TestAutoscalerBuilder::new().build();
    let ctx = env.autoscaler.context_mut();
    let mut processor =
        LongPendingPodListProcessor::new(LongPendingConfig::default(), Box::new(|_| -300.0));

    let now = 2.0 * HOUR;
    let old = workload("old", 2, 0.0);
    processor.process(ctx, old.clone(), now).unwrap();
    processor.process(ctx, old.clone(), now + 10.0).unwrap();

    // A fresh workload shows up while the old one is quarantined.
    let mut pods = old;
    pods.extend(workload("fresh", 3, now + 15.0));
    let kept = processor.process(ctx, pods, now + 20.0).unwrap();
    assert_eq!(3, kept.len());
    assert!(kept.iter().all(|pod| pod.controller_uid() == "fresh"));
}

#[test]
fn test_vanished_workload_is_forgotten() {
    let mut env = TestAutoscalerBuilder::new().build();
    let ctx = env.autoscaler.context_mut();
    let mut processor =
        LongPendingPodListProcessor::new(LongPendingConfig::default(), Box::new(|_| 0.0));

    processor.process(ctx, workload("job", 1, 0.0), HOUR).unwrap();
    assert!(processor.tracker("job").is_some());
    processor.process(ctx, vec![], HOUR + 10.0).unwrap();
    assert!(processor.tracker("job").is_none());
}

#[test]
fn test_back_off_is_monotonic_until_cap() {
    let mut env = TestAutoscalerBuilder::new().build();
    let ctx = env.autoscaler.context_mut();
    let config = LongPendingConfig::default();
    let cap = config.delay_factor * config.cooldown;
    let mut processor = LongPendingPodListProcessor::new(config, Box::new(|_| 0.0));

    let pods = workload("batch", 1, 0.0);
    let mut delays: Vec<f64> = vec![];
    let mut now = HOUR;
    while delays.last().map_or(true, |delay| *delay < cap) {
        if !processor.process(ctx, pods.clone(), now).unwrap().is_empty() {
            if let Some(next_try) = processor.tracker("batch").unwrap().next_try {
                delays.push(next_try - now);
            }
        }
        now += 30.0;
    }

    assert!(delays.len() > 2);
    assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(Some(&cap), delays.last());
}
