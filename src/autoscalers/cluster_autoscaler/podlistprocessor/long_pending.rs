//! Quarantine of workloads which stay pending for long.
//!
//! Pods are grouped by their controller. After `min_attempts` scale-up attempts a group is
//! skipped for a growing delay, unless it got a new pod within `cutoff`. A new pod resets the
//! group's back-off.

use std::collections::{BTreeMap, HashMap};

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::autoscalers::cluster_autoscaler::context::AutoscalingContext;
use crate::autoscalers::cluster_autoscaler::podlistprocessor::PodListProcessor;
use crate::config::LongPendingConfig;
use crate::core::errors::AutoscalerResult;
use crate::core::pod::Pod;

/// Overrides `long_pending.min_attempts`, read once on construction.
pub const MIN_ATTEMPTS_ENV: &str = "QUARANTINE_MIN_ATTEMPTS";

/// Returns a value in `[-d/2, d/2]` for a duration `d`.
pub type Jitter = Box<dyn FnMut(f64) -> f64>;

#[derive(Clone, Debug, PartialEq)]
pub struct WorkloadTracker {
    /// Creation time of the newest pod seen.
    pub last_seen: f64,
    pub next_try: Option<f64>,
    pub attempts: u32,
    /// When a new pod last reset the back-off.
    pub last_reset: Option<f64>,
}

pub struct LongPendingPodListProcessor {
    config: LongPendingConfig,
    trackers: HashMap<String, WorkloadTracker>,
    jitter: Jitter,
}

pub fn random_jitter(seed: u64) -> Jitter {
    let mut rng = StdRng::seed_from_u64(seed);
    Box::new(move |duration: f64| {
        let half = duration / 2.0;
        if half <= 0.0 {
            return 0.0;
        }
        rng.random_range(-half..=half)
    })
}

impl LongPendingPodListProcessor {
    pub fn new(mut config: LongPendingConfig, jitter: Jitter) -> Self {
        if let Ok(value) = std::env::var(MIN_ATTEMPTS_ENV) {
            match value.parse::<u32>() {
                Ok(min_attempts) if min_attempts > 0 => config.min_attempts = min_attempts,
                _ => debug!("Ignoring invalid {}={:?}", MIN_ATTEMPTS_ENV, value),
            }
        }
        Self {
            config,
            trackers: Default::default(),
            jitter,
        }
    }

    pub fn tracker(&self, controller_uid: &str) -> Option<&WorkloadTracker> {
        self.trackers.get(controller_uid)
    }

    fn back_off(&mut self, attempts: u32) -> f64 {
        let over = attempts.saturating_sub(self.config.min_attempts) as f64;
        let cooldown = self.config.cooldown;
        let delay = f64::min(over * self.config.step, self.config.delay_factor * cooldown)
            - (self.jitter)(cooldown);
        delay.abs()
    }

    /// Whether the group's pods take part in this iteration.
    fn admit(&mut self, uid: &str, newest: f64, now: f64) -> bool {
        let tracker = self
            .trackers
            .entry(uid.to_string())
            .or_insert_with(|| WorkloadTracker {
                last_seen: newest,
                next_try: None,
                attempts: 0,
                last_reset: None,
            });
        if newest > tracker.last_seen {
            tracker.last_seen = newest;
            tracker.next_try = None;
            tracker.attempts = 0;
            tracker.last_reset = Some(now);
        }
        if let Some(next_try) = tracker.next_try {
            if now < next_try {
                return false;
            }
        }

        tracker.attempts += 1;
        let attempts = tracker.attempts;
        let recently_reset = tracker
            .last_reset
            .map_or(false, |reset| now - reset < self.config.cutoff);
        if attempts >= self.config.min_attempts && !recently_reset {
            let delay = self.back_off(attempts);
            if let Some(tracker) = self.trackers.get_mut(uid) {
                tracker.next_try = Some(now + delay);
            }
        }
        true
    }
}

impl PodListProcessor for LongPendingPodListProcessor {
    fn name(&self) -> &'static str {
        "long-pending-quarantine"
    }

    fn process(
        &mut self,
        ctx: &mut AutoscalingContext,
        pods: Vec<Pod>,
        now: f64,
    ) -> AutoscalerResult<Vec<Pod>> {
        let mut newest: BTreeMap<String, f64> = Default::default();
        for pod in pods.iter() {
            let created = newest
                .entry(pod.controller_uid().to_string())
                .or_insert(f64::MIN);
            *created = f64::max(*created, pod.metadata.creation_timestamp);
        }

        let mut admitted: BTreeMap<String, bool> = Default::default();
        for (uid, created) in newest.iter() {
            let admit = self.admit(uid, *created, now);
            if !admit {
                debug!("Workload {:?} is quarantined until its back-off passes", uid);
            }
            admitted.insert(uid.clone(), admit);
        }
        self.trackers.retain(|uid, _| newest.contains_key(uid));

        let (kept, skipped): (Vec<Pod>, Vec<Pod>) = pods
            .into_iter()
            .partition(|pod| admitted.get(pod.controller_uid()).copied().unwrap_or(true));
        ctx.metrics_collector.borrow_mut().quarantined_pods += skipped.len() as u64;
        Ok(kept)
    }
}
