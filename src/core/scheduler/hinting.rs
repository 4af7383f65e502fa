//! Remembers where pods were placed in earlier simulations and tries those nodes first.

use std::collections::HashMap;

use crate::core::cluster_snapshot::ClusterSnapshot;
use crate::core::errors::AutoscalerResult;
use crate::core::pod::Pod;
use crate::core::scheduler::interface::{NodeFilter, PodPlacement, ScheduleOutcome, SchedulerOracle};

struct Hint {
    node_name: String,
    iteration: u64,
}

#[derive(Default)]
pub struct HintingSimulator {
    hints: HashMap<String, Hint>,
    iteration: u64,
}

impl HintingSimulator {
    pub fn new() -> Self {
        Default::default()
    }

    /// Places pods on their hinted nodes when predicates still pass, the rest are handed to
    /// `oracle`. Hints of every placed pod are refreshed.
    pub fn try_schedule_pods(
        &mut self,
        oracle: &dyn SchedulerOracle,
        snapshot: &mut ClusterSnapshot,
        pods: &[Pod],
        node_filter: NodeFilter,
        break_on_first_failure: bool,
    ) -> AutoscalerResult<ScheduleOutcome> {
        let mut hinted = Vec::new();
        let mut remaining = Vec::new();

        for pod in pods.iter() {
            let node_name = self.hints.get(pod.uid()).map(|h| h.node_name.clone());
            let fits_hint = node_name.as_ref().map_or(false, |name| {
                snapshot.get(name).map_or(false, |info| node_filter(info))
                    && oracle.check_predicates(snapshot, pod, name).is_ok()
            });
            match node_name {
                Some(name) if fits_hint => {
                    snapshot.force_add_pod(pod.clone(), &name)?;
                    hinted.push(PodPlacement {
                        pod: pod.clone(),
                        node_name: name,
                    });
                }
                _ => remaining.push(pod.clone()),
            }
        }

        let mut outcome =
            oracle.try_schedule_pods(snapshot, &remaining, node_filter, break_on_first_failure)?;
        hinted.append(&mut outcome.placements);
        for placement in hinted.iter() {
            self.hints.insert(
                placement.pod.uid().to_string(),
                Hint {
                    node_name: placement.node_name.clone(),
                    iteration: self.iteration,
                },
            );
        }
        outcome.placements = hinted;
        Ok(outcome)
    }

    /// Forgets hints not refreshed during the current iteration and starts a new one.
    pub fn drop_old_hints(&mut self) {
        let iteration = self.iteration;
        self.hints.retain(|_, hint| hint.iteration == iteration);
        self.iteration += 1;
    }

    pub fn hint_count(&self) -> usize {
        self.hints.len()
    }
}
