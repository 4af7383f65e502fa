//! Predicate-checking scheduler oracle. Pods are placed first-fit over snapshot nodes in name
//! order, a node being feasible when every filter plugin of the profile accepts it.

use std::collections::BTreeSet;

use log::debug;

use crate::core::cluster_snapshot::ClusterSnapshot;
use crate::core::errors::{AutoscalerError, AutoscalerResult};
use crate::core::node_info::NodeInfo;
use crate::core::pod::Pod;
use crate::core::scheduler::interface::{
    NodeFilter, PodPlacement, ScheduleError, ScheduleOutcome, SchedulerOracle,
};
use crate::core::scheduler::plugin::{
    NODE_AFFINITY, NODE_RESOURCES_FIT, NODE_UNSCHEDULABLE, PLUGIN_REGISTRY, TAINT_TOLERATION,
};

pub struct KubeSchedulerProfile {
    // Each entry is a filter plugin name registered globally in plugin registry.
    pub filter: Vec<String>,
}

pub fn default_kube_scheduler_profile() -> KubeSchedulerProfile {
    KubeSchedulerProfile {
        filter: vec![
            NODE_UNSCHEDULABLE.to_string(),
            NODE_RESOURCES_FIT.to_string(),
            NODE_AFFINITY.to_string(),
            TAINT_TOLERATION.to_string(),
        ],
    }
}

pub struct PredicateSchedulerOracle {
    profile: KubeSchedulerProfile,
}

impl Default for PredicateSchedulerOracle {
    fn default() -> Self {
        Self::new(default_kube_scheduler_profile()).unwrap_or(Self {
            profile: KubeSchedulerProfile { filter: vec![] },
        })
    }
}

impl PredicateSchedulerOracle {
    /// Fails if the profile names a plugin missing from the registry.
    pub fn new(profile: KubeSchedulerProfile) -> AutoscalerResult<Self> {
        for name in profile.filter.iter() {
            if !PLUGIN_REGISTRY.contains_key(name.as_str()) {
                return Err(AutoscalerError::Configuration(format!(
                    "unknown filter plugin {:?}",
                    name
                )));
            }
        }
        Ok(Self { profile })
    }

    fn run_filters(&self, pod: &Pod, node_info: &NodeInfo) -> Result<(), ScheduleError> {
        for name in self.profile.filter.iter() {
            // Presence was checked on construction.
            if let Some(plugin) = PLUGIN_REGISTRY.get(name.as_str()) {
                plugin
                    .filter(pod, node_info)
                    .map_err(|reason| ScheduleError::PredicateFailed {
                        plugin: name.clone(),
                        reason,
                    })?;
            }
        }
        Ok(())
    }

    fn find_node(
        &self,
        snapshot: &ClusterSnapshot,
        pod: &Pod,
        node_filter: NodeFilter,
    ) -> Option<String> {
        snapshot
            .node_infos()
            .filter(|node_info| node_filter(node_info))
            .find(|node_info| self.run_filters(pod, node_info).is_ok())
            .map(|node_info| node_info.name().to_string())
    }
}

impl SchedulerOracle for PredicateSchedulerOracle {
    fn try_schedule_pods(
        &self,
        snapshot: &mut ClusterSnapshot,
        pods: &[Pod],
        node_filter: NodeFilter,
        break_on_first_failure: bool,
    ) -> AutoscalerResult<ScheduleOutcome> {
        let mut placements = Vec::new();
        // Once a pod of a controller does not fit, its siblings will not fit either.
        let mut overflowing: BTreeSet<String> = Default::default();

        for pod in pods.iter() {
            let owner_uid = pod.controller_ref().map(|owner| owner.uid.clone());
            if let Some(uid) = owner_uid.as_ref() {
                if overflowing.contains(uid) {
                    continue;
                }
            }

            match self.find_node(snapshot, pod, node_filter) {
                Some(node_name) => {
                    snapshot.force_add_pod(pod.clone(), &node_name)?;
                    placements.push(PodPlacement {
                        pod: pod.clone(),
                        node_name,
                    });
                }
                None => {
                    debug!("Pod {:?} does not fit on any node", pod.metadata.name);
                    if let Some(uid) = owner_uid {
                        overflowing.insert(uid);
                    }
                    if break_on_first_failure {
                        break;
                    }
                }
            }
        }

        Ok(ScheduleOutcome {
            placements,
            overflowing_controllers: overflowing.len(),
        })
    }

    fn check_predicates(
        &self,
        snapshot: &ClusterSnapshot,
        pod: &Pod,
        node_name: &str,
    ) -> Result<(), ScheduleError> {
        let node_info = snapshot
            .get(node_name)
            .ok_or_else(|| ScheduleError::NodeNotFound(node_name.to_string()))?;
        self.run_filters(pod, node_info)
    }
}

#[cfg(test)]
mod tests {
    use crate::core::cluster_snapshot::ClusterSnapshot;
    use crate::core::common::OwnerReference;
    use crate::core::node::Node;
    use crate::core::pod::Pod;
    use crate::core::scheduler::interface::{all_nodes, ScheduleError, SchedulerOracle};
    use crate::core::scheduler::kube_scheduler::{KubeSchedulerProfile, PredicateSchedulerOracle};

    fn owned_pod(name: &str, cpu: i64, owner: &str) -> Pod {
        let mut pod = Pod::new(name, cpu, 100);
        pod.metadata.owner_references.push(OwnerReference {
            kind: "ReplicaSet".to_string(),
            name: owner.to_string(),
            uid: owner.to_string(),
            controller: true,
        });
        pod
    }

    #[test]
    fn test_no_nodes_no_schedule() {
        let oracle = PredicateSchedulerOracle::default();
        let mut snapshot = ClusterSnapshot::new();
        let outcome = oracle
            .try_schedule_pods(&mut snapshot, &[Pod::new("p", 1, 1)], &all_nodes, false)
            .unwrap();
        assert!(outcome.placements.is_empty());
        assert_eq!(0, outcome.overflowing_controllers);
    }

    #[test]
    fn test_first_fit_and_overflow() {
        let oracle = PredicateSchedulerOracle::default();
        let mut snapshot = ClusterSnapshot::new();
        snapshot.add_node(Node::new("node1", 1000, 10000)).unwrap();
        snapshot.add_node(Node::new("node2", 1000, 10000)).unwrap();

        let pods = vec![
            owned_pod("a1", 600, "a"),
            owned_pod("a2", 600, "a"),
            owned_pod("a3", 600, "a"),
            owned_pod("a4", 100, "a"),
            owned_pod("b1", 300, "b"),
        ];
        let outcome = oracle
            .try_schedule_pods(&mut snapshot, &pods, &all_nodes, false)
            .unwrap();

        let placed: Vec<(&str, &str)> = outcome
            .placements
            .iter()
            .map(|p| (p.pod.metadata.name.as_str(), p.node_name.as_str()))
            .collect();
        // a4 would fit but its controller already overflowed.
        assert_eq!(vec![("a1", "node1"), ("a2", "node2"), ("b1", "node1")], placed);
        assert_eq!(1, outcome.overflowing_controllers);
        assert_eq!(2, snapshot.get("node1").unwrap().pods.len());
    }

    #[test]
    fn test_break_on_first_failure() {
        let oracle = PredicateSchedulerOracle::default();
        let mut snapshot = ClusterSnapshot::new();
        snapshot.add_node(Node::new("node1", 1000, 10000)).unwrap();
        let pods = vec![Pod::new("big", 5000, 1), Pod::new("small", 1, 1)];
        let outcome = oracle
            .try_schedule_pods(&mut snapshot, &pods, &all_nodes, true)
            .unwrap();
        assert!(outcome.placements.is_empty());
    }

    #[test]
    fn test_node_filter_and_predicates() {
        let oracle = PredicateSchedulerOracle::default();
        let mut snapshot = ClusterSnapshot::new();
        snapshot.add_node(Node::new("node1", 1000, 10000)).unwrap();
        snapshot.add_node(Node::new("node2", 1000, 10000)).unwrap();
        let only_node2 = |info: &crate::core::node_info::NodeInfo| info.name() == "node2";
        let outcome = oracle
            .try_schedule_pods(&mut snapshot, &[Pod::new("p", 1, 1)], &only_node2, false)
            .unwrap();
        assert_eq!("node2", outcome.placements[0].node_name);

        assert_eq!(
            Err(ScheduleError::NodeNotFound("node3".to_string())),
            oracle.check_predicates(&snapshot, &Pod::new("p", 1, 1), "node3")
        );
        assert!(oracle
            .check_predicates(&snapshot, &Pod::new("p", 5000, 1), "node1")
            .is_err());
    }

    #[test]
    fn test_unknown_plugin_is_rejected() {
        let profile = KubeSchedulerProfile {
            filter: vec!["Nope".to_string()],
        };
        assert!(PredicateSchedulerOracle::new(profile).is_err());
    }
}
