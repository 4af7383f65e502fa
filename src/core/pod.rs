//! Type definition for Pod primitive as seen by the autoscaler.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::common::{
    add_resources, ObjectMeta, OwnerReference, ResourceList, Toleration, RESOURCE_CPU,
    RESOURCE_MEMORY,
};

/// Pod templates with this annotation set to `true` act as extra DaemonSets in simulations.
pub const DAEMONSET_POD_ANNOTATION: &str = "cluster-autoscaler.kubernetes.io/daemonset-pod";
pub const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";
pub const CONFIG_SOURCE_ANNOTATION: &str = "kubernetes.io/config.source";
/// Pods may request a specific provisioning class for the node groups created for them.
pub const PROVISIONING_CLASS_ANNOTATION: &str =
    "autoscaling.x-k8s.io/provisioning-class-name";

pub const DAEMONSET_KIND: &str = "DaemonSet";

#[derive(Default, Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct Container {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub requests: ResourceList,
}

#[derive(Default, Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct PodSpec {
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
    #[serde(default)]
    pub priority: i32,
    /// Name of the node the pod is bound to, empty for pending pods.
    #[serde(default)]
    pub node_name: String,
}

#[derive(Default, Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct PodStatus {
    /// Set by the scheduler when the pod waits for a preemption on that node.
    #[serde(default)]
    pub nominated_node_name: String,
}

#[derive(Default, Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct Pod {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PodSpec,
    #[serde(default)]
    pub status: PodStatus,
}

impl Pod {
    /// Single-container pod requesting `cpu` millicores and `ram` bytes.
    pub fn new(name: &str, cpu: i64, ram: i64) -> Self {
        Self {
            metadata: ObjectMeta::new(name),
            spec: PodSpec {
                containers: vec![Container {
                    name: "main".to_string(),
                    requests: ResourceList::from([
                        (RESOURCE_CPU.to_string(), cpu),
                        (RESOURCE_MEMORY.to_string(), ram),
                    ]),
                }],
                ..Default::default()
            },
            status: Default::default(),
        }
    }

    pub fn uid(&self) -> &str {
        &self.metadata.uid
    }

    /// Sum of container requests.
    pub fn requests(&self) -> ResourceList {
        let mut total = ResourceList::new();
        for container in self.spec.containers.iter() {
            add_resources(&mut total, &container.requests);
        }
        total
    }

    pub fn controller_ref(&self) -> Option<&OwnerReference> {
        self.metadata.controller_ref()
    }

    /// Uid of the managing controller or the pod uid for standalone pods.
    pub fn controller_uid(&self) -> &str {
        match self.controller_ref() {
            Some(owner) => &owner.uid,
            None => &self.metadata.uid,
        }
    }

    pub fn is_daemonset_pod(&self) -> bool {
        if let Some(owner) = self.controller_ref() {
            return owner.kind == DAEMONSET_KIND;
        }
        self.metadata.has_annotation(DAEMONSET_POD_ANNOTATION, "true")
    }

    pub fn is_mirror_pod(&self) -> bool {
        self.metadata.annotations.contains_key(MIRROR_POD_ANNOTATION)
    }

    pub fn is_static_pod(&self) -> bool {
        match self.metadata.annotations.get(CONFIG_SOURCE_ANNOTATION) {
            Some(source) => source != "api",
            None => false,
        }
    }

    pub fn is_marked_for_deletion(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Pod will be recreated elsewhere by its controller once evicted.
    pub fn is_recreatable(&self) -> bool {
        self.controller_ref().is_some()
            && !self.is_daemonset_pod()
            && !self.is_mirror_pod()
            && !self.is_static_pod()
    }
}

#[cfg(test)]
mod tests {
    use crate::core::common::{OwnerReference, RESOURCE_CPU, RESOURCE_MEMORY};
    use crate::core::pod::{Container, Pod, DAEMONSET_KIND, MIRROR_POD_ANNOTATION};

    #[test]
    fn test_requests_are_summed_over_containers() {
        let mut pod = Pod::new("p", 500, 1024);
        pod.spec.containers.push(Container {
            name: "sidecar".to_string(),
            requests: [(RESOURCE_CPU.to_string(), 100)].into(),
        });
        let requests = pod.requests();
        assert_eq!(600, requests[RESOURCE_CPU]);
        assert_eq!(1024, requests[RESOURCE_MEMORY]);
    }

    #[test]
    fn test_recreatable_pods() {
        let mut pod = Pod::new("p", 1, 1);
        assert!(!pod.is_recreatable());
        assert_eq!("p", pod.controller_uid());

        pod.metadata.owner_references.push(OwnerReference {
            kind: "ReplicaSet".to_string(),
            name: "rs".to_string(),
            uid: "rs-uid".to_string(),
            controller: true,
        });
        assert!(pod.is_recreatable());
        assert_eq!("rs-uid", pod.controller_uid());

        pod.metadata
            .annotations
            .insert(MIRROR_POD_ANNOTATION.to_string(), "x".to_string());
        assert!(!pod.is_recreatable());

        let mut ds_pod = Pod::new("ds", 1, 1);
        ds_pod.metadata.owner_references.push(OwnerReference {
            kind: DAEMONSET_KIND.to_string(),
            name: "ds".to_string(),
            uid: "ds-uid".to_string(),
            controller: true,
        });
        assert!(ds_pod.is_daemonset_pod());
        assert!(!ds_pod.is_recreatable());
    }
}
