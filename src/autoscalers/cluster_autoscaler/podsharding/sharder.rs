use std::collections::HashMap;

use crate::autoscalers::cluster_autoscaler::podsharding::descriptor::{
    NodeGroupDescriptor, PodShard,
};
use crate::core::common::{Taint, RESOURCE_CPU, RESOURCE_MEMORY, RESOURCE_PODS};
use crate::core::pod::{Pod, PROVISIONING_CLASS_ANNOTATION};

/// Contributes one feature of a pod to the descriptor of its shard.
pub struct FeatureShardComputeFunction {
    pub feature_name: String,
    pub compute: fn(&Pod, &mut NodeGroupDescriptor),
}

pub trait PodSharder {
    /// Shards in the order their first pod appears in `pods`.
    fn compute_pod_shards(&self, pods: &[Pod]) -> Vec<PodShard>;
}

pub struct CompositePodSharder {
    functions: Vec<FeatureShardComputeFunction>,
}

impl CompositePodSharder {
    pub fn new(functions: Vec<FeatureShardComputeFunction>) -> Self {
        Self { functions }
    }
}

impl Default for CompositePodSharder {
    fn default() -> Self {
        Self::new(default_feature_functions())
    }
}

impl PodSharder for CompositePodSharder {
    fn compute_pod_shards(&self, pods: &[Pod]) -> Vec<PodShard> {
        let mut shards: Vec<PodShard> = vec![];
        let mut index_by_signature: HashMap<String, usize> = Default::default();

        for pod in pods.iter() {
            let mut descriptor = NodeGroupDescriptor::default();
            for function in self.functions.iter() {
                (function.compute)(pod, &mut descriptor);
            }
            let signature = descriptor.signature();
            match index_by_signature.get(&signature) {
                Some(idx) => {
                    shards[*idx].pod_uids.insert(pod.uid().to_string());
                }
                None => {
                    index_by_signature.insert(signature, shards.len());
                    shards.push(PodShard {
                        descriptor,
                        pod_uids: [pod.uid().to_string()].into(),
                    });
                }
            }
        }
        shards
    }
}

pub fn default_feature_functions() -> Vec<FeatureShardComputeFunction> {
    vec![
        FeatureShardComputeFunction {
            feature_name: "labels".to_string(),
            compute: label_selector_feature,
        },
        FeatureShardComputeFunction {
            feature_name: "taints".to_string(),
            compute: toleration_feature,
        },
        FeatureShardComputeFunction {
            feature_name: "extra-resources".to_string(),
            compute: extra_resources_feature,
        },
        FeatureShardComputeFunction {
            feature_name: "provisioning-class".to_string(),
            compute: provisioning_class_feature,
        },
    ]
}

// Node selector terms become labels of the node group.
fn label_selector_feature(pod: &Pod, descriptor: &mut NodeGroupDescriptor) {
    for (key, value) in pod.spec.node_selector.iter() {
        descriptor.labels.insert(key.clone(), value.clone());
    }
}

// Tolerations with a concrete key and value become taints the group may carry.
fn toleration_feature(pod: &Pod, descriptor: &mut NodeGroupDescriptor) {
    for toleration in pod.spec.tolerations.iter() {
        if toleration.key.is_empty() || toleration.value.is_empty() {
            continue;
        }
        if let Some(effect) = toleration.effect {
            descriptor.taints.insert(Taint {
                key: toleration.key.clone(),
                value: toleration.value.clone(),
                effect,
            });
        }
    }
}

fn extra_resources_feature(pod: &Pod, descriptor: &mut NodeGroupDescriptor) {
    for (name, quantity) in pod.requests().into_iter() {
        if name == RESOURCE_CPU || name == RESOURCE_MEMORY || name == RESOURCE_PODS {
            continue;
        }
        if quantity <= 0 {
            continue;
        }
        let current = descriptor.extra_resources.entry(name).or_insert(0);
        *current = i64::max(*current, quantity);
    }
}

fn provisioning_class_feature(pod: &Pod, descriptor: &mut NodeGroupDescriptor) {
    if let Some(class) = pod.metadata.annotations.get(PROVISIONING_CLASS_ANNOTATION) {
        descriptor.provisioning_class_name = class.clone();
    }
}
