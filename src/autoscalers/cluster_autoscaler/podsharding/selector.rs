//! Least-recently-used shard selection.
//!
//! Unseen shards get the next counter value when first observed, so they are picked in order
//! of first sighting; a picked shard moves to the back. Every shard is picked within `N`
//! iterations, `N` being the number of distinct shards observed.

use std::collections::HashMap;

use crate::autoscalers::cluster_autoscaler::podsharding::descriptor::PodShard;

pub trait PodShardSelector {
    /// Shard to scale up for in this iteration, without recording the choice.
    fn choose_pod_shard<'a>(&mut self, shards: &'a [PodShard]) -> Option<&'a PodShard>;

    /// Records that the iteration's decision was made for `shard`.
    fn mark_used(&mut self, shard: &PodShard);

    fn select_pod_shard<'a>(&mut self, shards: &'a [PodShard]) -> Option<&'a PodShard> {
        let selected = self.choose_pod_shard(shards)?;
        self.mark_used(selected);
        Some(selected)
    }
}

#[derive(Default)]
pub struct LruPodShardSelector {
    counter: u64,
    last_used: HashMap<String, u64>,
}

impl LruPodShardSelector {
    pub fn new() -> Self {
        Default::default()
    }
}

impl PodShardSelector for LruPodShardSelector {
    fn choose_pod_shard<'a>(&mut self, shards: &'a [PodShard]) -> Option<&'a PodShard> {
        let mut best: Option<(u64, String, &PodShard)> = None;
        for shard in shards.iter() {
            let signature = shard.signature();
            let value = match self.last_used.get(&signature) {
                Some(value) => *value,
                None => {
                    self.counter += 1;
                    self.last_used.insert(signature.clone(), self.counter);
                    self.counter
                }
            };
            let better = match best.as_ref() {
                None => true,
                Some((best_value, best_signature, _)) => {
                    (value, &signature) < (*best_value, best_signature)
                }
            };
            if better {
                best = Some((value, signature, shard));
            }
        }
        best.map(|(_, _, shard)| shard)
    }

    fn mark_used(&mut self, shard: &PodShard) {
        self.counter += 1;
        self.last_used.insert(shard.signature(), self.counter);
    }
}

#[cfg(test)]
mod tests {
    use crate::autoscalers::cluster_autoscaler::podsharding::descriptor::{
        NodeGroupDescriptor, PodShard,
    };
    use crate::autoscalers::cluster_autoscaler::podsharding::selector::{
        LruPodShardSelector, PodShardSelector,
    };

    fn shard(zone: &str) -> PodShard {
        let mut descriptor = NodeGroupDescriptor::default();
        descriptor.labels.insert("zone".to_string(), zone.to_string());
        PodShard {
            descriptor,
            pod_uids: [zone.to_string()].into(),
        }
    }

    #[test]
    fn test_round_robin_in_first_sighting_order() {
        // Sighting order differs from signature order.
        let shards = vec![shard("c"), shard("a"), shard("b")];
        let mut selector = LruPodShardSelector::new();
        let picked: Vec<String> = (0..6)
            .map(|_| {
                selector.select_pod_shard(&shards).unwrap().descriptor.labels["zone"].clone()
            })
            .collect();
        assert_eq!(vec!["c", "a", "b", "c", "a", "b"], picked);
    }

    #[test]
    fn test_choice_without_mark_is_repeated() {
        let shards = vec![shard("a"), shard("b")];
        let mut selector = LruPodShardSelector::new();
        let first = selector.choose_pod_shard(&shards).unwrap().clone();
        let again = selector.choose_pod_shard(&shards).unwrap().clone();
        assert_eq!(first, again);
        selector.mark_used(&first);
        assert_eq!(shards[1], *selector.choose_pod_shard(&shards).unwrap());
        assert!(selector.choose_pod_shard(&[]).is_none());
    }
}
