use std::collections::BTreeMap;

use crate::autoscalers::cluster_autoscaler::context::AutoscalingContext;
use crate::autoscalers::cluster_autoscaler::podlistprocessor::PodListProcessor;
use crate::core::errors::AutoscalerResult;
use crate::core::pod::Pod;

/// Keeps pods whose labels contain the configured selector.
pub struct LabelSelectorPodListProcessor {
    selector: BTreeMap<String, String>,
}

impl LabelSelectorPodListProcessor {
    pub fn new(selector: BTreeMap<String, String>) -> Self {
        Self { selector }
    }

    fn matches(&self, pod: &Pod) -> bool {
        self.selector
            .iter()
            .all(|(key, value)| pod.metadata.labels.get(key) == Some(value))
    }
}

impl PodListProcessor for LabelSelectorPodListProcessor {
    fn name(&self) -> &'static str {
        "filter-by-label-selector"
    }

    fn process(
        &mut self,
        _ctx: &mut AutoscalingContext,
        pods: Vec<Pod>,
        _now: f64,
    ) -> AutoscalerResult<Vec<Pod>> {
        Ok(pods.into_iter().filter(|pod| self.matches(pod)).collect())
    }
}
