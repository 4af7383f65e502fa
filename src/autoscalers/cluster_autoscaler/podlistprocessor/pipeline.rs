use log::debug;

use crate::autoscalers::cluster_autoscaler::context::AutoscalingContext;
use crate::autoscalers::cluster_autoscaler::podlistprocessor::clear_tpu::ClearTpuRequestsPodListProcessor;
use crate::autoscalers::cluster_autoscaler::podlistprocessor::currently_drained::CurrentlyDrainedNodesPodListProcessor;
use crate::autoscalers::cluster_autoscaler::podlistprocessor::daemonset::FilterOutDaemonSetPodListProcessor;
use crate::autoscalers::cluster_autoscaler::podlistprocessor::expendable::FilterOutExpendablePodListProcessor;
use crate::autoscalers::cluster_autoscaler::podlistprocessor::filter_out_schedulable::FilterOutSchedulablePodListProcessor;
use crate::autoscalers::cluster_autoscaler::podlistprocessor::label_selector::LabelSelectorPodListProcessor;
use crate::autoscalers::cluster_autoscaler::podlistprocessor::long_pending::{
    random_jitter, Jitter, LongPendingPodListProcessor,
};
use crate::autoscalers::cluster_autoscaler::podlistprocessor::new_pod_delay::NewPodScaleUpDelayPodListProcessor;
use crate::autoscalers::cluster_autoscaler::podlistprocessor::PodListProcessor;
use crate::config::AutoscalerConfig;
use crate::core::errors::AutoscalerResult;
use crate::core::pod::Pod;

/// Runs processors in order, each on the output of the previous one.
pub struct CompositePodListProcessor {
    processors: Vec<Box<dyn PodListProcessor>>,
}

impl CompositePodListProcessor {
    pub fn new(processors: Vec<Box<dyn PodListProcessor>>) -> Self {
        Self { processors }
    }

    /// Default pipeline for `config` with seeded quarantine jitter.
    pub fn from_config(config: &AutoscalerConfig) -> Self {
        Self::with_jitter(config, random_jitter(config.seed))
    }

    pub fn with_jitter(config: &AutoscalerConfig, jitter: Jitter) -> Self {
        let mut processors: Vec<Box<dyn PodListProcessor>> = vec![
            Box::new(ClearTpuRequestsPodListProcessor::default()),
            Box::new(CurrentlyDrainedNodesPodListProcessor::default()),
            Box::new(FilterOutExpendablePodListProcessor::default()),
            Box::new(FilterOutDaemonSetPodListProcessor::default()),
        ];
        if let Some(selector) = config.pod_label_selector.as_ref() {
            processors.push(Box::new(LabelSelectorPodListProcessor::new(
                selector.clone(),
            )));
        }
        processors.push(Box::new(LongPendingPodListProcessor::new(
            config.long_pending.clone(),
            jitter,
        )));
        processors.push(Box::new(NewPodScaleUpDelayPodListProcessor::default()));
        processors.push(Box::new(FilterOutSchedulablePodListProcessor::new()));
        Self::new(processors)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.processors.iter().map(|p| p.name()).collect()
    }
}

impl PodListProcessor for CompositePodListProcessor {
    fn name(&self) -> &'static str {
        "composite"
    }

    fn process(
        &mut self,
        ctx: &mut AutoscalingContext,
        mut pods: Vec<Pod>,
        now: f64,
    ) -> AutoscalerResult<Vec<Pod>> {
        for processor in self.processors.iter_mut() {
            let before = pods.len();
            pods = processor.process(ctx, pods, now)?;
            debug!(
                "Pod list processor {}: {} -> {} pods",
                processor.name(),
                before,
                pods.len()
            );
        }
        Ok(pods)
    }

    fn clean_up(&mut self) {
        for processor in self.processors.iter_mut() {
            processor.clean_up();
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::autoscalers::cluster_autoscaler::podlistprocessor::pipeline::CompositePodListProcessor;
    use crate::config::AutoscalerConfig;

    #[test]
    fn test_stage_order() {
        let mut config = AutoscalerConfig::default();
        assert_eq!(
            vec![
                "clear-tpu-requests",
                "currently-drained-nodes",
                "filter-out-expendable",
                "filter-out-daemonset",
                "long-pending-quarantine",
                "new-pod-scale-up-delay",
                "filter-out-schedulable",
            ],
            CompositePodListProcessor::from_config(&config).names()
        );

        config.pod_label_selector = Some([("team".to_string(), "a".to_string())].into());
        let names = CompositePodListProcessor::from_config(&config).names();
        assert_eq!("filter-by-label-selector", names[4]);
    }
}
