//! Everything a single autoscaler iteration works with, handed to processors as one record.

use std::cell::RefCell;
use std::rc::Rc;

use crate::autoscalers::cluster_autoscaler::interface::{
    Actuator, CloudProvider, EventRecorder, ListerRegistry,
};
use crate::config::AutoscalerConfig;
use crate::core::cluster_snapshot::ClusterSnapshot;
use crate::core::scheduler::interface::SchedulerOracle;
use crate::metrics::collector::MetricsCollector;

pub struct AutoscalingContext {
    pub options: AutoscalerConfig,
    pub cloud_provider: Box<dyn CloudProvider>,
    pub listers: Box<dyn ListerRegistry>,
    pub actuator: Box<dyn Actuator>,
    pub event_recorder: Box<dyn EventRecorder>,
    pub oracle: Box<dyn SchedulerOracle>,
    /// Rebuilt from listers at the start of every iteration.
    pub snapshot: ClusterSnapshot,
    pub metrics_collector: Rc<RefCell<MetricsCollector>>,
}

impl AutoscalingContext {
    pub fn new(
        options: AutoscalerConfig,
        cloud_provider: Box<dyn CloudProvider>,
        listers: Box<dyn ListerRegistry>,
        actuator: Box<dyn Actuator>,
        event_recorder: Box<dyn EventRecorder>,
        oracle: Box<dyn SchedulerOracle>,
        metrics_collector: Rc<RefCell<MetricsCollector>>,
    ) -> Self {
        Self {
            options,
            cloud_provider,
            listers,
            actuator,
            event_recorder,
            oracle,
            snapshot: ClusterSnapshot::new(),
            metrics_collector,
        }
    }
}
