//! In-memory implementations of the autoscaler collaborators, all backed by one shared
//! [`cluster::InMemoryCluster`].

pub mod actuator;
pub mod cloud_provider;
pub mod cluster;
pub mod events;
pub mod listers;

use std::cell::RefCell;
use std::rc::Rc;

use crate::autoscalers::cluster_autoscaler::context::AutoscalingContext;
use crate::autoscalers::cluster_autoscaler::interface::Event;
use crate::config::AutoscalerConfig;
use crate::core::scheduler::kube_scheduler::PredicateSchedulerOracle;
use crate::metrics::collector::MetricsCollector;

use actuator::InMemoryActuator;
use cloud_provider::InMemoryCloudProvider;
use cluster::InMemoryCluster;
use events::InMemoryEventRecorder;
use listers::InMemoryListerRegistry;

/// Builds a context whose collaborators all operate on `cluster`. Also returns the list the
/// event recorder appends to.
pub fn in_memory_context(
    config: AutoscalerConfig,
    cluster: Rc<RefCell<InMemoryCluster>>,
    metrics_collector: Rc<RefCell<MetricsCollector>>,
) -> (AutoscalingContext, Rc<RefCell<Vec<Event>>>) {
    let events = Rc::new(RefCell::new(Vec::new()));
    let context = AutoscalingContext::new(
        config,
        Box::new(InMemoryCloudProvider::new(cluster.clone())),
        Box::new(InMemoryListerRegistry::new(cluster.clone())),
        Box::new(InMemoryActuator::new(cluster)),
        Box::new(InMemoryEventRecorder::new(events.clone())),
        Box::new(PredicateSchedulerOracle::default()),
        metrics_collector,
    );
    (context, events)
}
