//! Scale-up: choose a node group for pending pods and grow it within quotas.

pub mod estimator;
pub mod expander;
pub mod orchestrator;
