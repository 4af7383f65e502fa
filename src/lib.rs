pub mod autoscalers;
pub mod config;
pub mod core;
pub mod metrics;
pub mod test_util;
