//! Config fields definitions for the cluster autoscaler.
//!
//! All durations and timestamps are seconds with fractional part.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use regex::Regex;
use serde::Deserialize;

use crate::autoscalers::cluster_autoscaler::interface::NodeGroupAutoscalingOptions;
use crate::autoscalers::cluster_autoscaler::scaleup::expander::KNOWN_EXPANDERS;
use crate::core::common::ResourceList;
use crate::core::errors::{AutoscalerError, AutoscalerResult};
use crate::metrics::printer::MetricsPrinterConfig;

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct AutoscalerConfig {
    #[serde(default = "scan_interval_default")]
    pub scan_interval: f64,
    #[serde(default = "scale_down_enabled_default")]
    pub scale_down_enabled: bool,
    /// How long after a scale-up of a group its nodes are not considered for removal.
    #[serde(default = "scale_down_delay_default")]
    pub scale_down_delay_after_add: f64,
    #[serde(default = "scale_down_delay_default")]
    pub scale_down_delay_after_delete: f64,
    #[serde(default = "scale_down_delay_after_failure_default")]
    pub scale_down_delay_after_failure: f64,
    /// How long a node should be unneeded before it is removed.
    #[serde(default = "scale_down_unneeded_time_default")]
    pub scale_down_unneeded_time: f64,
    /// Fraction in interval [0, 1]. Nodes with utilization below it may be scaled down.
    #[serde(default = "scale_down_utilization_threshold_default")]
    pub scale_down_utilization_threshold: f64,
    #[serde(default = "scale_down_non_empty_candidates_count_default")]
    pub scale_down_non_empty_candidates_count: usize,
    #[serde(default = "max_scale_down_parallelism_default")]
    pub max_scale_down_parallelism: usize,
    #[serde(default = "max_empty_bulk_delete_default")]
    pub max_empty_bulk_delete: usize,
    /// Pods with priority below the cutoff never trigger scale-up.
    #[serde(default)]
    pub expendable_pods_priority_cutoff: i32,
    // Zero means unlimited for the three totals below.
    #[serde(default)]
    pub max_nodes_total: usize,
    /// In cores.
    #[serde(default)]
    pub max_cores_total: i64,
    /// In bytes.
    #[serde(default)]
    pub max_memory_total: i64,
    /// Additional quotas applying to nodes matching a label selector.
    #[serde(default)]
    pub quotas: Vec<QuotaConfig>,
    #[serde(default)]
    pub node_autoprovisioning_enabled: bool,
    #[serde(default = "max_autoprovisioned_node_group_count_default")]
    pub max_autoprovisioned_node_group_count: usize,
    #[serde(default)]
    pub async_node_group_creation: bool,
    /// Expander names separated by commas, applied in order.
    #[serde(default = "expander_default")]
    pub expander: String,
    /// Priority to the list of regular expressions matching node group ids.
    #[serde(default)]
    pub priority_expander_config: BTreeMap<i32, Vec<String>>,
    #[serde(default)]
    pub pod_label_selector: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub new_pod_scale_up_delay: f64,
    #[serde(default = "node_group_backoff_duration_default")]
    pub node_group_backoff_duration: f64,
    #[serde(default)]
    pub node_group_defaults: NodeGroupDefaultsConfig,
    #[serde(default)]
    pub dynamic_resource_allocation_enabled: bool,
    #[serde(default)]
    pub csi_node_aware_scheduling_enabled: bool,
    #[serde(default)]
    pub long_pending: LongPendingConfig,
    /// Wall-clock seconds scale-up may spend evaluating node groups in one iteration, zero for
    /// no limit.
    #[serde(default = "max_iteration_time_default")]
    pub max_iteration_time: f64,
    /// Seed for quarantine jitter and the random expander.
    #[serde(default)]
    pub seed: u64,
    /// If not set default output of logs is stdout/stderr
    pub logs_filepath: Option<String>,
    pub metrics_printer: Option<MetricsPrinterConfig>,
}

#[derive(Clone, Default, Debug, Deserialize, PartialEq)]
pub struct NodeGroupDefaultsConfig {
    #[serde(default)]
    pub zero_or_max_node_scaling: bool,
}

#[derive(Clone, Default, Debug, Deserialize, PartialEq)]
pub struct QuotaConfig {
    pub id: String,
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    pub limits: ResourceList,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct LongPendingConfig {
    #[serde(default = "min_attempts_default")]
    pub min_attempts: u32,
    #[serde(default = "delay_factor_default")]
    pub delay_factor: f64,
    #[serde(default = "cooldown_default")]
    pub cooldown: f64,
    /// Workloads which got a new pod within this period are never quarantined.
    #[serde(default = "cutoff_default")]
    pub cutoff: f64,
    /// Back-off growth per attempt over `min_attempts`.
    #[serde(default = "step_default")]
    pub step: f64,
}

impl Default for LongPendingConfig {
    fn default() -> Self {
        Self {
            min_attempts: min_attempts_default(),
            delay_factor: delay_factor_default(),
            cooldown: cooldown_default(),
            cutoff: cutoff_default(),
            step: step_default(),
        }
    }
}

impl Default for AutoscalerConfig {
    fn default() -> Self {
        Self {
            scan_interval: scan_interval_default(),
            scale_down_enabled: scale_down_enabled_default(),
            scale_down_delay_after_add: scale_down_delay_default(),
            scale_down_delay_after_delete: scale_down_delay_default(),
            scale_down_delay_after_failure: scale_down_delay_after_failure_default(),
            scale_down_unneeded_time: scale_down_unneeded_time_default(),
            scale_down_utilization_threshold: scale_down_utilization_threshold_default(),
            scale_down_non_empty_candidates_count: scale_down_non_empty_candidates_count_default(
            ),
            max_scale_down_parallelism: max_scale_down_parallelism_default(),
            max_empty_bulk_delete: max_empty_bulk_delete_default(),
            expendable_pods_priority_cutoff: 0,
            max_nodes_total: 0,
            max_cores_total: 0,
            max_memory_total: 0,
            quotas: Default::default(),
            node_autoprovisioning_enabled: false,
            max_autoprovisioned_node_group_count: max_autoprovisioned_node_group_count_default(),
            async_node_group_creation: false,
            expander: expander_default(),
            priority_expander_config: Default::default(),
            pod_label_selector: None,
            new_pod_scale_up_delay: 0.0,
            node_group_backoff_duration: node_group_backoff_duration_default(),
            node_group_defaults: Default::default(),
            dynamic_resource_allocation_enabled: false,
            csi_node_aware_scheduling_enabled: false,
            long_pending: Default::default(),
            max_iteration_time: max_iteration_time_default(),
            seed: 0,
            logs_filepath: None,
            metrics_printer: None,
        }
    }
}

fn scan_interval_default() -> f64 {
    10.0 // 10 seconds
}
fn scale_down_enabled_default() -> bool {
    true
}
fn scale_down_delay_default() -> f64 {
    600.0 // 10 minutes
}
fn scale_down_delay_after_failure_default() -> f64 {
    180.0 // 3 minutes
}
fn scale_down_unneeded_time_default() -> f64 {
    600.0
}
fn scale_down_utilization_threshold_default() -> f64 {
    0.5
}
fn scale_down_non_empty_candidates_count_default() -> usize {
    30
}
fn max_scale_down_parallelism_default() -> usize {
    10
}
fn max_empty_bulk_delete_default() -> usize {
    10
}
fn max_autoprovisioned_node_group_count_default() -> usize {
    15
}
fn expander_default() -> String {
    "random".to_string()
}
fn node_group_backoff_duration_default() -> f64 {
    300.0
}
fn max_iteration_time_default() -> f64 {
    300.0
}
fn min_attempts_default() -> u32 {
    2
}
fn delay_factor_default() -> f64 {
    3.0
}
fn cooldown_default() -> f64 {
    600.0
}
fn cutoff_default() -> f64 {
    7200.0 // 2 hours
}
fn step_default() -> f64 {
    120.0
}

impl AutoscalerConfig {
    pub fn from_yaml(yaml: &str) -> AutoscalerResult<Self> {
        let config: AutoscalerConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AutoscalerResult<()> {
        if !(0.0..=1.0).contains(&self.scale_down_utilization_threshold) {
            return Err(AutoscalerError::Configuration(format!(
                "scale_down_utilization_threshold must be in [0, 1], got {}",
                self.scale_down_utilization_threshold
            )));
        }
        if self.scan_interval <= 0.0 {
            return Err(AutoscalerError::Configuration(
                "scan_interval must be positive".to_string(),
            ));
        }
        for name in self.expander_names() {
            if !KNOWN_EXPANDERS.contains(&name.as_str()) {
                return Err(AutoscalerError::Configuration(format!(
                    "unknown expander {:?}",
                    name
                )));
            }
        }
        for patterns in self.priority_expander_config.values() {
            for pattern in patterns.iter() {
                Regex::new(pattern).map_err(|err| {
                    AutoscalerError::Configuration(format!(
                        "invalid priority expander regex {:?}: {}",
                        pattern, err
                    ))
                })?;
            }
        }
        if self.max_iteration_time < 0.0 {
            return Err(AutoscalerError::Configuration(
                "max_iteration_time must not be negative".to_string(),
            ));
        }
        if self.long_pending.min_attempts == 0 {
            return Err(AutoscalerError::Configuration(
                "long_pending.min_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn expander_names(&self) -> Vec<String> {
        self.expander
            .split(',')
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect()
    }

    /// Point in time an iteration starting at `start` should be done by.
    pub fn iteration_deadline(&self, start: Instant) -> Option<Instant> {
        if self.max_iteration_time > 0.0 {
            Some(start + Duration::from_secs_f64(self.max_iteration_time))
        } else {
            None
        }
    }

    /// Options node groups fall back to when they do not override them.
    pub fn node_group_defaults(&self) -> NodeGroupAutoscalingOptions {
        NodeGroupAutoscalingOptions {
            scale_down_utilization_threshold: self.scale_down_utilization_threshold,
            scale_down_unneeded_time: self.scale_down_unneeded_time,
            zero_or_max_node_scaling: self.node_group_defaults.zero_or_max_node_scaling,
        }
    }
}
