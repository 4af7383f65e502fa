use prettytable::{row, Table};
use serde::{Deserialize, Serialize};
use std::{cell::RefCell, fs::File, io::Write, rc::Rc};

use crate::core::errors::{AutoscalerError, AutoscalerResult};
use crate::metrics::collector::MetricsCollector;

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub enum OutputFormat {
    #[default]
    JSON,
    PrettyTable,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct MetricsPrinterConfig {
    #[serde(default)]
    pub format: OutputFormat,
    pub output_file: std::path::PathBuf,
}

pub fn print_metrics(
    collector: Rc<RefCell<MetricsCollector>>,
    config: &MetricsPrinterConfig,
) -> AutoscalerResult<()> {
    let mut metrics_file = File::create(&config.output_file)?;
    let rendered = match config.format {
        OutputFormat::PrettyTable => render_pretty_table(&collector.borrow()),
        OutputFormat::JSON => render_json(&collector.borrow())?,
    };
    metrics_file.write_all(rendered.as_bytes())?;
    Ok(())
}

pub fn render_pretty_table(metrics: &MetricsCollector) -> String {
    let mut aggregated_table = Table::new();
    aggregated_table.add_row(row!["Metric", "Count"]);
    aggregated_table.add_row(row!["Scale-ups succeeded", metrics.scale_up_success]);
    aggregated_table.add_row(row!["Scale-ups failed", metrics.scale_up_failed]);
    aggregated_table.add_row(row!["Scale-downs succeeded", metrics.scale_down_success]);
    aggregated_table.add_row(row!["Scale-downs failed", metrics.scale_down_failed]);
    aggregated_table.add_row(row!["Node groups created", metrics.node_groups_created]);
    aggregated_table.add_row(row!["Node groups deleted", metrics.node_groups_deleted]);
    aggregated_table.add_row(row![
        "Overflowing controllers",
        metrics.overflowing_controllers
    ]);
    aggregated_table.add_row(row!["Quarantined pods", metrics.quarantined_pods]);
    aggregated_table.add_row(row!["Total scaled up nodes", metrics.total_scaled_up_nodes]);
    aggregated_table.add_row(row![
        "Total scaled down nodes",
        metrics.total_scaled_down_nodes
    ]);

    let stats = &metrics.filter_out_schedulable_duration_stats;
    let mut stats_table = Table::new();
    stats_table.add_row(row!["Metric", "Min", "Max", "Mean", "Variance"]);
    stats_table.add_row(row![
        "Filter out schedulable duration",
        stats.min(),
        stats.max(),
        stats.mean(),
        stats.population_variance()
    ]);

    format!("{}{}", aggregated_table, stats_table)
}

#[derive(Serialize)]
struct MetricsJSON {
    counters: Counters,
    timings: Timings,
}

#[derive(Serialize)]
struct Counters {
    scale_up_success: u64,
    scale_up_failed: u64,
    scale_down_success: u64,
    scale_down_failed: u64,
    node_groups_created: u64,
    node_groups_deleted: u64,
    overflowing_controllers: u64,
    quarantined_pods: u64,
    total_scaled_up_nodes: u64,
    total_scaled_down_nodes: u64,
}

#[derive(Serialize)]
struct Timings {
    filter_out_schedulable_duration: TimingsStats,
}

#[derive(Serialize)]
struct TimingsStats {
    min: f64,
    max: f64,
    mean: f64,
    variance: f64,
}

pub fn render_json(metrics: &MetricsCollector) -> AutoscalerResult<String> {
    let stats = &metrics.filter_out_schedulable_duration_stats;
    let metrics = MetricsJSON {
        counters: Counters {
            scale_up_success: metrics.scale_up_success,
            scale_up_failed: metrics.scale_up_failed,
            scale_down_success: metrics.scale_down_success,
            scale_down_failed: metrics.scale_down_failed,
            node_groups_created: metrics.node_groups_created,
            node_groups_deleted: metrics.node_groups_deleted,
            overflowing_controllers: metrics.overflowing_controllers,
            quarantined_pods: metrics.quarantined_pods,
            total_scaled_up_nodes: metrics.total_scaled_up_nodes,
            total_scaled_down_nodes: metrics.total_scaled_down_nodes,
        },
        timings: Timings {
            filter_out_schedulable_duration: TimingsStats {
                min: stats.min(),
                max: stats.max(),
                mean: stats.mean(),
                variance: stats.population_variance(),
            },
        },
    };

    serde_json::to_string_pretty(&metrics)
        .map_err(|err| AutoscalerError::Internal(format!("cannot serialize metrics: {}", err)))
}
