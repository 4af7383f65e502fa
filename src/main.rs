use std::cell::RefCell;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;

use clap::Parser;
use file_rotate::compression::Compression;
use file_rotate::suffix::AppendCount;
use file_rotate::{ContentLimit, FileRotate};
use log::{error, info};

use kubernetriks_autoscaler::autoscalers::cluster_autoscaler::cluster_autoscaler::ClusterAutoscaler;
use kubernetriks_autoscaler::autoscalers::cluster_autoscaler::in_memory::cluster::InMemoryCluster;
use kubernetriks_autoscaler::autoscalers::cluster_autoscaler::in_memory::in_memory_context;
use kubernetriks_autoscaler::config::AutoscalerConfig;
use kubernetriks_autoscaler::core::errors::{AutoscalerError, AutoscalerResult};
use kubernetriks_autoscaler::metrics::collector::MetricsCollector;
use kubernetriks_autoscaler::metrics::printer::print_metrics;

const LOG_FILE_MAX_BYTES: usize = 10 << 20;
const LOG_FILES_KEPT: usize = 5;

#[derive(Parser)]
struct Args {
    #[clap(short, long)]
    config_file: PathBuf,
    /// Node groups, nodes and pods of the cluster to autoscale.
    #[clap(long)]
    cluster_state_file: PathBuf,
    #[clap(short, long, default_value_t = 1)]
    iterations: usize,
}

fn init_logger(logs_filepath: Option<&String>) {
    // log level INFO by default
    let mut env_logger_builder = env_logger::builder();
    if env::var("RUST_LOG").is_err() {
        env_logger_builder.filter_level(log::LevelFilter::Info);
    }
    if let Some(path) = logs_filepath {
        let log_file = FileRotate::new(
            path,
            AppendCount::new(LOG_FILES_KEPT),
            ContentLimit::Bytes(LOG_FILE_MAX_BYTES),
            Compression::None,
            #[cfg(unix)]
            None,
        );
        env_logger_builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }
    env_logger_builder.init();
}

fn load_config(path: &PathBuf) -> AutoscalerResult<AutoscalerConfig> {
    let config_yaml = std::fs::read_to_string(path)?;
    AutoscalerConfig::from_yaml(&config_yaml)
}

fn run(args: &Args, config: AutoscalerConfig) -> AutoscalerResult<()> {
    let cluster_yaml = std::fs::read_to_string(&args.cluster_state_file)?;
    let cluster = Rc::new(RefCell::new(InMemoryCluster::from_yaml(&cluster_yaml)?));
    let metrics_collector = Rc::new(RefCell::new(MetricsCollector::new()));
    let scan_interval = config.scan_interval;
    let metrics_printer = config.metrics_printer.clone();

    let (context, _events) = in_memory_context(config, cluster.clone(), metrics_collector.clone());
    let mut autoscaler = ClusterAutoscaler::new(context)?;

    for iteration in 0..args.iterations {
        let now = iteration as f64 * scan_interval;
        let status = autoscaler.run_once(now)?;
        for action in status.actions() {
            info!("Iteration {} at {:.1}s: {:?}", iteration, now, action);
        }
        info!(
            "Iteration {} done: {} pending pod(s), {} node(s) in cluster",
            iteration,
            status.pending_pods,
            cluster.borrow().nodes.len()
        );
    }
    autoscaler.shutdown()?;

    if let Some(printer_config) = metrics_printer {
        print_metrics(metrics_collector, &printer_config)?;
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    let config = load_config(&args.config_file);
    init_logger(
        config
            .as_ref()
            .ok()
            .and_then(|config| config.logs_filepath.as_ref()),
    );

    let config = match config {
        Ok(config) => config,
        Err(err) => {
            error!("Could not load config {:?}: {}", args.config_file, err);
            return ExitCode::FAILURE;
        }
    };
    info!("Config file: {:?}", args.config_file);
    info!("Cluster state file: {:?}", args.cluster_state_file);

    match run(&args, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err @ AutoscalerError::Configuration(_)) => {
            error!("Invalid input: {}", err);
            ExitCode::FAILURE
        }
        Err(err) => {
            error!("Autoscaler stopped: {}", err);
            ExitCode::FAILURE
        }
    }
}
