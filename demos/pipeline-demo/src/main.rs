//! A minimal, runnable instantiation of the runtime stack: a file-system
//! input queue, an upper-casing handler, a file-system (optionally
//! message-store-backed) output queue, run either in-process or as
//! `instance_count` supervised worker processes.

mod config;
mod factory;
mod handler;
mod output;
mod service;

use tracing::info;

use runtime_service::BaseService;
use runtime_supervisor::{is_worker_process, run_worker, MultiProcessSupervisor};

use crate::factory::PipelineDemoFactory;
use crate::service::PipelineDemoService;

const DEFAULT_CONFIG_PATH: &str = "pipeline-demo.toml";

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_owned());
    let config = match config::load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: failed to load config '{}': {}", config_path, e);
            std::process::exit(1);
        }
    };

    if is_worker_process() {
        run_worker(&PipelineDemoFactory::new(config));
    }

    info!(version = env!("CARGO_PKG_VERSION"), "pipeline-demo starting");

    let result = match &config.supervisor {
        Some(supervisor_config) if supervisor_config.instance_count > 1 => {
            info!(instances = supervisor_config.instance_count, "running under supervisor");
            let mut supervisor = MultiProcessSupervisor::new(
                supervisor_config.instance_count,
                supervisor_config.shutdown_timeout,
                supervisor_config.live_check_interval,
                supervisor_config.live_check_timeout,
                supervisor_config.restart_on_failure,
            );
            supervisor.start()
        }
        _ => {
            let mut service = PipelineDemoService::new(&config);
            service.start()
        }
    };

    if let Err(e) = result {
        eprintln!("FATAL: {}", e);
        std::process::exit(1);
    }
}

