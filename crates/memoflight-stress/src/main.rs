//! Replays workloads against coalescing caches, and reports how many computations they needed.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use memoflight_service::config::Config;
use memoflight_service::{logging, metrics};

use crate::workloads::WorkloadsConfig;

mod stresstest;
mod workloads;

/// Command line interface parser.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Path to the workload definition file.
    ///
    /// Runs the built-in workloads if omitted.
    #[arg(long, short, value_name = "FILE")]
    workloads: Option<PathBuf>,
}

fn main() {
    match execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}

fn execute() -> Result<()> {
    let cli = Cli::parse();

    // parse configs
    let config = Config::get(cli.config.as_deref()).context("failed loading config")?;
    let workloads = match cli.workloads {
        Some(path) => WorkloadsConfig::get(&path)?,
        None => WorkloadsConfig::default(),
    };

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        traces_sample_rate: 1.0,
        ..Default::default()
    });

    // SAFETY: The runtime is not started yet, so we are still single-threaded.
    unsafe { logging::init_logging(&config.logging) };
    if let Some(ref statsd) = config.metrics.statsd {
        metrics::configure_statsd(
            &config.metrics.prefix,
            statsd.as_str(),
            config.metrics.custom_tags.clone(),
        )?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;
    let reports = runtime.block_on(stresstest::perform_stresstest(config.cache, workloads))?;

    for report in reports {
        println!("{report}");
        if let Some(latencies) = report.latencies() {
            println!("{latencies}");
        }
    }

    Ok(())
}
