//! CLI entry point for the mediaforge daemon.
//!
//! Loads configuration, wires the job manager and scanner together, and runs
//! until interrupted.

use clap::Parser;
use log::{error, info, warn, LevelFilter};
use mediaforge_daemon::{Config, JobManager, Scanner, ScannerConfig};
use std::path::PathBuf;
use std::process::ExitCode;

/// mediaforge - self-hosted media transcoding service
#[derive(Parser, Debug)]
#[command(name = "mediaforged")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "/data/config.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let mut builder = env_logger::builder();
    builder.format_timestamp_secs();
    if verbose {
        builder.filter_level(LevelFilter::Debug);
    } else {
        builder.filter_level(LevelFilter::Info);
    }
    builder.init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = match Config::load_or_default(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!(
        "mediaforge starting (source: {}, dest: {}, workers: {})",
        config.paths.source_dir.display(),
        config.paths.dest_dir.display(),
        config.jobs.max_concurrent
    );

    if let Err(e) = std::fs::create_dir_all(&config.paths.data_dir) {
        error!(
            "Failed to create data directory {}: {}",
            config.paths.data_dir.display(),
            e
        );
        return ExitCode::FAILURE;
    }

    // AI backends are wired in by the embedding application; the daemon
    // itself runs every pipeline without one.
    if config.premium && !config.ai.provider.is_empty() && config.ai.provider != "none" {
        warn!(
            "AI provider '{}' configured but no backend is linked into this binary",
            config.ai.provider
        );
    }

    let manager = JobManager::new(&config, None, config.jobs_file()).await;

    let scanner = match Scanner::new(ScannerConfig::from_service_config(&config), manager.clone())
    {
        Ok(scanner) => scanner,
        Err(e) => {
            error!("Failed to initialize scanner: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Finished jobs enrich the scanner's processed records
    {
        let scanner = scanner.clone();
        manager.set_on_complete(Box::new(move |job| scanner.on_job_complete(job)));
    }

    manager.start();
    manager.requeue_pending_jobs().await;

    if let Err(e) = scanner.start().await {
        error!("Scanner failed to start: {}", e);
        return ExitCode::FAILURE;
    }

    if tokio::signal::ctrl_c().await.is_err() {
        error!("Failed to listen for shutdown signal");
        return ExitCode::FAILURE;
    }

    info!("Shutting down");
    scanner.stop().await;
    manager.stop().await;

    ExitCode::SUCCESS
}
