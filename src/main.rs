//! logqbit-migrate command line
//!
//! Exit codes: 0 clean, 1 some runs failed or are missing, 2 fatal root error,
//! 130 cancelled.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use logqbit_migrate::migrate::{CancelToken, MigrationConfig, Migrator};

/// Log a progress line every this many converted runs
const PROGRESS_EVERY: usize = 100;

#[derive(Parser, Debug)]
#[command(name = "logqbit-migrate")]
#[command(about = "Migrate LabRAD data-vault folders into the logqbit run layout")]
struct Args {
    /// Root of the data vault (contains `*.dir` experiment folders)
    source_root: PathBuf,

    /// Root of the logqbit tree to create or resume
    target_root: PathBuf,

    /// Re-convert runs that are already complete
    #[arg(short, long)]
    force: bool,

    /// Only migrate experiments whose name starts with PREFIX (repeatable)
    #[arg(short, long = "experiment", value_name = "PREFIX")]
    experiments: Vec<String>,

    /// Machine name written into metadata (default: share server or host name)
    #[arg(long)]
    machine: Option<String>,

    /// Experiments processed in parallel
    #[arg(short, long, default_value = "1")]
    workers: usize,

    /// zstd level for data.parquet
    #[arg(long, default_value = "3")]
    compression_level: i32,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .compact()
        .init();

    match run(args) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(2)
        }
    }
}

fn run(args: Args) -> anyhow::Result<ExitCode> {
    let mut builder = MigrationConfig::builder(args.source_root, args.target_root)
        .force(args.force)
        .workers(args.workers)
        .compression_level(args.compression_level);
    if let Some(machine) = args.machine {
        builder = builder.machine(machine);
    }
    if !args.experiments.is_empty() {
        let prefixes = args.experiments;
        builder = builder.experiment_filter(move |name| prefixes.iter().any(|p| name.starts_with(p.as_str())));
    }

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        tracing::warn!("interrupt received, stopping after the current run");
        handler_token.cancel();
    })
    .context("failed to install Ctrl-C handler")?;

    let converted = AtomicUsize::new(0);
    let report = Migrator::new(builder.build())
        .with_cancel_token(cancel)
        .on_run_published(move |experiment, run| {
            let total = converted.fetch_add(1, Ordering::Relaxed) + 1;
            if total % PROGRESS_EVERY == 0 {
                tracing::info!(total, experiment, run, "runs converted");
            }
        })
        .run()
        .context("migration aborted")?;

    for failure in report.failures() {
        eprintln!("failed: {failure}");
    }
    for experiment in &report.experiments {
        for run in &experiment.missing {
            eprintln!("missing: {}#{run} (below watermark, rerun with --force)", experiment.name);
        }
    }
    println!("{report}");

    Ok(if report.cancelled() {
        ExitCode::from(130)
    } else if report.failed() > 0 || report.missing() > 0 {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    })
}
