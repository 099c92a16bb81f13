//! `pqvisor` command line.
//!
//! ```text
//! pqvisor run --config <path> [--dry-run] [--verbose]
//! ```
//!
//! Exit codes: 0 all completed, 1 creation gave up, 2 sessions failed,
//! 3 both, 4 invalid configuration or runtime error.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use pqvisor::{
    Blueprint, ExitCode, LogWriter, ModeConfig, Orchestrator, OrchestratorConfig, ProcessClient,
    RunConfig, Subscribe,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(
    name = "pqvisor",
    version,
    about = "Runs one remote session per (date, partition) with bounded concurrency"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run every task described by a configuration file.
    Run(RunArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Path to the YAML run configuration.
    #[arg(long, short)]
    config: PathBuf,

    /// Validate the configuration and print the plan without creating sessions.
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Debug-level logging (overrides `RUST_LOG`).
    #[arg(long, short, default_value_t = false)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::Error.into()
            } else {
                std::process::ExitCode::SUCCESS
            };
        }
    };

    match cli.command {
        Command::Run(args) => {
            init_tracing(args.verbose);
            match run(args).await {
                Ok(code) => code.into(),
                Err(e) => {
                    error!("{e:#}");
                    ExitCode::Error.into()
                }
            }
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("pqvisor=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pqvisor=info"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(args: RunArgs) -> Result<ExitCode> {
    let cfg = RunConfig::load(&args.config)
        .with_context(|| format!("invalid configuration {}", args.config.display()))?;
    let cfg = Arc::new(cfg);
    let generator = cfg.task_generator()?;

    info!(
        name = %cfg.name,
        mode = %cfg.mode.tag(),
        dates = generator.dates().count(),
        partitions = generator.num_partitions(),
        tasks = generator.len(),
        max_concurrent = cfg.execution.max_concurrent_sessions,
        "configuration loaded"
    );
    if generator.is_empty() {
        warn!("no qualifying dates in range, nothing to run");
    }

    let blueprint = Blueprint::new(Arc::clone(&cfg));

    if args.dry_run {
        print_plan(&cfg, &blueprint, generator.generate().first());
        return Ok(ExitCode::Success);
    }

    let mut client = ProcessClient::new();
    if let Some(dir) = cfg.execution.worker_script.parent() {
        client = client.with_workdir(dir);
    }
    let subscribers: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter)];
    let orch = Orchestrator::new(
        OrchestratorConfig::from_run(&cfg),
        Arc::new(client),
        blueprint,
        subscribers,
    );

    let report = orch.run(generator.generate()).await?;
    print!("{report}");
    Ok(report.exit_code())
}

fn print_plan(cfg: &RunConfig, blueprint: &Blueprint, first: Option<&pqvisor::Task>) {
    println!("Configuration is valid (dry run, no sessions created).");
    println!("  name:            {}", cfg.name);
    match &cfg.mode {
        ModeConfig::Replay(r) => println!(
            "  mode:            replay (start {}, speed {}x)",
            r.replay_start, r.replay_speed
        ),
        ModeConfig::Batch(b) => println!("  mode:            batch (timeout {:?})", b.timeout),
    }
    println!(
        "  dates:           {} to {}{}",
        cfg.dates.start,
        cfg.dates.end,
        if cfg.dates.weekdays_only {
            " (weekdays only)"
        } else {
            ""
        }
    );
    println!("  partitions:      {}", cfg.execution.num_partitions);
    println!(
        "  max concurrent:  {}",
        cfg.execution.max_concurrent_sessions
    );
    println!("  worker script:   {}", cfg.execution.worker_script.display());
    if let Some(task) = first {
        println!("  first session:   {}", blueprint.session_name(task));
    }
}
