//! yieldscan CLI

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

mod run;
mod run_config;

#[derive(Parser)]
#[command(name = "yieldscan")]
#[command(about = "yieldscan - single-scan yields, histograms and kappa predictions")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan every input once and render all figures of a run file
    Run {
        /// Run file (YAML, `schema_version: yieldscan_run_v0`)
        #[arg(short, long)]
        config: PathBuf,

        /// Override the output directory of the run file.
        #[arg(long)]
        out_dir: Option<PathBuf>,

        /// Override the worker thread count (0 = auto).
        #[arg(long)]
        threads: Option<usize>,

        /// Also write the run summary (pretty JSON) here. Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check a run file without reading any input
    Validate {
        /// Run file (YAML)
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).with_target(false).init();

    match cli.command {
        Commands::Run { config, out_dir, threads, output } => {
            cmd_run(&config, out_dir, threads, output.as_ref())
        }
        Commands::Validate { config } => cmd_validate(&config),
    }
}

fn load_plan(config: &Path) -> Result<run_config::RunPlan> {
    let cfg = run_config::read_run_config(config)?;
    let base_dir = config.parent().unwrap_or_else(|| Path::new("."));
    cfg.to_run_plan(base_dir)
}

fn cmd_run(
    config: &Path,
    out_dir: Option<PathBuf>,
    threads: Option<usize>,
    output: Option<&PathBuf>,
) -> Result<()> {
    let mut plan = load_plan(config)?;
    if let Some(dir) = out_dir {
        plan.out_dir = dir;
    }
    if let Some(n) = threads {
        plan.threads = n;
    }
    let report = run::execute(&plan)?;
    write_json(output, serde_json::to_value(&report)?)
}

fn cmd_validate(config: &Path) -> Result<()> {
    let plan = load_plan(config)?;
    let out = serde_json::json!({
        "ok": true,
        "schema_version": run_config::RUN_V0,
        "processes": plan.processes.iter().map(|p| &p.name).collect::<Vec<_>>(),
        "tables": plan.tables.iter().map(|t| &t.name).collect::<Vec<_>>(),
        "histograms": plan.histograms.iter().map(|h| &h.name).collect::<Vec<_>>(),
        "hist2d": plan.hist2d.iter().map(|h| &h.name).collect::<Vec<_>>(),
        "event_scans": plan.event_scans.iter().map(|e| &e.name).collect::<Vec<_>>(),
        "kappas": plan.kappas.iter().map(|k| &k.name).collect::<Vec<_>>(),
    });
    write_json(None, out)
}

fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
