use std::{io, path::PathBuf};

use anyhow::{bail, Result};
use clap::{Args, Parser};

mod bench;
mod scenario;

use scenario::Scenario;

// ----------------------------------------------------------------------------
// Command-line Interface

/// Bench for the resonant DPLL firmware core.
#[derive(Debug, Parser)]
#[command(version)]
enum Cli {
    /// Run a scenario against the simulated hardware and load.
    Run(RunArgs),
    /// Validate a scenario's firmware configuration.
    Check(CheckArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Scenario file (hjson).
    scenario: PathBuf,
    /// PWM cycles to simulate; defaults to the scenario's `cycles`.
    #[arg(long)]
    cycles: Option<u64>,
    /// Write one CSV row per cycle to stdout. The summary goes to stderr.
    #[arg(long)]
    trace: bool,
}

#[derive(Debug, Args)]
struct CheckArgs {
    /// Scenario file (hjson).
    scenario: PathBuf,
}

// ----------------------------------------------------------------------------
// Application

fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_module("dpll_sim", log::LevelFilter::Info)
        .parse_default_env()
        .init();

    match Cli::parse() {
        Cli::Run(args) => run(args),
        Cli::Check(args) => check(args),
    }
}

// ----------------------------------------------------------------------------
// Subcommands

fn run(args: RunArgs) -> Result<()> {
    let scenario = Scenario::load(&args.scenario)?;
    let cycles = args.cycles.unwrap_or(scenario.cycles);
    log::info!("running `{}` for {} cycles", scenario.name, cycles);

    let summary = if args.trace {
        let mut writer = csv::Writer::from_writer(io::stdout());
        let summary = bench::run(&scenario, cycles, |row| Ok(writer.serialize(row)?))?;
        writer.flush()?;
        eprintln!("{summary}");
        summary
    } else {
        let summary = bench::run(&scenario, cycles, |_| Ok(()))?;
        println!("{summary}");
        summary
    };

    if summary.first_lock.is_none() {
        log::warn!("loop never locked");
    }
    Ok(())
}

fn check(args: CheckArgs) -> Result<()> {
    let scenario = Scenario::load(&args.scenario)?;
    if let Err(e) = scenario.config().validate() {
        bail!("{}: {}", args.scenario.display(), e);
    }
    println!("{}: ok", args.scenario.display());
    Ok(())
}
