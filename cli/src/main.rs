//! Command-line runner for the interbank network simulator.
//!
//! Loads an optional JSON config file, applies flag overrides, runs the
//! simulation, and prints the summary report. Exits 0 on normal completion,
//! 2 when the state fabric is unavailable, 1 on any other error.

use std::fs;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use log::info;

use interbank_network_core_rs::{RunSummary, Simulation, SimulationConfig, SimulationError};

#[derive(Debug, Parser)]
#[command(name = "interbank-sim", about = "CCP-coordinated interbank network simulator")]
struct Args {
    /// Path to a JSON config file (defaults apply for missing fields)
    #[arg(short, long)]
    config: Option<String>,

    /// Override the number of banks
    #[arg(long)]
    banks: Option<usize>,

    /// Override the tick count
    #[arg(long)]
    steps: Option<u64>,

    /// Override the random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Override the network topology (erdos_renyi | scale_free | small_world)
    #[arg(long)]
    network: Option<String>,

    /// Override the exogenous shock tick
    #[arg(long)]
    shock_step: Option<u64>,

    /// Print the summary as JSON instead of the text report
    #[arg(long)]
    json: bool,
}

fn load_config(args: &Args) -> anyhow::Result<SimulationConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing config file {}", path))?
        }
        None => SimulationConfig::default(),
    };

    if let Some(banks) = args.banks {
        config.n_banks = banks;
    }
    if let Some(steps) = args.steps {
        config.steps = steps;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(network) = &args.network {
        config.network_type = interbank_network_core_rs::NetworkTopology::from_name(network);
    }
    if let Some(shock) = args.shock_step {
        config.shock_step = Some(shock);
    }
    Ok(config)
}

fn print_report(summary: &RunSummary, sim: &Simulation, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!("\n{}\n", summary.text_report());

    println!(
        "{:>8} {:>10} {:>10} {:>10} {:>10}",
        "Bank", "Liquidity", "Capital", "Exposure", "Status"
    );
    println!("{}", "-".repeat(52));
    for bank in sim.banks() {
        let status = if bank.defaulted {
            "DEFAULT"
        } else if bank.stressed {
            "STRESSED"
        } else {
            "OK"
        };
        println!(
            "{:>8} {:>10.1} {:>10.1} {:>10.1} {:>10}",
            bank.id,
            bank.liquidity,
            bank.capital,
            bank.total_exposure(),
            status
        );
    }
    println!();
    Ok(())
}

fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    info!(
        "starting run: {} banks, {} steps, seed {}",
        config.n_banks, config.steps, config.seed
    );

    let mut sim = Simulation::new(config)?;
    let summary = sim.run()?;
    print_report(&summary, &sim, args.json)?;
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            // fabric unavailability gets a distinct exit code
            let fabric_down = err
                .downcast_ref::<SimulationError>()
                .map(|e| matches!(e, SimulationError::Fabric(_)))
                .unwrap_or(false);
            if fabric_down {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
