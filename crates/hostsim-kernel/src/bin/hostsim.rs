//! hostsim CLI: run a simulation config and print the report

use clap::{Parser, Subcommand};
use hostsim_kernel::config::SimulationConfig;
use hostsim_kernel::guest::ProgramRegistry;
use hostsim_kernel::simulation::{Simulation, SimulationReport};
use hostsim_kernel::SimError;
use snafu::Snafu;
use std::fs;
use std::path::{Path, PathBuf};

/// CLI errors for the hostsim binary.
#[derive(Debug, Snafu)]
enum CliError {
    #[snafu(display("Simulation error: {source}"), context(false))]
    Sim { source: SimError },
    #[snafu(display("I/O error: {source}"), context(false))]
    Io { source: std::io::Error },
    #[snafu(display("JSON error: {source}"), context(false))]
    Json { source: serde_json::Error },
    #[snafu(display("{message}"))]
    Other { message: String },
}

#[derive(Parser)]
#[command(name = "hostsim")]
#[command(about = "Deterministic network simulation of guest programs on virtual hosts")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a simulation and print its report as JSON
    Run {
        /// Path to a JSON simulation config
        #[arg(short, long)]
        config: PathBuf,

        /// Override the config's seed
        #[arg(short, long)]
        seed: Option<u64>,

        /// Override the config's worker count
        #[arg(short, long)]
        workers: Option<usize>,

        /// Record the executed-event trace in the report
        #[arg(long)]
        trace: bool,

        /// Write the report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print a per-process summary instead of the JSON report
        #[arg(long)]
        summary: bool,
    },

    /// Check a config without running it
    Validate {
        /// Path to a JSON simulation config
        #[arg(short, long)]
        config: PathBuf,
    },

    /// List the built-in guest programs
    Programs,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            config,
            seed,
            workers,
            trace,
            output,
            summary,
        } => cmd_run(&config, seed, workers, trace, output, summary),
        Commands::Validate { config } => cmd_validate(&config),
        Commands::Programs => {
            cmd_programs();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(path: &Path) -> Result<SimulationConfig, CliError> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

fn cmd_run(
    path: &Path,
    seed: Option<u64>,
    workers: Option<usize>,
    trace: bool,
    output: Option<PathBuf>,
    summary: bool,
) -> Result<(), CliError> {
    let mut config = load_config(path)?;
    if let Some(seed) = seed {
        config.seed = seed;
    }
    if let Some(workers) = workers {
        config.workers = workers;
    }
    config.trace |= trace;

    let report = Simulation::new(config, ProgramRegistry::builtin())?.run()?;

    if summary {
        print_summary(&report);
        return Ok(());
    }
    let json = serde_json::to_string_pretty(&report)?;
    match output {
        Some(path) => {
            fs::write(&path, json)?;
            println!("Saved report to {:?}", path);
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn cmd_validate(path: &Path) -> Result<(), CliError> {
    let config = load_config(path)?;
    config.validate().map_err(SimError::from)?;
    let programs = ProgramRegistry::builtin();
    for host in &config.hosts {
        for process in &host.processes {
            if !programs.contains(&process.program) {
                return OtherSnafu {
                    message: format!(
                        "host {}: unknown program {:?}",
                        host.name, process.program
                    ),
                }
                .fail();
            }
        }
    }
    println!(
        "{:?}: {} hosts, {} links, stop at {} ns",
        path,
        config.hosts.len(),
        config.links.len(),
        config.stop_time_ns
    );
    Ok(())
}

fn cmd_programs() {
    for name in ProgramRegistry::builtin().names() {
        println!("{}", name);
    }
}

fn print_summary(report: &SimulationReport) {
    println!("=== Simulation ===");
    println!("Seed: {}", report.seed);
    println!("Rounds: {}", report.rounds);
    println!("End time: {}", report.end_time);
    println!("Events: {}", report.total_events());

    println!("\n=== Processes ===");
    for process in &report.processes {
        let status = match process.exit_code {
            Some(code) => format!("exit {}", code),
            None => "running".to_string(),
        };
        println!(
            "{}/{} {} [{}]",
            process.host, process.pid, process.program, status
        );
        for line in process.stdout.lines() {
            println!("  | {}", line);
        }
        for line in process.stderr.lines() {
            println!("  ! {}", line);
        }
    }
}
