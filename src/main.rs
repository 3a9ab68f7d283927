//! oss - demand-paging memory manager simulator
//!
//! Usage: oss [OPTIONS]
//!
//! Launches simulated worker processes that issue memory references and
//! services them with second-chance page replacement. Everything the
//! manager does is written to the log file; a short summary goes to stderr.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;

use anyhow::Context;
use clap::Parser;
use log::{LevelFilter, error};

use memsim::config::{Config, FreeFramePolicy, IllegalAddressPolicy};
use memsim::logging::FileLogger;
use memsim::oss::{Outcome, Simulation, Summary};
use memsim::MemsimError;

#[derive(Parser, Debug)]
#[command(name = "oss")]
#[command(about = "Simulate a demand-paging memory manager with second-chance replacement")]
#[command(version)]
struct Cli {
    /// TOML file overriding the built-in defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Favour low-numbered pages when workers pick a page
    #[arg(short, long)]
    weighted: bool,

    /// Where the manager log is written
    #[arg(short, long)]
    log_file: Option<PathBuf>,

    /// Base seed for the manager and worker random streams
    #[arg(long)]
    seed: Option<u64>,

    /// Real-time limit for the whole run
    #[arg(long)]
    max_seconds: Option<u64>,

    /// Number of physical frames
    #[arg(long)]
    frames: Option<usize>,

    #[arg(long, value_enum)]
    free_frame_policy: Option<FreeFramePolicy>,

    #[arg(long, value_enum)]
    illegal_address_policy: Option<IllegalAddressPolicy>,

    /// Also log debug records (queue contents, worker exits)
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn load_config(&self) -> Result<Config, MemsimError> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        config.weighted |= self.weighted;
        if let Some(path) = &self.log_file {
            config.log_file = path.clone();
        }
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
        if let Some(secs) = self.max_seconds {
            config.max_real_seconds = secs;
        }
        if let Some(frames) = self.frames {
            config.frames = frames;
        }
        if let Some(policy) = self.free_frame_policy {
            config.free_frame_policy = policy;
        }
        if let Some(policy) = self.illegal_address_policy {
            config.illegal_address_policy = policy;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(&cli) {
        Ok(summary) => {
            print_summary(&summary);
            match summary.outcome {
                Outcome::Cancelled => ExitCode::from(130),
                _ => ExitCode::SUCCESS,
            }
        }
        Err(e) => {
            error!("Master: {:#}", e);
            log::logger().flush();
            eprintln!("Error: {:#}", e);
            e.downcast_ref::<MemsimError>()
                .map_or(ExitCode::FAILURE, MemsimError::exit_code)
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<Summary> {
    let config = cli.load_config()?;

    let level = if cli.verbose { LevelFilter::Debug } else { LevelFilter::Info };
    FileLogger::create(&config.log_file, config.max_log_lines, level)
        .with_context(|| format!("cannot open log file {}", config.log_file.display()))?
        .install()
        .context("logger already installed")?;

    let simulation = Simulation::new(config)?;
    let cancel = simulation.cancel_handle();
    ctrlc::set_handler(move || cancel.store(true, Ordering::SeqCst))
        .context("cannot install the interrupt handler")?;

    let summary = simulation.run()?;
    log::logger().flush();
    Ok(summary)
}

fn print_summary(summary: &Summary) {
    let stats = &summary.stats;
    eprintln!("Run {:?} at simulated time {}", summary.outcome, summary.finished_at);
    eprintln!(
        "Workers launched: {}, completed: {}, killed: {}",
        stats.workers_launched, stats.workers_completed, stats.workers_killed
    );
    eprintln!(
        "Memory accesses: {}, page faults: {} ({:.4} per access), swaps: {}",
        stats.memory_accesses,
        stats.page_faults,
        stats.page_faults_per_access(),
        stats.swaps
    );
    eprintln!("Average access time: {}", stats.average_access_time());
}
