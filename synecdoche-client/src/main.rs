/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::path::{Path, PathBuf};
use std::process;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use synecdoche_client::config::{ClientConfig, ClientConfigManager};
use synecdoche_client::gui_rpc::{ConnectionSet, CoreRequestHandler, RpcSettings, SimSummary};
use synecdoche_client::rr_sim::{RrSimulator, SimOutcome, SimParams, TracingObserver};
use synecdoche_client::work::Workload;

/// Attempts at binding the GUI RPC port, one second apart.
const LISTEN_ATTEMPTS: u32 = 30;
const LISTEN_RETRY_DELAY: Duration = Duration::from_secs(1);
const POLL_TIMEOUT: Duration = Duration::from_secs(1);

// ── CLI argument definition ───────────────────────────────────────────────────

/// Synecdoche core client.
///
/// Example:
///   synecdoche-client -c client.yaml run -w workload.yaml
///   synecdoche-client simulate -w workload.yaml --now 1700000000
#[derive(Debug, Parser)]
#[command(
    name = "synecdoche-client",
    about = "Synecdoche core client – deadline simulation and GUI RPC server",
    long_about = None,
)]
struct Cli {
    /// Path to the YAML client configuration file.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Override the data directory (password and allow-list files).
    #[arg(short = 'd', long = "data-dir")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve GUI RPC and re-run the deadline simulation periodically.
    Run {
        /// Workload YAML to simulate.
        #[arg(short = 'w', long)]
        workload: Option<PathBuf>,

        /// Seconds between simulation runs.
        #[arg(long = "sched-interval", default_value_t = 60)]
        sched_interval: u64,
    },
    /// Run the deadline simulation once and print the result.
    Simulate {
        #[arg(short = 'w', long)]
        workload: PathBuf,

        /// Simulation start time in seconds since the epoch (default: now).
        #[arg(long)]
        now: Option<f64>,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    // Level is controlled by the RUST_LOG env-var (e.g. RUST_LOG=debug).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        error!("{:#}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    info!("Synecdoche client starting up...");

    // ── Load client configuration ─────────────────────────────────────────────
    let mut manager = ClientConfigManager::new();
    match &cli.config {
        Some(path) => {
            info!("Loading client configuration from: {}", path.display());
            manager.load_from_file(path)?;
        }
        None => warn!("No configuration file provided, using default client settings"),
    }
    let mut config = manager.into_config();
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }

    info!(
        data_dir = %config.data_dir.display(),
        port = config.gui_rpc.port,
        ncpus = config.host.ncpus,
        work_buf_secs = config.work_buf_total(),
        "Configuration"
    );

    match cli.command {
        Command::Run {
            workload,
            sched_interval,
        } => run_daemon(
            &config,
            workload.as_deref(),
            Duration::from_secs(sched_interval.max(1)),
        ),
        Command::Simulate { workload, now } => simulate_once(&config, &workload, now),
    }
}

// ── Daemon ────────────────────────────────────────────────────────────────────

fn run_daemon(config: &ClientConfig, workload_path: Option<&Path>, interval: Duration) -> Result<()> {
    let mut workload = match workload_path {
        Some(path) => Workload::load_from_file(path)?,
        None => {
            warn!("No workload file provided; simulation results will be empty");
            Workload::new()
        }
    };

    let mut server = ConnectionSet::new(RpcSettings::from_config(config))?;
    let mut handler = CoreRequestHandler::new(config.host.ncpus);

    // The port may still be held by a previous instance for a few seconds.
    let mut attempt = 1;
    loop {
        server.reload_password()?;
        let is_final_attempt = attempt == LISTEN_ATTEMPTS;
        match server.init(is_final_attempt) {
            Ok(_) => break,
            Err(e) if is_final_attempt => {
                return Err(e).context("GUI RPC server could not start listening")
            }
            Err(_) => {
                attempt += 1;
                thread::sleep(LISTEN_RETRY_DELAY);
            }
        }
    }

    let mut next_sim = Instant::now();
    while !handler.quit_requested() {
        if Instant::now() >= next_sim {
            let now = wall_clock();
            match simulate(config, &workload, now) {
                Ok(outcome) => {
                    handler.publish(SimSummary::new(&workload, &outcome, now));
                    outcome.apply(&mut workload);
                }
                Err(e) => error!("Simulation failed: {:#}", e),
            }
            next_sim = Instant::now() + interval;
        }
        server.poll_once(&mut handler, Some(POLL_TIMEOUT))?;
    }

    info!("Quit requested, shutting down");
    server.shutdown();
    Ok(())
}

// ── One-shot simulation ───────────────────────────────────────────────────────

fn simulate_once(config: &ClientConfig, workload_path: &Path, now: Option<f64>) -> Result<()> {
    let workload = Workload::load_from_file(workload_path)?;
    let now = now.unwrap_or_else(wall_clock);
    let outcome = simulate(config, &workload, now)?;

    info!(
        cpu_shortfall = outcome.cpu_shortfall,
        end_time = outcome.end_time,
        "Simulation complete"
    );
    for (pid, project) in workload.projects() {
        if let Some(r) = outcome.project(pid) {
            info!(
                "  [{name}]  rate={rate:.4}  shortfall={short:.1}s  missed={missed}",
                name = project.name,
                rate = r.proc_rate,
                short = r.cpu_shortfall,
                missed = r.deadlines_missed,
            );
        }
    }
    for (jid, job) in workload.jobs() {
        let Some(r) = outcome.job(jid) else { continue };
        match r.finish_time {
            Some(t) => info!(
                "  {name}: finishes at {t:.0} (deadline {deadline:.0}){miss}",
                name = job.name,
                deadline = job.deadline,
                miss = if r.misses_deadline { "  MISS" } else { "" },
            ),
            None => info!("  {}: not simulated", job.name),
        }
    }
    Ok(())
}

/// Runs one simulation pass.  This client starts no processes of its own, so
/// the working sets used for RAM suppression are the ones recorded in the
/// workload file.
fn simulate(config: &ClientConfig, workload: &Workload, now: f64) -> Result<SimOutcome> {
    let sim = RrSimulator::new(SimParams::from_config(config, now));
    let mut observer = TracingObserver::new(config.log_flags.rr_simulation);
    let outcome = sim.run(workload, workload, &mut observer)?;
    Ok(outcome)
}

fn wall_clock() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
