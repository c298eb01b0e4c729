//! stallwatch - stall supervisor CLI
//!
//! `check-config` validates a configuration file; `simulate` runs a fleet of
//! tokio worker threads under a live supervisor, wedging some of them, and
//! prints the supervisor's final status as JSON.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use stallwatch_core::{
    ActionTable, EventKind, LogFormat, LogStall, StallwatchConfig, Supervisor, TokioEventLoop,
    WorkerId, init_logging,
};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "stallwatch", version, about = "Stall and deadlock supervision for event-loop workers")]
struct Cli {
    /// Log level or filter directive (overridden by RUST_LOG)
    #[arg(long, global = true, env = "STALLWATCH_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log output format: pretty or json
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate a configuration file and print the effective settings as JSON
    CheckConfig {
        /// Path to stallwatch.toml
        path: PathBuf,
    },

    /// Run simulated workers under a live supervisor
    Simulate(SimulateArgs),
}

#[derive(Args, Debug)]
struct SimulateArgs {
    /// Configuration file (defaults apply when omitted)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of worker threads
    #[arg(long, default_value_t = 4)]
    workers: u64,

    /// Worker id (1-based) that wedges its thread; repeatable
    #[arg(long = "stall")]
    stall: Vec<u64>,

    /// Delay before stalled workers wedge
    #[arg(long, default_value_t = 500)]
    stall_after_ms: u64,

    /// Total run time before the supervisor is stopped
    #[arg(long, default_value_t = 3_000)]
    duration_ms: u64,

    /// Replace the process-terminating kill/multikill responses with logging
    #[arg(long)]
    dry_run: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::CheckConfig { ref path } => {
            let config = load_config(Some(path))?;
            init_cli_logging(&cli, &config)?;
            check_config(&config)
        }
        Commands::Simulate(ref args) => {
            let config = load_config(args.config.as_deref())?;
            init_cli_logging(&cli, &config)?;
            simulate(args, &config)
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<StallwatchConfig> {
    match path {
        Some(path) => StallwatchConfig::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(StallwatchConfig::default()),
    }
}

fn init_cli_logging(cli: &Cli, config: &StallwatchConfig) -> anyhow::Result<()> {
    let mut log_config = config.logging.clone();
    if let Some(level) = &cli.log_level {
        log_config.level.clone_from(level);
    }
    if let Some(format) = cli.log_format {
        log_config.format = format;
    }
    init_logging(&log_config).context("failed to initialize logging")
}

fn check_config(config: &StallwatchConfig) -> anyhow::Result<()> {
    let supervisor = config
        .supervisor_config()
        .context("invalid supervisor configuration")?;

    let mut effective = config.clone();
    effective.supervisor.loop_interval_ms = Some(supervisor.loop_interval.as_millis() as u64);
    effective.supervisor.multikill_ms = Some(supervisor.systemic_threshold().as_millis() as u64);

    println!("{}", serde_json::to_string_pretty(&effective)?);
    Ok(())
}

fn simulate(args: &SimulateArgs, config: &StallwatchConfig) -> anyhow::Result<()> {
    if args.workers == 0 {
        bail!("--workers must be at least 1");
    }
    if let Some(id) = args.stall.iter().find(|id| **id == 0 || **id > args.workers) {
        bail!("--stall {id} is out of range (workers are 1..={})", args.workers);
    }

    let supervisor_config = config
        .supervisor_config()
        .context("invalid supervisor configuration")?;
    let touch_interval = config.supervisor.touch_interval();

    let mut actions = ActionTable::with_defaults();
    if args.dry_run {
        actions.replace(EventKind::Kill, Arc::new(LogStall));
        actions.replace(EventKind::Multikill, Arc::new(LogStall));
    }

    let supervisor = Arc::new(Supervisor::new(supervisor_config, actions)?);
    supervisor.start().context("failed to start supervisor")?;
    info!(
        workers = args.workers,
        stalled = ?args.stall,
        dry_run = args.dry_run,
        "Simulation started"
    );

    let stop = Arc::new(AtomicBool::new(false));
    let workers = (1..=args.workers)
        .map(|raw| {
            spawn_worker(WorkerSpec {
                supervisor: Arc::clone(&supervisor),
                stop: Arc::clone(&stop),
                id: WorkerId::new(raw),
                touch_interval,
                stall_after: args
                    .stall
                    .contains(&raw)
                    .then(|| Duration::from_millis(args.stall_after_ms)),
            })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    std::thread::sleep(Duration::from_millis(args.duration_ms));
    supervisor.stop();
    let status = supervisor.status();
    stop.store(true, Ordering::SeqCst);

    for worker in workers {
        match worker.join() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "Simulated worker failed"),
            Err(_) => warn!("Simulated worker panicked"),
        }
    }

    info!(
        scans = status.stats.scans,
        kills = status.stats.kills,
        multikills = status.stats.multikills,
        "Simulation finished"
    );
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

struct WorkerSpec {
    supervisor: Arc<Supervisor>,
    stop: Arc<AtomicBool>,
    id: WorkerId,
    touch_interval: Duration,
    /// Wedge the thread after this long; `None` keeps it healthy.
    stall_after: Option<Duration>,
}

fn spawn_worker(spec: WorkerSpec) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
    std::thread::Builder::new()
        .name(spec.id.to_string())
        .spawn(move || run_worker(&spec))
        .context("failed to spawn worker thread")
}

fn run_worker(spec: &WorkerSpec) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build worker runtime")?;

    runtime.block_on(async {
        let event_loop = TokioEventLoop::current()?;
        let _handle =
            spec.supervisor
                .create_handle(spec.id, spec.touch_interval, Some(&event_loop))?;
        let started = tokio::time::Instant::now();

        while !spec.stop.load(Ordering::SeqCst) {
            if spec.stall_after.is_some_and(|after| started.elapsed() >= after) {
                warn!(worker = %spec.id, "Wedging worker thread");
                // Block the runtime thread itself so its touch timer cannot run.
                while !spec.stop.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(10));
                }
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok::<(), anyhow::Error>(())
    })
}
