//! Evloop command-line driver
//!
//! Small demonstrations of the event loop: timers, a batch of pool work,
//! and a heartbeat on the process-wide loop that runs until Ctrl-C.

use anyhow::Context;
use clap::{Parser, Subcommand};
use evloop::{global, EventLoop, LoopConfig, Outcome, TimerHandle};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "evloop")]
#[command(about = "Cooperative event loop demonstrations", long_about = None)]
#[command(version)]
struct Cli {
    /// Loop configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the worker count (0 = one per CPU)
    #[arg(short, long, global = true)]
    workers: Option<usize>,

    /// Override the poll interval in milliseconds
    #[arg(long, global = true)]
    poll_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Schedule a one-shot and a repeating timer
    Timers {
        /// Delay of the one-shot timer
        #[arg(long, default_value = "100")]
        oneshot_ms: u64,
        /// Period of the repeating timer
        #[arg(long, default_value = "50")]
        interval_ms: u64,
        /// Cancel the repeating timer after this many firings
        #[arg(long, default_value = "5")]
        count: usize,
    },

    /// Run sleeping tasks across the worker pool
    Batch {
        /// Number of tasks
        #[arg(long, default_value = "100")]
        tasks: usize,
        /// How long each task sleeps
        #[arg(long, default_value = "10")]
        sleep_ms: u64,
    },

    /// Print a heartbeat from the default loop until interrupted
    Watch {
        /// Heartbeat period
        #[arg(long, default_value = "1000")]
        heartbeat_ms: u64,
    },
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<LoopConfig> {
    let mut config = match &cli.config {
        Some(path) => LoopConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => LoopConfig::default(),
    };
    if let Some(workers) = cli.workers {
        config = config.with_workers(workers);
    }
    if let Some(ms) = cli.poll_ms {
        config = config.with_poll_interval_ms(ms);
    }
    config.validate()?;
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Timers {
            oneshot_ms,
            interval_ms,
            count,
        } => run_timers(&load_config(&cli)?, *oneshot_ms, *interval_ms, *count),
        Commands::Batch { tasks, sleep_ms } => run_batch(&load_config(&cli)?, *tasks, *sleep_ms),
        Commands::Watch { heartbeat_ms } => {
            if cli.config.is_some() || cli.workers.is_some() || cli.poll_ms.is_some() {
                tracing::warn!("watch uses the default loop; configuration overrides are ignored");
            }
            run_watch(*heartbeat_ms)
        }
    }
}

fn run_timers(config: &LoopConfig, oneshot_ms: u64, interval_ms: u64, count: usize) -> anyhow::Result<()> {
    let event_loop = EventLoop::new(config)?;
    let started = Instant::now();

    event_loop.set_timeout(Duration::from_millis(oneshot_ms), move || {
        println!("[{:>6} ms] one-shot fired", started.elapsed().as_millis());
    });

    let slot: Arc<Mutex<Option<TimerHandle>>> = Arc::new(Mutex::new(None));
    let pending = slot.clone();
    let mut fired = 0usize;
    let handle = event_loop.set_interval(Duration::from_millis(interval_ms), move || {
        fired += 1;
        println!("[{:>6} ms] interval #{fired}", started.elapsed().as_millis());
        if fired == count {
            if let Some(handle) = pending.lock().take() {
                handle.cancel();
            }
        }
    });
    if count == 0 {
        handle.cancel();
    } else {
        *slot.lock() = Some(handle);
    }

    event_loop.run_until_idle()?;
    println!("done after {} ms", started.elapsed().as_millis());
    Ok(())
}

fn run_batch(config: &LoopConfig, tasks: usize, sleep_ms: u64) -> anyhow::Result<()> {
    let event_loop = EventLoop::new(config)?;
    let workers = event_loop.pool().worker_count();
    let nap = event_loop.async_fn(move |index: usize| {
        thread::sleep(Duration::from_millis(sleep_ms));
        index
    });

    let completed = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let started = Instant::now();

    for index in 0..tasks {
        let completed = completed.clone();
        let failed = failed.clone();
        nap.call(index, move |outcome| match outcome {
            Outcome::Success(_) => {
                completed.fetch_add(1, Ordering::Relaxed);
            }
            other => {
                tracing::warn!(index, ?other, "task did not complete");
                failed.fetch_add(1, Ordering::Relaxed);
            }
        });
    }

    event_loop.run_until_idle()?;
    println!(
        "{} of {} tasks completed on {} workers in {} ms ({} failed)",
        completed.load(Ordering::Relaxed),
        tasks,
        workers,
        started.elapsed().as_millis(),
        failed.load(Ordering::Relaxed),
    );
    Ok(())
}

fn run_watch(heartbeat_ms: u64) -> anyhow::Result<()> {
    if !global::install_interrupt_handler() {
        anyhow::bail!("cannot install an interrupt handler on this platform");
    }

    let started = Instant::now();
    let mut beats = 0u64;
    global::set_interval(Duration::from_millis(heartbeat_ms.max(1)), move || {
        beats += 1;
        println!("[{:>6} ms] heartbeat {beats}", started.elapsed().as_millis());
    });

    println!("watching; press Ctrl-C to stop");
    global::run_global()?;
    println!("interrupted after {} ms", started.elapsed().as_millis());
    Ok(())
}
