//! CLI entry point for piezo-stage
//!
//! Drives the piezo controller and strain gauge reader through the stage
//! actor, against the simulated Kinesis backend described in the
//! `[simulation]` configuration section.
//!
//! # Usage
//!
//! ```bash
//! piezo-stage status --json
//! piezo-stage monitor --ticks 50
//! piezo-stage calibrate
//! piezo-stage move 12.5 --position
//! piezo-stage jog up --count 3
//! piezo-stage mode closed
//! ```

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use piezo_core::cancel::{cancel_pair, CancelHandle, CancelToken};
use piezo_core::units::ControlMode;
use piezo_driver_mock::MockKinesis;
use piezo_stage::config::{StageConfig, DEFAULT_CONFIG_PATH};
use piezo_stage::monitor::{ConsoleSink, PollMonitor, SnapshotSink};
use piezo_stage::{logging, StageActor, StageHandle};
use tokio::signal;

#[derive(Parser)]
#[command(name = "piezo-stage")]
#[command(about = "Piezo stage control with strain gauge feedback", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize and print one snapshot
    Status {
        /// Print JSON instead of a status line
        #[arg(long)]
        json: bool,
    },

    /// Print a snapshot every monitor interval until Ctrl-C
    Monitor {
        /// Override the configured interval
        #[arg(long)]
        interval_ms: Option<u64>,
        /// Stop after this many ticks
        #[arg(long)]
        ticks: Option<u64>,
        /// Print JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Switch to closed loop and calibrate reader units (Ctrl-C cancels)
    Calibrate,

    /// Command a value in the current mode, or a reader position
    Move {
        /// Percent / volts, or reader units with --position
        target: f64,
        /// Calibrate, then move to a reader position
        #[arg(long)]
        position: bool,
    },

    /// Step up or down
    Jog {
        /// Direction
        direction: Direction,
        /// Number of steps
        #[arg(long, default_value_t = 1)]
        count: u32,
        /// Calibrate, then step in reader units within the soft travel range
        #[arg(long)]
        position: bool,
    },

    /// Switch between open and closed loop
    Mode {
        /// Target mode
        mode: Mode,
    },

    /// Zero the strain gauge reader
    Zero,

    /// Command zero, or reader position zero with --position
    Home {
        /// Calibrate, then move to reader position zero
        #[arg(long)]
        position: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Direction {
    Up,
    Down,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Open,
    Closed,
}

impl From<Mode> for ControlMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Open => ControlMode::OpenLoop,
            Mode::Closed => ControlMode::ClosedLoop,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = StageConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    config.validate().context("Invalid configuration")?;
    logging::init_from_config(&config).context("Failed to initialize logging")?;

    let backend = Arc::new(MockKinesis::from_config(&config.simulation));
    let (handle, task) = StageActor::from_config(&config, backend).spawn();

    let cancel = cancel_on_ctrl_c();
    let result = run(&cli.command, &config, &handle, &cancel).await;

    handle.shutdown().await.ok();
    task.await.context("Stage actor panicked")?;
    result
}

/// Cancel token fired by the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancelToken {
    let (cancel, token): (CancelHandle, CancelToken) = cancel_pair();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; cancelling");
            cancel.cancel();
        }
    });
    token
}

async fn run(
    command: &Commands,
    config: &StageConfig,
    handle: &StageHandle,
    cancel: &CancelToken,
) -> Result<()> {
    handle
        .initialize(cancel)
        .await
        .with_context(|| format!("Failed to initialize controller {}", config.controller.serial))?;

    let mut sink = ConsoleSink::text();
    match *command {
        Commands::Status { json } => {
            let snapshot = handle.snapshot().await?;
            let mut sink = if json { ConsoleSink::json() } else { sink };
            sink.render(&snapshot);
            return Ok(());
        }
        Commands::Monitor {
            interval_ms,
            ticks,
            json,
        } => {
            let interval = interval_ms
                .map(std::time::Duration::from_millis)
                .unwrap_or_else(|| config.monitor.interval());
            if interval.is_zero() {
                return Err(anyhow!("Monitor interval must be non-zero"));
            }
            let mut sink = if json { ConsoleSink::json() } else { sink };
            let mut monitor = PollMonitor::new(handle.clone(), interval);
            monitor.run(&mut sink, cancel, ticks).await?;
            return Ok(());
        }
        Commands::Calibrate => {
            calibrate(handle, cancel).await?;
        }
        Commands::Move { target, position } => {
            if position {
                calibrate(handle, cancel).await?;
                handle.move_to_pos(target).await?;
            } else {
                handle.set_value(target).await?;
            }
        }
        Commands::Jog {
            direction,
            count,
            position,
        } => {
            if position {
                calibrate(handle, cancel).await?;
            }
            for _ in 0..count {
                match (direction, position) {
                    (Direction::Up, false) => handle.moveup().await?,
                    (Direction::Down, false) => handle.movedown().await?,
                    (Direction::Up, true) => report_bound(handle.move_pos_up().await?, "maximum"),
                    (Direction::Down, true) => {
                        report_bound(handle.move_pos_down().await?, "minimum")
                    }
                }
            }
        }
        Commands::Mode { mode } => {
            handle.set_control_mode(mode.into()).await?;
        }
        Commands::Zero => {
            handle.set_zero().await?;
        }
        Commands::Home { position } => {
            if position {
                calibrate(handle, cancel).await?;
                handle.move_pos_to_home().await?;
            } else {
                handle.move_to_home().await?;
            }
        }
    }

    sink.render(&handle.snapshot().await?);
    Ok(())
}

async fn calibrate(handle: &StageHandle, cancel: &CancelToken) -> Result<()> {
    handle.set_closed_loop().await?;
    let fit = handle
        .calibrate(cancel)
        .await
        .context("Calibration did not complete")?;
    println!(
        "Calibrated: percentage = {:.4} * position + {:.4}",
        fit.slope, fit.intercept
    );
    Ok(())
}

fn report_bound(moved: bool, bound: &str) {
    if !moved {
        println!("At soft travel {}; not stepping", bound);
    }
}
