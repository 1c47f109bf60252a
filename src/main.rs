//! ScadaSim: Main Entry Point
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  SystemClock      LogEventSink      MemoryStore                │
//! │  (ClockPort)      (EventSink)       (StoragePort)              │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │                  Plant (pure logic)                    │    │
//! │  │  Physics · Sensors · Actuators · Alarms · Safety ·     │    │
//! │  │  Incidents                                             │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  SimulationDriver (tick thread + incident thread)              │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Usage: `scadasim [config.json] [--run-secs N]`.  Log level via `RUST_LOG`.
#![deny(unused_must_use)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use log::{info, warn};
use tracing_subscriber::EnvFilter;

use scadasim::adapters::log_sink::LogEventSink;
use scadasim::adapters::memory_store::MemoryStore;
use scadasim::adapters::time::SystemClock;
use scadasim::app::service::Plant;
use scadasim::config::PlantConfig;
use scadasim::driver::SimulationDriver;
use scadasim::persist::SnapshotStore;

struct Args {
    config: Option<String>,
    run_secs: Option<u64>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        config: None,
        run_secs: None,
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--run-secs" => {
                let v = it.next().context("--run-secs needs a value")?;
                args.run_secs = Some(v.parse().with_context(|| format!("bad --run-secs '{v}'"))?);
            }
            flag if flag.starts_with("--") => bail!("unknown flag {flag}"),
            path => args.config = Some(path.to_owned()),
        }
    }
    Ok(args)
}

fn load_config(path: Option<&str>) -> Result<PlantConfig> {
    let Some(path) = path else {
        info!("No config file given, using defaults");
        return Ok(PlantConfig::default());
    };
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    PlantConfig::from_json(&text).map_err(|e| anyhow::anyhow!("{path}: {e}"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("ScadaSim v{} starting", env!("CARGO_PKG_VERSION"));

    let args = parse_args()?;
    let config = load_config(args.config.as_deref())?;
    let plant = Arc::new(Plant::new(config, SystemClock::new()).map_err(|e| anyhow::anyhow!("config: {e}"))?);

    let driver = SimulationDriver::spawn(plant.clone(), LogEventSink::new(), SnapshotStore::new(MemoryStore::new()))
        .context("spawning simulation threads")?;

    match args.run_secs {
        Some(secs) => std::thread::sleep(Duration::from_secs(secs)),
        None => loop {
            std::thread::park();
        },
    }

    let store = driver.stop();
    if store.is_none() {
        warn!("Snapshot store lost (tick thread panicked)");
    }

    let telemetry = plant.telemetry();
    println!("{}", serde_json::to_string_pretty(&telemetry)?);
    Ok(())
}
