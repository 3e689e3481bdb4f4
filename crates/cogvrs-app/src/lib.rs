//! Headless runner plumbing: load a configuration, advance a world, export the final snapshot.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cogvrs_core::{CogvrsConfig, PersistenceBatch, WorldPersistence, WorldSnapshot, WorldState};
use tracing::info;

/// Options for one headless run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// JSON configuration file; defaults apply when absent.
    pub config: Option<PathBuf>,
    /// Number of ticks to advance.
    pub ticks: u64,
    /// Overrides the configured seed.
    pub seed: Option<u64>,
    /// Log a summary every this many ticks (0 disables).
    pub report_every: u32,
    /// Where to write the final snapshot as JSON.
    pub snapshot_out: Option<PathBuf>,
}

/// Totals gathered across a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub ticks: u64,
    pub births: usize,
    pub deaths: usize,
    pub final_population: usize,
    pub tribes: usize,
}

/// Persistence sink that logs each batch it receives.
#[derive(Debug, Default)]
pub struct SummaryLogger;

impl WorldPersistence for SummaryLogger {
    fn on_tick(&mut self, payload: &PersistenceBatch) {
        let summary = &payload.summary;
        info!(
            tick = summary.tick.0,
            population = summary.population,
            births = summary.births,
            deaths = summary.deaths,
            tribes = summary.tribes,
            avg_energy = summary.average_energy,
            avg_health = summary.average_health,
            events = payload.events.len(),
            "world summary"
        );
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Read a configuration file, or fall back to defaults.
pub fn load_config(path: Option<&Path>) -> Result<CogvrsConfig> {
    let Some(path) = path else {
        return Ok(CogvrsConfig::default());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    CogvrsConfig::from_json_str(&text)
        .with_context(|| format!("invalid config {}", path.display()))
}

pub fn write_snapshot(path: &Path, snapshot: &WorldSnapshot) -> Result<()> {
    let json = serde_json::to_string_pretty(snapshot).context("failed to encode snapshot")?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
}

/// Build, populate, and run a world according to `options`.
pub fn run(options: &RunOptions) -> Result<RunReport> {
    let mut config = load_config(options.config.as_deref())?;
    if let Some(seed) = options.seed {
        config.rng_seed = Some(seed);
    }
    config.persistence_interval = options.report_every;
    let mut world = WorldState::with_persistence(config, Box::new(SummaryLogger))
        .context("failed to build world")?;
    let spawned = world.populate();
    info!(agents = spawned, resources = world.resources().len(), "world ready");

    let mut report = RunReport::default();
    for _ in 0..options.ticks {
        let events = world.step();
        report.ticks += 1;
        report.births += events.births;
        report.deaths += events.deaths;
        if world.agent_count() == 0 {
            info!(tick = events.tick.0, "population extinct; stopping early");
            break;
        }
    }
    report.final_population = world.agent_count();
    report.tribes = world.tribes().len();

    let snapshot = world.snapshot();
    info!(
        tick = snapshot.tick.0,
        population = snapshot.aggregates.population,
        tribes = snapshot.aggregates.tribe_count,
        births = report.births,
        deaths = report.deaths,
        "run finished"
    );
    if let Some(path) = &options.snapshot_out {
        write_snapshot(path, &snapshot)?;
        info!(path = %path.display(), "snapshot written");
    }
    Ok(report)
}
