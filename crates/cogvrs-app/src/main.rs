use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use cogvrs_app::{RunOptions, init_tracing, run};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "cogvrs", version, about = "Run the Cogvrs artificial-life sandbox headlessly")]
struct Cli {
    /// JSON configuration file; omitted keys take their defaults.
    #[arg(short, long, env = "COGVRS_CONFIG")]
    config: Option<PathBuf>,

    /// Number of ticks to simulate.
    #[arg(short, long, env = "COGVRS_TICKS", default_value_t = 1_000)]
    ticks: u64,

    /// RNG seed overriding the configuration.
    #[arg(long, env = "COGVRS_SEED")]
    seed: Option<u64>,

    /// Log a world summary every N ticks (0 disables).
    #[arg(long, env = "COGVRS_REPORT_EVERY", default_value_t = 100)]
    report_every: u32,

    /// Write the final snapshot as JSON to this path.
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let report = run(&RunOptions {
        config: cli.config,
        ticks: cli.ticks,
        seed: cli.seed,
        report_every: cli.report_every,
        snapshot_out: cli.snapshot,
    })?;
    info!(?report, "done");
    Ok(())
}
