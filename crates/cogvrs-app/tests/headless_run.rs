use std::fs;
use std::process::Command;

use cogvrs_app::{RunOptions, load_config, run};
use cogvrs_core::WorldSnapshot;

#[test]
fn run_writes_final_snapshot() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = dir.path().join("snapshot.json");
    let report = run(&RunOptions {
        ticks: 30,
        seed: Some(5),
        report_every: 10,
        snapshot_out: Some(out.clone()),
        ..RunOptions::default()
    })
    .expect("run");

    let text = fs::read_to_string(&out).expect("snapshot file");
    let snapshot: WorldSnapshot = serde_json::from_str(&text).expect("parse snapshot");
    assert_eq!(snapshot.tick.0, report.ticks);
    assert_eq!(snapshot.agents.len(), report.final_population);
    assert_eq!(snapshot.aggregates.population, report.final_population);
}

#[test]
fn config_file_overrides_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.json");
    fs::write(&path, r#"{ "initial_agents": 4, "rng_seed": 9, "tribal": { "check_interval": 5 } }"#)
        .expect("write config");
    let config = load_config(Some(&path)).expect("config");
    assert_eq!(config.initial_agents, 4);
    assert_eq!(config.rng_seed, Some(9));
    assert_eq!(config.tribal.check_interval, 5);

    let report = run(&RunOptions {
        config: Some(path),
        ticks: 5,
        ..RunOptions::default()
    })
    .expect("run");
    assert!(report.final_population <= 4 + report.births);
}

#[test]
fn unknown_config_keys_are_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("bad.json");
    fs::write(&path, r#"{ "agent_count": 10 }"#).expect("write config");
    let err = load_config(Some(&path)).expect_err("unknown key");
    assert!(format!("{err:#}").contains("invalid config"));
}

#[test]
fn binary_runs_headless() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = dir.path().join("final.json");
    let status = Command::new(env!("CARGO_BIN_EXE_cogvrs"))
        .args(["--ticks", "20", "--seed", "3", "--snapshot"])
        .arg(&out)
        .env("RUST_LOG", "off")
        .status()
        .expect("failed to run cogvrs binary");
    assert!(status.success(), "headless run failed");
    assert!(out.exists());
}
