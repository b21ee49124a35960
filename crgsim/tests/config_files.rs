use crgsim::simulator::config::{load_config, load_default_config};
use crgsim::simulator::sweep::{Outcome, StopReason};
use crgsim::simulator::utils::log::init_log;
use crgsim::Simulator;
use std::fs;
use std::path::Path;

const BENCH_TOML: &str = r#"
[crg]
lock_cycles = 50
lock_timeout_cycles = 1000

[sweep]
freq_min = 120000000
freq_max = 150000000
freq_step = 30000000
poll_interval_us = 1
lock_poll_limit = 20
payload = "pattern.bin"

[simulation]
quiet = true
out_dir = "out"
trace_file = "out/sweep.jsonl"
"#;

fn write_bench(dir: &Path) -> std::path::PathBuf {
  let path = dir.join("bench.toml");
  fs::write(&path, BENCH_TOML).unwrap();
  let payload: Vec<u8> = (0u32..16).flat_map(|i| (i * 0x0101_0101).to_le_bytes()).collect();
  fs::write(dir.join("pattern.bin"), payload).unwrap();
  path
}

#[test]
fn user_file_layers_over_defaults() {
  let dir = tempfile::tempdir().unwrap();
  let config = load_config(Some(&write_bench(dir.path()))).unwrap();
  let defaults = load_default_config().unwrap();

  assert_eq!(config.crg.lock_cycles, 50);
  assert_eq!(config.crg.sys_clk_freq, defaults.crg.sys_clk_freq);
  assert_eq!(config.sdram, defaults.sdram);
  assert_eq!(config.sweep.payload.as_deref(), Some(dir.path().join("pattern.bin").as_path()));
  assert_eq!(config.simulation.out_dir, dir.path().join("out"));
}

#[test]
fn missing_user_file_is_an_error() {
  let dir = tempfile::tempdir().unwrap();
  assert!(load_config(Some(&dir.path().join("absent.toml"))).is_err());
}

#[test]
fn build_writes_register_map_and_clock_plan() {
  init_log(true);
  let dir = tempfile::tempdir().unwrap();
  let config = load_config(Some(&write_bench(dir.path()))).unwrap();
  let simulator = Simulator::from_app_config(&config).unwrap();

  let artifacts = simulator.build().unwrap();
  let csv = fs::read_to_string(&artifacts.csr_csv).unwrap();
  assert!(csv.contains("csr_register,crg_sys_clk_counter,0x00000000,1,ro"));
  assert!(csv.contains("memory_region,main_ram,0x40000000"));

  let plan: toml::Value = toml::from_str(&fs::read_to_string(&artifacts.clock_plan).unwrap()).unwrap();
  assert_eq!(plan["reference"]["frequency"].as_integer(), Some(100_000_000));
  assert_eq!(plan["main_pll"]["params"]["mult"].as_integer(), Some(12));
  assert_eq!(plan["sys_pll"]["params"]["mult"].as_integer(), Some(8));
}

#[test]
fn load_then_test_uses_the_payload_and_writes_a_trace() {
  init_log(true);
  let dir = tempfile::tempdir().unwrap();
  let config = load_config(Some(&write_bench(dir.path()))).unwrap();
  let mut simulator = Simulator::from_app_config(&config).unwrap();

  assert!(simulator.load().unwrap() > 0);
  assert!(simulator.bench().crg().ready());

  let result = simulator.test().unwrap();
  assert_eq!(result.stop, Some(StopReason::RangeExhausted));
  assert_eq!(result.entries.len(), 2);
  for entry in &result.entries {
    assert_eq!(entry.outcome, Outcome::Passed);
    assert_eq!(entry.memtest.as_ref().map(|m| m.words), Some(16));
  }

  let trace = fs::read_to_string(dir.path().join("out/sweep.jsonl")).unwrap();
  let lines: Vec<serde_json::Value> = trace.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
  assert_eq!(lines.len(), 2);
  assert_eq!(lines[0]["requested_hz"], 120_000_000);
  assert_eq!(lines[1]["outcome"], "passed");
}

#[test]
fn missing_payload_fails_the_load() {
  let dir = tempfile::tempdir().unwrap();
  let path = write_bench(dir.path());
  fs::remove_file(dir.path().join("pattern.bin")).unwrap();
  let config = load_config(Some(&path)).unwrap();
  let mut simulator = Simulator::from_app_config(&config).unwrap();
  assert!(matches!(simulator.load(), Err(crgsim::Error::Payload { .. })));
}

#[test]
fn payload_larger_than_the_window_is_refused() {
  let dir = tempfile::tempdir().unwrap();
  let mut config = load_config(Some(&write_bench(dir.path()))).unwrap();
  // 16 words against 8
  config.sdram.size = 0x20;
  let mut simulator = Simulator::from_app_config(&config).unwrap();
  assert!(matches!(
    simulator.load(),
    Err(crgsim::Error::PayloadTooLarge { words: 16, window: 0x20 })
  ));
  assert!(matches!(simulator.test(), Err(crgsim::Error::PayloadTooLarge { .. })));
}

#[test]
#[cfg(feature = "long-tests")]
fn default_sweep_covers_the_whole_range() {
  init_log(true);
  let mut config = load_default_config().unwrap();
  config.simulation.quiet = true;
  let mut simulator = Simulator::from_app_config(&config).unwrap();
  let result = simulator.test().unwrap();
  assert_eq!(result.entries.len(), 91);
  assert_eq!(result.max_passing().map(|e| e.requested_hz), Some(150_000_000));
}
