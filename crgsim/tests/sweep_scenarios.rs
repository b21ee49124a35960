use crgsim::arch::csr;
use crgsim::arch::drp::ReconfigStatus;
use crgsim::simulator::bench::Bench;
use crgsim::simulator::bus::BenchBus;
use crgsim::simulator::config::AppConfig;
use crgsim::simulator::memtest::PatternMemTest;
use crgsim::simulator::sweep::{FrequencySweep, Outcome, StopPolicy, StopReason, SweepParams, SweepState};
use crgsim::simulator::utils::log::init_log;
use crgsim::Error;
use std::time::Duration;

fn fast_config() -> AppConfig {
  let mut config = AppConfig::default();
  config.crg.lock_cycles = 50;
  config.crg.lock_timeout_cycles = 1_000;
  config.sweep.poll_interval_us = 1;
  config.sweep.lock_poll_limit = 20;
  config.sweep.measure_window_us = 100;
  config.sweep.payload_words = 32;
  config
}

fn powered_bench(config: &AppConfig) -> Bench {
  init_log(true);
  let mut bench = Bench::new(config).expect("bench elaborates");
  bench.power_on(10_000).expect("bench comes up");
  bench
}

fn sweep(config: &AppConfig, bench: &Bench) -> FrequencySweep<PatternMemTest> {
  let params = SweepParams::from_config(&config.sweep, bench.crg().plan());
  let tester = PatternMemTest::random(config.sdram.base, config.sweep.payload_words, 7);
  FrequencySweep::new(params, tester)
}

#[test]
fn nominal_150mhz_locks_and_measures_within_tolerance() {
  let mut config = fast_config();
  config.sweep.freq_min = 150_000_000;
  config.sweep.freq_max = 150_000_000;
  let mut bench = powered_bench(&config);
  let mut sweep = sweep(&config, &bench);

  let result = sweep.run(&mut bench).unwrap();
  assert_eq!(result.entries.len(), 1);
  let entry = &result.entries[0];
  assert_eq!(entry.outcome, Outcome::Passed);
  assert!(entry.locked);
  let achieved = entry.achieved_hz.unwrap();
  assert!((achieved - 150e6).abs() / 150e6 < 1e-3, "measured {}", achieved);
  assert_eq!(bench.read(csr::CRG_PLL_LOCKED).unwrap(), 0b11);
}

#[test]
fn sweep_60_to_150_records_every_step() {
  let config = fast_config();
  let mut bench = powered_bench(&config);
  let mut sweep = sweep(&config, &bench);

  let result = sweep.run(&mut bench).unwrap().clone();
  assert_eq!(result.entries.len(), 91);
  assert_eq!(result.stop, Some(StopReason::RangeExhausted));
  assert_eq!(sweep.state(), SweepState::Done);

  for (i, entry) in result.entries.iter().enumerate() {
    assert_eq!(entry.requested_hz, 60_000_000 + i as u64 * 1_000_000);
    // the cascade VCO (8x its input) needs at least 100 MHz in
    if entry.expected_hz < 100e6 {
      assert_eq!(entry.outcome, Outcome::OutOfRange, "{:?}", entry);
      assert!(!entry.locked);
      assert!(entry.achieved_hz.is_none());
    } else {
      assert!(entry.locked, "{:?}", entry);
      assert_eq!(entry.outcome, Outcome::Passed);
    }
  }
  assert_eq!(result.entries[0].outcome, Outcome::OutOfRange);
  assert_eq!(result.max_passing().map(|e| e.divider), Some(8));
}

#[test]
fn duplicate_dividers_reuse_the_first_measurement() {
  let mut config = fast_config();
  config.sweep.freq_min = 97_000_000;
  config.sweep.freq_max = 99_000_000;
  let mut bench = powered_bench(&config);
  let result = sweep(&config, &bench).run(&mut bench).unwrap().clone();

  assert_eq!(result.entries.len(), 3);
  assert!(result.entries.iter().all(|e| e.divider == 12));
  assert!(!result.entries[0].reused);
  assert!(result.entries[1].reused && result.entries[2].reused);
  assert_eq!(result.entries[1].achieved_hz, result.entries[0].achieved_hz);
  assert_eq!(result.entries[2].requested_hz, 99_000_000);

  config.sweep.skip_duplicate_dividers = false;
  let result = sweep(&config, &bench).run(&mut bench).unwrap().clone();
  assert!(result.entries.iter().all(|e| !e.reused && e.locked));
}

#[test]
fn functional_limit_sets_the_boundary() {
  let mut config = fast_config();
  config.sweep.freq_min = 100_000_000;
  config.sdram.max_functional_freq = 125_000_000;
  let mut bench = powered_bench(&config);
  let result = sweep(&config, &bench).run(&mut bench).unwrap().clone();

  let best = result.max_passing().unwrap();
  assert_eq!(best.divider, 10);
  assert!(result
    .entries
    .iter()
    .filter(|e| e.divider <= 9)
    .all(|e| e.outcome == Outcome::TestFailed && e.locked));
}

#[test]
fn first_failure_policy_stops_at_the_boundary() {
  let mut config = fast_config();
  config.sweep.freq_min = 100_000_000;
  config.sweep.stop_policy = StopPolicy::FirstFailure;
  config.sdram.max_functional_freq = 125_000_000;
  let mut bench = powered_bench(&config);
  let result = sweep(&config, &bench).run(&mut bench).unwrap().clone();

  assert_eq!(result.stop, Some(StopReason::FailureBoundary));
  let last = result.entries.last().unwrap();
  assert_eq!(last.outcome, Outcome::TestFailed);
  assert_eq!(last.requested_hz, 127_000_000);
  assert_eq!(result.count(Outcome::TestFailed), 1);
}

#[test]
fn out_of_range_does_not_end_a_first_failure_sweep() {
  let mut config = fast_config();
  config.sweep.freq_min = 90_000_000;
  config.sweep.freq_max = 100_000_000;
  config.sweep.stop_policy = StopPolicy::FirstFailure;
  let mut bench = powered_bench(&config);
  let result = sweep(&config, &bench).run(&mut bench).unwrap().clone();

  assert_eq!(result.entries.len(), 11);
  assert_eq!(result.stop, Some(StopReason::RangeExhausted));
  assert!(result.count(Outcome::OutOfRange) > 0);
}

#[test]
fn unvalidated_candidate_times_out_waiting_for_the_cascade() {
  let mut config = fast_config();
  config.sweep.freq_min = 60_000_000;
  config.sweep.freq_max = 60_000_000;
  config.sweep.validate_candidates = false;
  let mut bench = powered_bench(&config);
  let mut sweep = sweep(&config, &bench);

  let result = sweep.run(&mut bench).unwrap();
  let entry = &result.entries[0];
  assert_eq!(entry.outcome, Outcome::LockTimeout);
  assert!(!entry.locked);
  assert!(entry.detail.as_deref().unwrap_or_default().contains("did not lock"));
  assert!(sweep.history().contains(&SweepState::Failed));
  assert_eq!(sweep.state(), SweepState::Done);
  // main PLL relocked, the cascade is stuck hunting
  assert_eq!(bench.read(csr::CRG_PLL_LOCKED).unwrap(), csr::PLL_LOCKED_MAIN);
}

/// Asserts global reset on the first wait after a commit.
struct ResetWhileLocking<'a> {
  bench: &'a mut Bench,
  armed: bool,
}

impl BenchBus for ResetWhileLocking<'_> {
  fn read(&mut self, addr: u32) -> crgsim::Result<u32> {
    self.bench.read(addr)
  }

  fn write(&mut self, addr: u32, value: u32) -> crgsim::Result<()> {
    if addr == csr::DRP_COMMIT {
      self.armed = true;
    }
    self.bench.write(addr, value)
  }

  fn sleep(&mut self, duration: Duration) {
    if std::mem::take(&mut self.armed) {
      self.bench.crg_mut().set_system_ready(false);
    }
    self.bench.sleep(duration)
  }
}

#[test]
fn reset_while_awaiting_lock_returns_to_idle() {
  let mut config = fast_config();
  config.sweep.freq_min = 120_000_000;
  config.sweep.freq_max = 150_000_000;
  config.sweep.freq_step = 30_000_000;
  let mut bench = powered_bench(&config);
  let mut sweep = sweep(&config, &bench);

  let err = {
    let mut bus = ResetWhileLocking {
      bench: &mut bench,
      armed: false,
    };
    sweep.run(&mut bus).unwrap_err()
  };
  assert!(matches!(err, Error::ResetDuringReconfiguration));
  assert_eq!(sweep.state(), SweepState::Idle);
  assert!(!sweep.history().contains(&SweepState::Failed));
  assert!(sweep.result().entries.is_empty());
  assert!(!sweep.result().is_final());
  assert_eq!(bench.read(csr::CRG_PLL_LOCKED).unwrap(), 0);
  let status = ReconfigStatus::from_bits_truncate(bench.read(csr::DRP_STATUS).unwrap());
  assert!(status.contains(ReconfigStatus::ABORTED));

  // restart from Idle once the system is back
  bench.crg_mut().set_system_ready(true);
  bench.power_on(10_000).unwrap();
  let result = sweep.run(&mut bench).unwrap();
  assert_eq!(result.entries.len(), 2);
  assert!(result.entries.iter().all(|e| e.outcome == Outcome::Passed));
}

/// Asserts global reset on the first DRP address write, before the commit.
struct ResetWhileStaging<'a> {
  bench: &'a mut Bench,
  fired: bool,
}

impl BenchBus for ResetWhileStaging<'_> {
  fn read(&mut self, addr: u32) -> crgsim::Result<u32> {
    self.bench.read(addr)
  }

  fn write(&mut self, addr: u32, value: u32) -> crgsim::Result<()> {
    if addr == csr::DRP_ADR && !self.fired {
      self.fired = true;
      self.bench.crg_mut().set_system_ready(false);
    }
    self.bench.write(addr, value)
  }

  fn sleep(&mut self, duration: Duration) {
    self.bench.sleep(duration)
  }
}

#[test]
fn reset_while_reconfiguring_returns_to_idle() {
  let mut config = fast_config();
  config.sweep.freq_min = 120_000_000;
  config.sweep.freq_max = 120_000_000;
  let mut bench = powered_bench(&config);
  let mut sweep = sweep(&config, &bench);

  let err = {
    let mut bus = ResetWhileStaging {
      bench: &mut bench,
      fired: false,
    };
    sweep.run(&mut bus).unwrap_err()
  };
  assert!(matches!(err, Error::ResetDuringReconfiguration));
  assert_eq!(sweep.state(), SweepState::Idle);
  assert!(sweep.history().contains(&SweepState::Reconfiguring));
  assert!(!sweep.history().contains(&SweepState::Failed));
  let status = ReconfigStatus::from_bits_truncate(bench.read(csr::DRP_STATUS).unwrap());
  assert!(status.contains(ReconfigStatus::REJECTED));

  bench.crg_mut().set_system_ready(true);
  bench.power_on(10_000).unwrap();
  let result = sweep.run(&mut bench).unwrap();
  assert_eq!(result.entries[0].outcome, Outcome::Passed);
  assert_eq!(result.entries[0].divider, 10);
}

/// Pulses global reset for 10 ticks at the end of the first wait after a counter read.
struct ResetPulseWhileMeasuring<'a> {
  bench: &'a mut Bench,
  armed: bool,
  pulses_left: u32,
}

impl BenchBus for ResetPulseWhileMeasuring<'_> {
  fn read(&mut self, addr: u32) -> crgsim::Result<u32> {
    if addr == csr::CRG_SYS_CLK_COUNTER && self.pulses_left > 0 {
      self.armed = true;
    }
    self.bench.read(addr)
  }

  fn write(&mut self, addr: u32, value: u32) -> crgsim::Result<()> {
    self.bench.write(addr, value)
  }

  fn sleep(&mut self, duration: Duration) {
    self.bench.sleep(duration);
    if std::mem::take(&mut self.armed) {
      self.pulses_left -= 1;
      self.bench.crg_mut().set_system_ready(false);
      self.bench.tick(10);
      self.bench.crg_mut().set_system_ready(true);
    }
  }
}

fn measured_with_pulses(pulses: u32) -> (crgsim::simulator::sweep::SweepResult, Vec<SweepState>) {
  let mut config = fast_config();
  config.sweep.freq_min = 150_000_000;
  config.sweep.freq_max = 150_000_000;
  let mut bench = powered_bench(&config);
  let mut sweep = sweep(&config, &bench);
  let mut bus = ResetPulseWhileMeasuring {
    bench: &mut bench,
    armed: false,
    pulses_left: pulses,
  };
  let result = sweep.run(&mut bus).unwrap().clone();
  (result, sweep.history().to_vec())
}

#[test]
fn reset_pulse_inside_the_window_is_remeasured() {
  let (result, history) = measured_with_pulses(1);
  let entry = &result.entries[0];
  assert_eq!(entry.outcome, Outcome::Passed);
  let achieved = entry.achieved_hz.unwrap();
  assert!((achieved - 150e6).abs() / 150e6 < 1e-3, "measured {}", achieved);
  let relocks = history.iter().filter(|&&s| s == SweepState::AwaitingLock).count();
  assert_eq!(relocks, 2);
}

#[test]
fn repeated_disturbance_fails_the_candidate_without_a_frequency() {
  let (result, history) = measured_with_pulses(2);
  let entry = &result.entries[0];
  assert_eq!(entry.outcome, Outcome::TestFailed);
  assert!(entry.achieved_hz.is_none());
  assert!(entry.detail.as_deref().unwrap_or_default().contains("not stable"));
  assert!(history.contains(&SweepState::Failed));
  assert_eq!(result.stop, Some(StopReason::RangeExhausted));
  assert!(result.max_passing().is_none());
}

#[test]
fn memory_test_errors_are_recorded_per_candidate() {
  let mut config = fast_config();
  config.sweep.freq_min = 120_000_000;
  config.sweep.freq_max = 150_000_000;
  config.sweep.freq_step = 30_000_000;
  config.sdram.size = 0x40;
  let mut bench = powered_bench(&config);
  // 32 words overrun the 16-word window
  let params = SweepParams::from_config(&config.sweep, bench.crg().plan());
  let mut sweep = FrequencySweep::new(params, PatternMemTest::random(config.sdram.base, 32, 7));

  let result = sweep.run(&mut bench).unwrap();
  assert_eq!(result.entries.len(), 2);
  for entry in &result.entries {
    assert!(entry.locked);
    assert_eq!(entry.outcome, Outcome::TestFailed);
    assert!(entry.detail.as_deref().unwrap_or_default().contains("unmapped"));
  }
  assert_eq!(result.stop, Some(StopReason::RangeExhausted));
}
