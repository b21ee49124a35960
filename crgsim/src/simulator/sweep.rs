//! Frequency sweep driver.
//!
//! Walks candidate operating frequencies, reprograms the main PLL's
//! intermediate divider over the register bus, waits for the cascade to
//! relock, measures the achieved clock with the cycle counter and runs a
//! memory test.
//!
//! ```text
//! Idle -> Reconfiguring -> AwaitingLock -> Testing -> Recording -> (next) | Done
//!                               |                        ^
//!                               `-> Failed --------------'
//! ```
//!
//! A measurement window disturbed by reset or lock loss goes back to
//! `AwaitingLock` once. Global reset before lock abandons the sweep to `Idle`.

use super::bus::{BenchBus, PllDrp};
use super::config::config::SweepSection;
use super::memtest::{MemTestReport, MemoryTester};
use crate::arch::counter::CounterSnapshot;
use crate::arch::crg::{ClockPlan, MAIN_INTERMEDIATE};
use crate::arch::csr;
use crate::arch::drp::{ClkReg1, ReconfigStatus};
use crate::arch::pll::PllLimits;
use crate::arch::Rate;
use crate::error::{Error, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// When the sweep ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopPolicy {
  /// Try every candidate
  #[default]
  ExhaustRange,
  /// Stop at the first locked candidate that fails, or the first lock timeout
  FirstFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SweepState {
  Idle,
  Reconfiguring,
  AwaitingLock,
  Testing,
  Recording,
  Done,
  Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
  Passed,
  TestFailed,
  LockTimeout,
  OutOfRange,
}

impl Outcome {
  /// Counts as a failure boundary for [`StopPolicy::FirstFailure`]
  pub fn is_failure(self) -> bool {
    matches!(self, Outcome::TestFailed | Outcome::LockTimeout)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepEntry {
  pub requested_hz: u64,
  pub divider: u32,
  /// Intermediate clock the divider yields
  pub expected_hz: f64,
  /// Measured with the cycle counter
  pub achieved_hz: Option<f64>,
  pub locked: bool,
  pub test_passed: bool,
  pub outcome: Outcome,
  /// Copied from an earlier candidate with the same divider
  pub reused: bool,
  pub memtest: Option<MemTestReport>,
  pub detail: Option<String>,
}

impl SweepEntry {
  fn rejected(requested_hz: u64, divider: u32, expected_hz: f64, detail: String) -> Self {
    Self {
      requested_hz,
      divider,
      expected_hz,
      achieved_hz: None,
      locked: false,
      test_passed: false,
      outcome: Outcome::OutOfRange,
      reused: false,
      memtest: None,
      detail: Some(detail),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopReason {
  RangeExhausted,
  FailureBoundary,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepResult {
  pub entries: Vec<SweepEntry>,
  pub stop: Option<StopReason>,
}

impl SweepResult {
  pub fn finalize(&mut self, reason: StopReason) {
    self.stop = Some(reason);
  }

  pub fn is_final(&self) -> bool {
    self.stop.is_some()
  }

  /// Highest passing candidate by measured frequency
  pub fn max_passing(&self) -> Option<&SweepEntry> {
    self
      .entries
      .iter()
      .filter(|e| e.outcome == Outcome::Passed)
      .max_by(|a, b| {
        let (fa, fb) = (a.achieved_hz.unwrap_or(a.expected_hz), b.achieved_hz.unwrap_or(b.expected_hz));
        fa.total_cmp(&fb).then(a.requested_hz.cmp(&b.requested_hz))
      })
  }

  pub fn count(&self, outcome: Outcome) -> usize {
    self.entries.iter().filter(|e| e.outcome == outcome).count()
  }
}

/// Cascade PLL settings the candidates have to stay compatible with
#[derive(Debug, Clone, PartialEq)]
pub struct CascadeLimits {
  pub mult: u32,
  pub divclk: u32,
  pub limits: PllLimits,
}

#[derive(Debug, Clone)]
pub struct SweepParams {
  pub freq_min: u64,
  pub freq_max: u64,
  pub freq_step: u64,
  pub vco_freq: u64,
  pub ref_hz: u64,
  pub main_limits: PllLimits,
  pub cascade: CascadeLimits,
  pub measure_window: Duration,
  pub poll_interval: Duration,
  pub lock_poll_limit: u32,
  pub stop_policy: StopPolicy,
  pub skip_duplicate_dividers: bool,
  pub validate_candidates: bool,
}

impl SweepParams {
  pub fn from_config(sweep: &SweepSection, plan: &ClockPlan) -> Self {
    Self {
      freq_min: sweep.freq_min,
      freq_max: sweep.freq_max,
      freq_step: sweep.freq_step,
      vco_freq: sweep.vco_freq.unwrap_or(plan.main_pll.vco.round() as u64),
      ref_hz: plan.reference.frequency,
      main_limits: plan.main_pll.limits,
      cascade: CascadeLimits {
        mult: plan.sys_pll.params.mult,
        divclk: plan.sys_pll.params.divclk,
        limits: plan.sys_pll.limits,
      },
      measure_window: Duration::from_micros(sweep.measure_window_us),
      poll_interval: Duration::from_micros(sweep.poll_interval_us),
      lock_poll_limit: sweep.lock_poll_limit,
      stop_policy: sweep.stop_policy,
      skip_duplicate_dividers: sweep.skip_duplicate_dividers,
      validate_candidates: sweep.validate_candidates,
    }
  }

  /// `freq_min..=freq_max` in `freq_step` increments
  pub fn candidates(&self) -> impl Iterator<Item = u64> {
    let step = self.freq_step.max(1);
    let max = self.freq_max;
    std::iter::successors(Some(self.freq_min), move |f| f.checked_add(step)).take_while(move |&f| f <= max)
  }

  /// Nearest output divider for `freq`
  pub fn divider_for(&self, freq: u64) -> u32 {
    let freq = freq.max(1);
    ((self.vco_freq + freq / 2) / freq).clamp(1, u32::MAX as u64) as u32
  }

  pub fn expected_hz(&self, divider: u32) -> f64 {
    Rate::from_hz(self.vco_freq).scale(1, divider.max(1) as u64).hz()
  }

  /// Range checks done before the port is touched.
  pub fn prevalidate(&self, divider: u32) -> Result<()> {
    self.main_limits.check_clkout_div(divider)?;
    ClkReg1::for_divider(divider)?;
    let intermediate = Rate::from_hz(self.vco_freq).scale(1, divider as u64);
    let cascade = &self.cascade;
    cascade.limits.check_clkin(intermediate)?;
    cascade
      .limits
      .check_vco(intermediate.scale(cascade.mult as u64, cascade.divclk as u64))?;
    Ok(())
  }

  fn poll_cycles(&self, polls: u32) -> u64 {
    (self.poll_interval.as_nanos() * self.ref_hz as u128 / 1_000_000_000) as u64 * polls as u64
  }
}

enum LockWait {
  Locked { polls: u32 },
  TimedOut { polls: u32 },
}

pub struct FrequencySweep<T: MemoryTester> {
  params: SweepParams,
  tester: T,
  state: SweepState,
  history: Vec<SweepState>,
  result: SweepResult,
}

impl<T: MemoryTester> FrequencySweep<T> {
  pub fn new(params: SweepParams, tester: T) -> Self {
    Self {
      params,
      tester,
      state: SweepState::Idle,
      history: vec![SweepState::Idle],
      result: SweepResult::default(),
    }
  }

  pub fn params(&self) -> &SweepParams {
    &self.params
  }

  pub fn state(&self) -> SweepState {
    self.state
  }

  /// Every state entered so far, starting with `Idle`
  pub fn history(&self) -> &[SweepState] {
    &self.history
  }

  pub fn result(&self) -> &SweepResult {
    &self.result
  }

  pub fn into_result(self) -> SweepResult {
    self.result
  }

  fn transition(&mut self, next: SweepState) {
    if next != self.state {
      debug!("sweep: {:?} -> {:?}", self.state, next);
      self.state = next;
      self.history.push(next);
    }
  }

  /// Run the whole sweep.
  ///
  /// A global reset while waiting for lock abandons the sweep: the state
  /// returns to `Idle` and [`Error::ResetDuringReconfiguration`] is returned.
  /// Entries recorded so far stay in [`result`](Self::result).
  pub fn run(&mut self, bus: &mut dyn BenchBus) -> Result<&SweepResult> {
    self.result = SweepResult::default();
    self.transition(SweepState::Idle);

    let mut measured: HashMap<u32, usize> = HashMap::new();
    let candidates: Vec<u64> = self.params.candidates().collect();
    info!(
      "sweep: {} candidates {:.1}..{:.1} MHz, vco {:.1} MHz",
      candidates.len(),
      self.params.freq_min as f64 / 1e6,
      self.params.freq_max as f64 / 1e6,
      self.params.vco_freq as f64 / 1e6
    );

    for requested in candidates {
      let divider = self.params.divider_for(requested);
      let expected = self.params.expected_hz(divider);

      let entry = match self.check(divider) {
        Err(e) => {
          warn!("sweep: {:.1} MHz rejected: {}", requested as f64 / 1e6, e);
          SweepEntry::rejected(requested, divider, expected, e.to_string())
        },
        Ok(()) => match measured.get(&divider).copied().filter(|_| self.params.skip_duplicate_dividers) {
          Some(idx) => SweepEntry {
            requested_hz: requested,
            reused: true,
            ..self.result.entries[idx].clone()
          },
          None => {
            let entry = self.attempt(bus, requested, divider, expected)?;
            if entry.outcome != Outcome::OutOfRange {
              measured.insert(divider, self.result.entries.len());
            }
            entry
          },
        },
      };

      self.transition(SweepState::Recording);
      info!(
        "sweep: {:>7.3} MHz div {:>3} -> {:?}{}",
        requested as f64 / 1e6,
        divider,
        entry.outcome,
        if entry.reused { " (reused)" } else { "" }
      );
      let boundary = entry.outcome.is_failure() && self.params.stop_policy == StopPolicy::FirstFailure;
      self.result.entries.push(entry);
      if boundary {
        info!("sweep: failure boundary at {:.3} MHz", requested as f64 / 1e6);
        self.result.finalize(StopReason::FailureBoundary);
        self.transition(SweepState::Done);
        return Ok(&self.result);
      }
    }

    self.result.finalize(StopReason::RangeExhausted);
    self.transition(SweepState::Done);
    Ok(&self.result)
  }

  fn check(&self, divider: u32) -> Result<()> {
    if self.params.validate_candidates {
      self.params.prevalidate(divider)
    } else {
      // the port still refuses dividers it cannot encode
      ClkReg1::for_divider(divider).map(|_| ())
    }
  }

  fn attempt(&mut self, bus: &mut dyn BenchBus, requested: u64, divider: u32, expected: f64) -> Result<SweepEntry> {
    self.transition(SweepState::Reconfiguring);
    let status = {
      let mut drp = PllDrp::new(bus);
      drp.set_clkout_divider(MAIN_INTERMEDIATE, divider, 0.0)?;
      let staged = drp.clkout_divider(MAIN_INTERMEDIATE)?;
      if staged != divider {
        return Err(Error::InvalidDrpField {
          field: "clkout_divide",
          value: staged,
        });
      }
      drp.commit()?;
      drp.status()?
    };
    if status.contains(ReconfigStatus::REJECTED) {
      if bus.read(csr::CRG_RESET_STATUS)? & csr::RESET_GLOBAL != 0 {
        warn!("sweep: global reset while reconfiguring, back to idle");
        self.transition(SweepState::Idle);
        return Err(Error::ResetDuringReconfiguration);
      }
      return Err(Error::PortBusy);
    }
    if status.contains(ReconfigStatus::RANGE_ERROR) {
      return Ok(SweepEntry::rejected(
        requested,
        divider,
        expected,
        "reconfiguration port reported a range error".to_string(),
      ));
    }

    self.transition(SweepState::AwaitingLock);
    let polls = match self.await_lock(bus)? {
      LockWait::Locked { polls } => polls,
      LockWait::TimedOut { polls } => {
        self.transition(SweepState::Failed);
        let err = Error::LockTimeout {
          requested_hz: requested,
          cycles: self.params.poll_cycles(polls),
        };
        warn!("sweep: {}", err);
        return Ok(SweepEntry {
          outcome: Outcome::LockTimeout,
          detail: Some(err.to_string()),
          ..SweepEntry::rejected(requested, divider, expected, String::new())
        });
      },
    };
    debug!("sweep: locked after {} polls", polls);

    self.transition(SweepState::Testing);
    let achieved = match self.measure(bus)? {
      Some(hz) => hz,
      None => {
        warn!("sweep: clocks disturbed during the measurement window, waiting for lock again");
        self.transition(SweepState::AwaitingLock);
        let relocked = matches!(self.await_lock(bus)?, LockWait::Locked { .. });
        self.transition(SweepState::Testing);
        let remeasured = if relocked { self.measure(bus)? } else { None };
        match remeasured {
          Some(hz) => hz,
          None => {
            self.transition(SweepState::Failed);
            return Ok(SweepEntry {
              outcome: Outcome::TestFailed,
              locked: relocked,
              ..SweepEntry::rejected(
                requested,
                divider,
                expected,
                "operating clock not stable for a full measurement window".to_string(),
              )
            });
          },
        }
      },
    };
    // a failing write or read is this candidate's failure, not the sweep's
    let (report, detail) = match self.tester.run(bus) {
      Ok(report) => (report, None),
      Err(e) => (MemTestReport::default(), Some(e.to_string())),
    };
    let passed = detail.is_none() && report.passed();
    Ok(SweepEntry {
      requested_hz: requested,
      divider,
      expected_hz: expected,
      achieved_hz: Some(achieved),
      locked: true,
      test_passed: passed,
      outcome: if passed { Outcome::Passed } else { Outcome::TestFailed },
      reused: false,
      memtest: Some(report),
      detail,
    })
  }

  fn await_lock(&mut self, bus: &mut dyn BenchBus) -> Result<LockWait> {
    for poll in 1..=self.params.lock_poll_limit {
      bus.sleep(self.params.poll_interval);
      let status = PllDrp::new(bus).status()?;
      if bus.read(csr::CRG_RESET_STATUS)? & csr::RESET_GLOBAL != 0 || status.contains(ReconfigStatus::ABORTED) {
        warn!("sweep: global reset while awaiting lock, back to idle");
        self.transition(SweepState::Idle);
        return Err(Error::ResetDuringReconfiguration);
      }
      if status.contains(ReconfigStatus::TIMEOUT) {
        return Ok(LockWait::TimedOut { polls: poll });
      }
      let locked = bus.read(csr::CRG_PLL_LOCKED)? == csr::PLL_LOCKED_MAIN | csr::PLL_LOCKED_SYS;
      let calibrated = bus.read(csr::CRG_IDELAYCTRL_STATUS)? & csr::IDELAYCTRL_READY != 0;
      if status.contains(ReconfigStatus::DONE) && locked && calibrated {
        return Ok(LockWait::Locked { polls: poll });
      }
    }
    Ok(LockWait::TimedOut {
      polls: self.params.lock_poll_limit,
    })
  }

  /// Out of reset, both PLLs locked, no aborted request.
  fn clocks_settled(&mut self, bus: &mut dyn BenchBus) -> Result<bool> {
    let reset = bus.read(csr::CRG_RESET_STATUS)? & csr::RESET_GLOBAL != 0;
    let locked = bus.read(csr::CRG_PLL_LOCKED)? == csr::PLL_LOCKED_MAIN | csr::PLL_LOCKED_SYS;
    let aborted = PllDrp::new(bus).status()?.contains(ReconfigStatus::ABORTED);
    Ok(!reset && locked && !aborted)
  }

  /// Operating clock frequency from two counter snapshots one window apart.
  ///
  /// The window is slept in poll-interval slices with the lock and reset
  /// status checked after each one. `None` if the clocks were disturbed at
  /// any check, since the counter clears on reset.
  fn measure(&mut self, bus: &mut dyn BenchBus) -> Result<Option<f64>> {
    if !self.clocks_settled(bus)? {
      return Ok(None);
    }
    let before = CounterSnapshot {
      value: bus.read(csr::CRG_SYS_CLK_COUNTER)?,
    };
    let window = self.params.measure_window;
    let mut elapsed = Duration::ZERO;
    while elapsed < window {
      let slice = self.params.poll_interval.max(Duration::from_nanos(1)).min(window - elapsed);
      bus.sleep(slice);
      elapsed += slice;
      if !self.clocks_settled(bus)? {
        return Ok(None);
      }
    }
    let after = CounterSnapshot {
      value: bus.read(csr::CRG_SYS_CLK_COUNTER)?,
    };
    Ok(Some(after.cycles_since(before) as f64 / window.as_secs_f64()))
  }
}
