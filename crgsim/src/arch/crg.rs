//! Clock/reset generator top: the stage graph evaluated once per reference tick.
//!
//! ```text
//! clk100 -> main_pll --locked--> sys_pll -> sys, sys4x, sys4x_dqs -> counter, PHY
//!              |        \
//!              |         `-> clk200 -> idelayctrl
//!              `-> uart
//! ```

use super::clock::{ClockDomain, Rate};
use super::counter::{CounterReader, CounterSnapshot, CycleCounter};
use super::csr::DrpCsr;
use super::idelayctrl::CalibrationStage;
use super::main_pll::{ReferenceLockStage, StageTiming};
use super::pll::{compute_config, LockState, PllLimits, PllParams};
use super::sys_pll::CascadeStage;
use crate::builtin::Module;
use crate::error::{Error, Result};
use log::{debug, info};
use serde::Serialize;

/// Output of the reference lock stage that feeds the cascade
pub const MAIN_INTERMEDIATE: usize = 0;
/// Output of the reference lock stage that feeds calibration
pub const MAIN_CALIBRATION: usize = 1;

/// Build-time description of the clock tree
#[derive(Debug, Clone, PartialEq)]
pub struct CrgSpec {
  pub ref_name: String,
  pub ref_hz: u64,
  pub sys_clk_freq: u64,
  pub idelay_freq: u64,
  pub uart_freq: u64,
  pub ratio: u32,
  pub speedgrade: i32,
  pub margin: f64,
  pub timing: StageTiming,
  pub idelayctrl_reset_cycles: u32,
}

impl Default for CrgSpec {
  fn default() -> Self {
    Self {
      ref_name: "clk100".to_string(),
      ref_hz: 100_000_000,
      sys_clk_freq: 150_000_000,
      idelay_freq: 200_000_000,
      uart_freq: 100_000_000,
      ratio: 4,
      speedgrade: -1,
      margin: 1e-2,
      timing: StageTiming {
        lock_cycles: 1_000,
        lock_timeout_cycles: 20_000,
        reset_sync_stages: 1,
      },
      idelayctrl_reset_cycles: 16,
    }
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReferencePlan {
  pub name: String,
  pub frequency: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputPlan {
  pub domain: ClockDomain,
  pub divide: u32,
  pub achieved: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PllPlan {
  pub name: String,
  pub clkin: f64,
  pub vco: f64,
  pub params: PllParams,
  pub limits: PllLimits,
  pub outputs: Vec<OutputPlan>,
}

impl PllPlan {
  fn new(name: &str, clkin: Rate, params: PllParams, domains: &[ClockDomain], limits: PllLimits) -> Self {
    let outputs = domains
      .iter()
      .enumerate()
      .map(|(n, domain)| OutputPlan {
        domain: domain.clone(),
        divide: params.clkouts[n].div,
        achieved: params.output(clkin, n).map(|r| r.hz()).unwrap_or_default(),
      })
      .collect();
    Self {
      name: name.to_string(),
      clkin: clkin.hz(),
      vco: params.vco(clkin).hz(),
      params,
      limits,
      outputs,
    }
  }

  pub fn domains(&self) -> Vec<ClockDomain> {
    self.outputs.iter().map(|o| o.domain.clone()).collect()
  }
}

/// Elaborated dividers of both PLLs
#[derive(Debug, Clone, Serialize)]
pub struct ClockPlan {
  pub reference: ReferencePlan,
  pub main_pll: PllPlan,
  pub sys_pll: PllPlan,
}

impl ClockPlan {
  pub fn elaborate(spec: &CrgSpec) -> Result<Self> {
    let limits = PllLimits::series7(spec.speedgrade)?;
    let main_domains = vec![
      ClockDomain::new("sys_pll", spec.sys_clk_freq),
      ClockDomain::new("clk200", spec.idelay_freq),
      ClockDomain::new("uart", spec.uart_freq),
    ];
    let main_params = compute_config(spec.ref_hz, &main_domains, &limits, spec.margin)?;
    let ref_rate = Rate::from_hz(spec.ref_hz);
    let intermediate = main_params
      .output(ref_rate, MAIN_INTERMEDIATE)
      .ok_or_else(|| Error::Config("main PLL has no intermediate output".to_string()))?;

    // the cascade is planned for the nominal rate, like the gateware
    let (sys_params, sys_domains) =
      CascadeStage::plan(spec.sys_clk_freq, spec.sys_clk_freq, spec.ratio, &limits, spec.margin)?;

    let main_pll = PllPlan::new("main_pll", ref_rate, main_params, &main_domains, limits);
    let sys_pll = PllPlan::new("sys_pll", intermediate, sys_params, &sys_domains, limits);
    Ok(Self {
      reference: ReferencePlan {
        name: spec.ref_name.clone(),
        frequency: spec.ref_hz,
      },
      main_pll,
      sys_pll,
    })
  }
}

/// Lock bits as seen on the register bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockStatus {
  pub main: LockState,
  pub sys: LockState,
}

impl LockStatus {
  pub fn bits(&self) -> u32 {
    (self.main == LockState::Locked) as u32 | (((self.sys == LockState::Locked) as u32) << 1)
  }
}

pub struct Crg {
  name: String,
  plan: ClockPlan,
  ref_hz: u64,
  system_ready: bool,
  counter: CycleCounter,
  ticks: u64,
  pub(crate) drp_csr: DrpCsr,

  pub main_pll: ReferenceLockStage,
  pub idelayctrl: CalibrationStage,
  pub sys_pll: CascadeStage,
}

impl Crg {
  pub fn new(spec: &CrgSpec) -> Result<Self> {
    if spec.timing.reset_sync_stages == 0 {
      return Err(Error::Config("reset_sync_stages must be at least 1".to_string()));
    }
    let plan = ClockPlan::elaborate(spec)?;
    let main_pll = ReferenceLockStage::new(
      "main_pll",
      spec.ref_hz,
      plan.main_pll.params.clone(),
      plan.main_pll.domains(),
      MAIN_CALIBRATION,
      plan.main_pll.limits,
      spec.timing,
    )?;
    let sys_pll = CascadeStage::new(
      "sys_pll",
      spec.ref_hz,
      plan.sys_pll.params.clone(),
      plan.sys_pll.domains(),
      plan.sys_pll.limits,
      spec.timing,
    );
    info!(
      "crg: {} {} MHz -> vco {:.1} MHz -> sys {:.3} MHz",
      spec.ref_name,
      spec.ref_hz as f64 / 1e6,
      plan.main_pll.vco / 1e6,
      plan.sys_pll.outputs[0].achieved / 1e6
    );
    Ok(Self {
      name: "crg".to_string(),
      plan,
      ref_hz: spec.ref_hz,
      system_ready: true,
      counter: CycleCounter::new(),
      ticks: 0,
      drp_csr: DrpCsr::default(),
      main_pll,
      idelayctrl: CalibrationStage::new("idelayctrl", spec.idelayctrl_reset_cycles),
      sys_pll,
    })
  }

  /// External "system ready" pin; the main PLL reset is its inverse.
  ///
  /// Dropping it reaches the main PLL reset at once (asynchronous assert),
  /// so a commit issued before the next tick is already refused. Release
  /// takes effect on the next tick.
  pub fn set_system_ready(&mut self, ready: bool) {
    if ready != self.system_ready {
      debug!("crg: system_ready {} at tick {}", ready, self.ticks);
    }
    self.system_ready = ready;
    if !ready {
      self.main_pll.reset = true;
    }
  }

  pub fn global_reset_asserted(&self) -> bool {
    !self.system_ready
  }

  pub fn lock_status(&self) -> LockStatus {
    LockStatus {
      main: self.main_pll.lock_state(),
      sys: self.sys_pll.lock_state(),
    }
  }

  /// Both PLLs locked and calibration done
  pub fn ready(&self) -> bool {
    self.main_pll.locked() && self.sys_pll.locked() && self.idelayctrl.ready() && self.sys_pll.sys().active()
  }

  pub fn counter_reader(&self) -> CounterReader {
    self.counter.reader()
  }

  pub fn counter(&self) -> CounterSnapshot {
    self.counter.snapshot()
  }

  pub fn plan(&self) -> &ClockPlan {
    &self.plan
  }

  pub fn ref_hz(&self) -> u64 {
    self.ref_hz
  }

  pub fn ticks(&self) -> u64 {
    self.ticks
  }

  /// Operating clock rate while it runs
  pub fn sys_clk(&self) -> Option<Rate> {
    self.sys_pll.sys().rate()
  }

  /// Run up to `max_ticks` ticks until `done` holds; returns ticks spent
  /// or `None` if it never held.
  pub fn run_until(&mut self, max_ticks: u64, done: impl Fn(&Crg) -> bool) -> Option<u64> {
    for n in 0..max_ticks {
      if done(self) {
        return Some(n);
      }
      self.run();
    }
    done(self).then_some(max_ticks)
  }
}

impl Module for Crg {
  /// One reference tick: main PLL, calibration, cascade, then the counter.
  ///
  /// While global reset is asserted the counter is held at zero: it clears
  /// on the first reset tick and does not change again until release.
  fn run(&mut self) {
    let global_reset = !self.system_ready;

    self.main_pll.reset = global_reset;
    self.main_pll.run();
    let main_locked = self.main_pll.locked();

    let cal = self.main_pll.calibration_clock();
    if cal.active() {
      self.idelayctrl.refclk.set(cal.edges());
    } else {
      self.idelayctrl.refclk.clear();
    }
    self.idelayctrl.run();

    self.sys_pll.reset = !main_locked;
    match self.main_pll.intermediate().rate() {
      Some(rate) => self.sys_pll.clkin.set(rate),
      None => self.sys_pll.clkin.clear(),
    }
    self.sys_pll.run();

    if global_reset {
      self.counter.clear();
    } else {
      self.counter.advance(self.sys_pll.sys().edges());
    }
    self.ticks += 1;
  }

  fn reset(&mut self) {
    self.main_pll.reset();
    self.idelayctrl.reset();
    self.sys_pll.reset();
    self.counter.clear();
    self.drp_csr = DrpCsr::default();
    self.system_ready = true;
    self.ticks = 0;
  }

  fn name(&self) -> &str {
    &self.name
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn fast_spec() -> CrgSpec {
    CrgSpec {
      timing: StageTiming {
        lock_cycles: 20,
        lock_timeout_cycles: 500,
        reset_sync_stages: 1,
      },
      ..CrgSpec::default()
    }
  }

  #[test]
  fn default_plan_matches_bench_dividers() {
    let plan = ClockPlan::elaborate(&CrgSpec::default()).unwrap();
    assert_eq!(plan.main_pll.vco, 1.2e9);
    assert_eq!(plan.main_pll.outputs[MAIN_INTERMEDIATE].achieved, 150e6);
    assert_eq!(plan.sys_pll.vco, 1.2e9);
    assert_eq!(plan.sys_pll.outputs[1].achieved, 600e6);
  }

  #[test]
  fn boots_into_ready() {
    let mut crg = Crg::new(&fast_spec()).unwrap();
    assert!(crg.run_until(200, |c| c.ready()).is_some());
    assert_eq!(crg.lock_status().bits(), 0b11);
    assert_eq!(crg.sys_clk().map(|r| r.hz()), Some(150e6));
  }

  #[test]
  fn calibration_activates_the_tick_after_lock() {
    let mut crg = Crg::new(&fast_spec()).unwrap();
    crg.run_until(100, |c| c.main_pll.locked()).unwrap();
    assert!(!crg.idelayctrl.active());
    crg.run();
    assert!(crg.idelayctrl.active());
  }

  #[test]
  fn power_on_reset_restarts_the_cascade() {
    let mut crg = Crg::new(&fast_spec()).unwrap();
    crg.run_until(200, |c| c.ready()).unwrap();
    crg.reset();
    assert_eq!(crg.counter().value, 0);
    assert_eq!(crg.ticks(), 0);
    assert_eq!(crg.lock_status().main, LockState::Unlocked);
    assert!(crg.run_until(200, |c| c.ready()).is_some());
  }
}
