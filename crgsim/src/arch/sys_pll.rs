//! Cascade Clock Stage: operating clock plus phase-shifted high-speed clocks
//! for the memory PHY, all from one PLL.

use super::clock::{ClockDomain, DomainPort, Rate};
use super::main_pll::StageTiming;
use super::pll::{compute_config_where, LockState, PllCore, PllLimits, PllParams};
use crate::builtin::{Module, Wire};
use crate::error::Result;

pub const SYS: usize = 0;
pub const SYS4X: usize = 1;
pub const SYS4X_DQS: usize = 2;

/// Data-strobe clock offset in degrees
pub const DQS_PHASE: f64 = 90.0;

pub struct CascadeStage {
  name: String,
  ref_hz: u64,
  core: PllCore,
  outputs: Vec<DomainPort>,
  timing: StageTiming,

  /// Driven by the inverse of the upstream lock
  pub reset: bool,
  pub clkin: Wire<Rate>,
}

impl CascadeStage {
  /// Domains and dividers for an operating clock of `sys_clk_freq` and
  /// high-speed clocks at `ratio` times that.
  ///
  /// Only settings where both high-speed outputs share one divider that
  /// evenly divides the operating divider are accepted.
  pub fn plan(
    clkin_hz: u64,
    sys_clk_freq: u64,
    ratio: u32,
    limits: &PllLimits,
    margin: f64,
  ) -> Result<(PllParams, Vec<ClockDomain>)> {
    let fast = sys_clk_freq * ratio as u64;
    let domains = vec![
      ClockDomain::new("sys", sys_clk_freq),
      ClockDomain::new("sys4x", fast).reset_less(),
      ClockDomain::new("sys4x_dqs", fast).reset_less().with_phase(DQS_PHASE),
    ];
    let params = compute_config_where(clkin_hz, &domains, limits, margin, |p| {
      let (sys, fast, dqs) = (p.clkouts[SYS].div, p.clkouts[SYS4X].div, p.clkouts[SYS4X_DQS].div);
      fast == dqs && sys == fast * ratio
    })?;
    Ok((params, domains))
  }

  pub fn new(
    name: impl Into<String>,
    ref_hz: u64,
    params: PllParams,
    domains: Vec<ClockDomain>,
    limits: PllLimits,
    timing: StageTiming,
  ) -> Self {
    let name = name.into();
    Self {
      core: PllCore::new(name.clone(), limits, params, timing.lock_cycles),
      name,
      ref_hz,
      outputs: domains
        .into_iter()
        .map(|d| DomainPort::new(d, timing.reset_sync_stages))
        .collect(),
      timing,
      reset: true,
      clkin: Wire::default(),
    }
  }

  pub fn locked(&self) -> bool {
    self.core.locked()
  }

  pub fn lock_state(&self) -> LockState {
    self.core.state()
  }

  pub fn params(&self) -> &PllParams {
    self.core.params()
  }

  pub fn limits(&self) -> &PllLimits {
    self.core.limits()
  }

  pub fn outputs(&self) -> &[DomainPort] {
    &self.outputs
  }

  pub fn sys(&self) -> &DomainPort {
    &self.outputs[SYS]
  }

  pub fn sys4x(&self) -> &DomainPort {
    &self.outputs[SYS4X]
  }

  pub fn sys4x_dqs(&self) -> &DomainPort {
    &self.outputs[SYS4X_DQS]
  }

  /// sys4x / sys while both run
  pub fn high_speed_ratio(&self) -> Option<u64> {
    self.sys4x().rate()?.integer_multiple_of(&self.sys().rate()?)
  }

  /// DQS phase relative to sys4x, from the shared PLL settings
  pub fn dqs_offset(&self) -> f64 {
    let clkouts = &self.core.params().clkouts;
    clkouts[SYS4X_DQS].phase - clkouts[SYS4X].phase
  }
}

impl Module for CascadeStage {
  fn run(&mut self) {
    self.core.run(self.reset, self.clkin.get().copied());
    let locked = self.core.locked();
    for (n, port) in self.outputs.iter_mut().enumerate() {
      port.drive(self.core.output(n), locked, self.ref_hz);
    }
  }

  fn reset(&mut self) {
    let params = self.core.params().clone();
    self.core.reconfigure(params);
    self.outputs = self
      .outputs
      .iter()
      .map(|port| DomainPort::new(port.domain.clone(), self.timing.reset_sync_stages))
      .collect();
    self.reset = true;
    self.clkin.clear();
  }

  fn name(&self) -> &str {
    &self.name
  }
}
