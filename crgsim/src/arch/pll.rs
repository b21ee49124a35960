//! Series-7 style PLL: divider search, range checks and the lock model.

use super::clock::{ClockDomain, Rate};
use crate::error::{Error, Result};
use log::debug;
use serde::{Deserialize, Serialize};

/// Electrical limits of one PLL primitive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PllLimits {
  pub clkin: (u64, u64),
  pub vco: (u64, u64),
  pub divclk: (u32, u32),
  pub mult: (u32, u32),
  pub clkout_div: (u32, u32),
  pub nclkouts_max: usize,
}

impl PllLimits {
  /// PLLE2 limits for the given speed grade (-1, -2 or -3).
  pub fn series7(speedgrade: i32) -> Result<Self> {
    let vco = match speedgrade {
      -1 => (800_000_000, 1_600_000_000),
      -2 => (800_000_000, 1_866_000_000),
      -3 => (800_000_000, 2_133_000_000),
      other => return Err(Error::Config(format!("unsupported speedgrade: {}", other))),
    };
    Ok(Self {
      clkin: (19_000_000, 800_000_000),
      vco,
      divclk: (1, 56),
      mult: (2, 64),
      clkout_div: (1, 128),
      nclkouts_max: 6,
    })
  }

  pub fn check_clkin(&self, clkin: Rate) -> Result<()> {
    check_range("clkin", clkin.hz(), self.clkin.0 as f64, self.clkin.1 as f64)
  }

  pub fn check_vco(&self, vco: Rate) -> Result<()> {
    check_range("vco", vco.hz(), self.vco.0 as f64, self.vco.1 as f64)
  }

  pub fn check_clkout_div(&self, div: u32) -> Result<()> {
    check_range(
      "clkout_divide",
      div as f64,
      self.clkout_div.0 as f64,
      self.clkout_div.1 as f64,
    )
  }
}

fn check_range(what: &'static str, value: f64, min: f64, max: f64) -> Result<()> {
  if value < min || value > max {
    return Err(Error::out_of_range(what, value, min, max));
  }
  Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClkOut {
  pub div: u32,
  /// Degrees of the output period
  pub phase: f64,
}

/// Divider/multiplier settings of one PLL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PllParams {
  pub divclk: u32,
  pub mult: u32,
  pub clkouts: Vec<ClkOut>,
}

impl PllParams {
  pub fn vco(&self, clkin: Rate) -> Rate {
    clkin.scale(self.mult as u64, self.divclk as u64)
  }

  pub fn output(&self, clkin: Rate, n: usize) -> Option<Rate> {
    let clkout = self.clkouts.get(n)?;
    Some(self.vco(clkin).scale(1, clkout.div as u64))
  }

  /// Full range check against `limits` for the given input clock.
  pub fn validate(&self, clkin: Rate, limits: &PllLimits) -> Result<()> {
    limits.check_clkin(clkin)?;
    check_range(
      "divclk_divide",
      self.divclk as f64,
      limits.divclk.0 as f64,
      limits.divclk.1 as f64,
    )?;
    check_range(
      "clkfbout_mult",
      self.mult as f64,
      limits.mult.0 as f64,
      limits.mult.1 as f64,
    )?;
    limits.check_vco(self.vco(clkin))?;
    if self.clkouts.len() > limits.nclkouts_max {
      return Err(Error::out_of_range(
        "clkouts",
        self.clkouts.len() as f64,
        0.0,
        limits.nclkouts_max as f64,
      ));
    }
    for clkout in &self.clkouts {
      limits.check_clkout_div(clkout.div)?;
    }
    Ok(())
  }
}

/// Search dividers for `requests`, first match wins.
///
/// DIVCLK ascending, multiplier descending, then the smallest output divider
/// landing within `margin` of each target.
pub fn compute_config(
  clkin_hz: u64,
  requests: &[ClockDomain],
  limits: &PllLimits,
  margin: f64,
) -> Result<PllParams> {
  compute_config_where(clkin_hz, requests, limits, margin, |_| true)
}

/// Like [`compute_config`] but skips candidates rejected by `accept`.
pub fn compute_config_where(
  clkin_hz: u64,
  requests: &[ClockDomain],
  limits: &PllLimits,
  margin: f64,
  accept: impl Fn(&PllParams) -> bool,
) -> Result<PllParams> {
  let clkin = Rate::from_hz(clkin_hz);
  limits.check_clkin(clkin)?;
  if requests.len() > limits.nclkouts_max {
    return Err(Error::out_of_range(
      "clkouts",
      requests.len() as f64,
      0.0,
      limits.nclkouts_max as f64,
    ));
  }

  for divclk in limits.divclk.0..=limits.divclk.1 {
    for mult in (limits.mult.0..=limits.mult.1).rev() {
      let vco = clkin.scale(mult as u64, divclk as u64);
      if limits.check_vco(vco).is_err() {
        continue;
      }
      let clkouts: Option<Vec<ClkOut>> = requests
        .iter()
        .map(|req| {
          (limits.clkout_div.0..=limits.clkout_div.1)
            .find(|&d| {
              let f = vco.scale(1, d as u64).hz();
              let target = req.frequency as f64;
              (f - target).abs() <= target * margin
            })
            .map(|div| ClkOut { div, phase: req.phase })
        })
        .collect();
      if let Some(clkouts) = clkouts {
        let params = PllParams { divclk, mult, clkouts };
        if accept(&params) {
          debug!(
            "pll config: clkin={} vco={} divclk={} mult={} outs={:?}",
            clkin, vco, divclk, mult, params.clkouts
          );
          return Ok(params);
        }
      }
    }
  }
  Err(Error::NoPllConfig { clkin_hz })
}

/// Output divider whose frequency is closest to `target_hz`.
pub fn nearest_divider(vco: Rate, target_hz: u64, limits: &PllLimits) -> Result<u32> {
  if target_hz == 0 {
    return Err(Error::out_of_range("target", 0.0, 1.0, vco.hz()));
  }
  let div = (vco.hz() / target_hz as f64).round();
  let div = if div < 1.0 { 1 } else { div as u32 };
  limits.check_clkout_div(div)?;
  Ok(div)
}

/// Frequency gap between divider `div` and the next faster setting.
pub fn quantization_step(vco: Rate, div: u32) -> f64 {
  let div = div.max(1) as f64;
  let faster = if div > 1.0 { div - 1.0 } else { 0.5 };
  vco.hz() / faster - vco.hz() / div
}

/// Lock status of a PLL, driven only by its own feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockState {
  Unlocked,
  Locking,
  Locked,
}

/// The analog part of a PLL: settings plus the lock loop.
#[derive(Debug, Clone)]
pub struct PllCore {
  name: String,
  limits: PllLimits,
  params: PllParams,
  lock_cycles: u32,
  state: LockState,
  countdown: u32,
  tracked: Option<Rate>,
}

impl PllCore {
  pub fn new(name: impl Into<String>, limits: PllLimits, params: PllParams, lock_cycles: u32) -> Self {
    Self {
      name: name.into(),
      limits,
      params,
      lock_cycles,
      state: LockState::Unlocked,
      countdown: lock_cycles,
      tracked: None,
    }
  }

  /// One reference tick. `clkin` is `None` when the input clock is absent.
  pub fn run(&mut self, reset: bool, clkin: Option<Rate>) {
    let prev = self.state;
    match clkin {
      Some(clkin) if !reset => self.advance(clkin),
      _ => self.drop_lock(),
    }
    if prev != self.state {
      debug!("{}: {:?} -> {:?}", self.name, prev, self.state);
    }
  }

  fn advance(&mut self, clkin: Rate) {
    if self.tracked.is_some_and(|tracked| tracked != clkin) {
      self.drop_lock();
    }
    if self.params.validate(clkin, &self.limits).is_err() {
      // VCO keeps hunting, lock never asserts
      self.state = LockState::Locking;
      self.countdown = self.lock_cycles;
      self.tracked = Some(clkin);
      return;
    }
    match self.state {
      LockState::Unlocked => {
        self.state = LockState::Locking;
        self.countdown = self.lock_cycles;
        self.tracked = Some(clkin);
      },
      LockState::Locking => {
        if self.countdown == 0 {
          self.state = LockState::Locked;
        } else {
          self.countdown -= 1;
        }
      },
      LockState::Locked => {},
    }
  }

  fn drop_lock(&mut self) {
    self.state = LockState::Unlocked;
    self.countdown = self.lock_cycles;
    self.tracked = None;
  }

  /// Swap settings; lock drops and has to be re-acquired.
  pub fn reconfigure(&mut self, params: PllParams) {
    self.params = params;
    self.drop_lock();
    debug!("{}: reconfigured, lock dropped", self.name);
  }

  /// Output `n`, present only while locked.
  pub fn output(&self, n: usize) -> Option<Rate> {
    if self.state != LockState::Locked {
      return None;
    }
    self.params.output(self.tracked?, n)
  }

  pub fn state(&self) -> LockState {
    self.state
  }

  pub fn locked(&self) -> bool {
    self.state == LockState::Locked
  }

  pub fn params(&self) -> &PllParams {
    &self.params
  }

  pub fn limits(&self) -> &PllLimits {
    &self.limits
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;

  fn main_requests() -> Vec<ClockDomain> {
    vec![
      ClockDomain::new("sys_pll", 150_000_000),
      ClockDomain::new("clk200", 200_000_000),
      ClockDomain::new("uart", 100_000_000),
    ]
  }

  #[test]
  fn finds_1200mhz_vco_for_the_default_bench() {
    let limits = PllLimits::series7(-1).unwrap();
    let params = compute_config(100_000_000, &main_requests(), &limits, 1e-2).unwrap();
    assert_eq!(params.divclk, 1);
    assert_eq!(params.mult, 12);
    let divs: Vec<u32> = params.clkouts.iter().map(|c| c.div).collect();
    assert_eq!(divs, vec![8, 6, 12]);
    assert_eq!(params.vco(Rate::from_hz(100_000_000)).hz(), 1.2e9);
  }

  #[test]
  fn rejects_unreachable_requests() {
    let limits = PllLimits::series7(-1).unwrap();
    let requests = vec![ClockDomain::new("too_fast", 2_000_000_000)];
    assert!(matches!(
      compute_config(100_000_000, &requests, &limits, 1e-2),
      Err(Error::NoPllConfig { .. })
    ));
    assert!(matches!(
      compute_config(5_000_000, &main_requests(), &limits, 1e-2),
      Err(Error::OutOfRange { what: "clkin", .. })
    ));
  }

  #[test]
  fn unknown_speedgrade_is_a_config_error() {
    assert!(matches!(PllLimits::series7(-7), Err(Error::Config(_))));
  }

  #[test]
  fn core_locks_after_lock_cycles_and_drops_on_reset() {
    let limits = PllLimits::series7(-1).unwrap();
    let params = compute_config(100_000_000, &main_requests(), &limits, 1e-2).unwrap();
    let mut core = PllCore::new("pll", limits, params, 3);
    let clkin = Some(Rate::from_hz(100_000_000));

    core.run(false, clkin);
    assert_eq!(core.state(), LockState::Locking);
    for _ in 0..3 {
      core.run(false, clkin);
      assert_eq!(core.state(), LockState::Locking);
      assert!(core.output(0).is_none());
    }
    core.run(false, clkin);
    assert_eq!(core.state(), LockState::Locked);
    assert_eq!(core.output(0).map(|r| r.hz()), Some(150e6));

    core.run(true, clkin);
    assert_eq!(core.state(), LockState::Unlocked);
    assert!(core.output(0).is_none());
  }

  #[test]
  fn core_never_locks_with_vco_out_of_range() {
    let limits = PllLimits::series7(-1).unwrap();
    let params = PllParams {
      divclk: 1,
      mult: 8,
      clkouts: vec![ClkOut { div: 8, phase: 0.0 }],
    };
    let mut core = PllCore::new("pll", limits, params, 2);
    for _ in 0..100 {
      core.run(false, Some(Rate::from_hz(60_000_000)));
    }
    assert_eq!(core.state(), LockState::Locking);
  }

  #[test]
  fn input_change_restarts_lock() {
    let limits = PllLimits::series7(-1).unwrap();
    let params = PllParams {
      divclk: 1,
      mult: 8,
      clkouts: vec![ClkOut { div: 8, phase: 0.0 }],
    };
    let mut core = PllCore::new("pll", limits, params, 0);
    core.run(false, Some(Rate::from_hz(150_000_000)));
    core.run(false, Some(Rate::from_hz(150_000_000)));
    assert!(core.locked());
    core.run(false, Some(Rate::from_hz(120_000_000)));
    assert_eq!(core.state(), LockState::Locking);
  }

  proptest! {
    #[test]
    fn nearest_divider_is_within_one_quantization_step(
      mult in 8u32..=16,
      divclk in 1u32..=2,
      target_mhz in 10u64..=800,
    ) {
      let limits = PllLimits::series7(-1).unwrap();
      let vco = Rate::from_hz(100_000_000).scale(mult as u64, divclk as u64);
      prop_assume!(limits.check_vco(vco).is_ok());
      let target = target_mhz * 1_000_000;
      prop_assume!((target as f64) <= vco.hz());
      prop_assume!((target as f64) >= vco.hz() / limits.clkout_div.1 as f64);

      let div = nearest_divider(vco, target, &limits).unwrap();
      let achieved = vco.scale(1, div as u64).hz();
      prop_assert!((achieved - target as f64).abs() <= quantization_step(vco, div));
    }
  }
}
