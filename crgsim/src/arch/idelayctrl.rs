//! Calibration Stage: delay-element calibration on the reference lock
//! stage's calibration clock.

use crate::builtin::{Module, Wire};
use log::debug;

pub struct CalibrationStage {
  name: String,
  reset_cycles: u32,
  countdown: u32,
  active: bool,
  ready: bool,

  /// Calibration clock edges this tick, valid while the domain is out of reset
  pub refclk: Wire<u64>,
}

impl CalibrationStage {
  pub fn new(name: impl Into<String>, reset_cycles: u32) -> Self {
    Self {
      name: name.into(),
      reset_cycles,
      countdown: reset_cycles,
      active: false,
      ready: false,
      refclk: Wire::default(),
    }
  }

  /// Out of reset
  pub fn active(&self) -> bool {
    self.active
  }

  /// Calibration finished, delay taps usable
  pub fn ready(&self) -> bool {
    self.ready
  }
}

impl Module for CalibrationStage {
  fn run(&mut self) {
    match self.refclk.get() {
      None => {
        if self.active {
          debug!("{}: held in reset", self.name);
        }
        self.active = false;
        self.ready = false;
        self.countdown = self.reset_cycles;
      },
      Some(&edges) => {
        if !self.active {
          debug!("{}: active", self.name);
        }
        self.active = true;
        self.countdown = self.countdown.saturating_sub(edges.min(u32::MAX as u64) as u32);
        if self.countdown == 0 && !self.ready {
          debug!("{}: ready", self.name);
          self.ready = true;
        }
      },
    }
  }

  fn reset(&mut self) {
    self.countdown = self.reset_cycles;
    self.active = false;
    self.ready = false;
    self.refclk.clear();
  }

  fn name(&self) -> &str {
    &self.name
  }
}
