//! The simulated bench: CRG plus SDRAM PHY behind one register bus.

use super::bus::BenchBus;
use super::config::AppConfig;
use crate::arch::crg::Crg;
use crate::arch::ddrphy::SdramPhy;
use crate::builtin::Module;
use crate::error::{Error, Result};
use log::{debug, info};
use std::time::Duration;

pub struct Bench {
  name: String,
  crg: Crg,
  phy: SdramPhy,
}

impl Bench {
  pub fn new(config: &AppConfig) -> Result<Self> {
    let crg = Crg::new(&config.crg_spec())?;
    let phy = SdramPhy::new(config.sdram.base, config.sdram.size, config.sdram.max_functional_freq);
    Ok(Self::from_parts(crg, phy))
  }

  pub fn from_parts(crg: Crg, phy: SdramPhy) -> Self {
    Self {
      name: "bench".to_string(),
      crg,
      phy,
    }
  }

  pub fn crg(&self) -> &Crg {
    &self.crg
  }

  pub fn crg_mut(&mut self) -> &mut Crg {
    &mut self.crg
  }

  pub fn phy(&self) -> &SdramPhy {
    &self.phy
  }

  /// Reference ticks covering `duration`, at least one.
  pub fn ticks_for(&self, duration: Duration) -> u64 {
    let ticks = (duration.as_nanos() * self.crg.ref_hz() as u128).div_ceil(1_000_000_000);
    ticks.clamp(1, u64::MAX as u128) as u64
  }

  pub fn tick(&mut self, n: u64) {
    for _ in 0..n {
      self.run();
    }
  }

  /// Power-on reset, then run until every stage is locked and calibrated.
  pub fn power_on(&mut self, max_ticks: u64) -> Result<u64> {
    self.reset();
    match self.crg.run_until(max_ticks, |c| c.ready()) {
      Some(ticks) => {
        info!(
          "bench: ready after {} ticks, sys {}",
          ticks,
          self.crg.sys_clk().map(|r| r.to_string()).unwrap_or_default()
        );
        Ok(ticks)
      },
      None => Err(Error::LockTimeout {
        requested_hz: self.crg.plan().sys_pll.outputs[0].domain.frequency,
        cycles: max_ticks,
      }),
    }
  }
}

impl Module for Bench {
  fn run(&mut self) {
    self.crg.run();
    if self.crg.global_reset_asserted() {
      self.phy.clear();
    }
  }

  fn reset(&mut self) {
    debug!("bench: power-on reset");
    self.crg.reset();
    self.phy.clear();
  }

  fn name(&self) -> &str {
    &self.name
  }
}

impl BenchBus for Bench {
  fn read(&mut self, addr: u32) -> Result<u32> {
    if self.phy.contains(addr) {
      return self.phy.read(&self.crg, addr);
    }
    self.crg.csr_read(addr)
  }

  fn write(&mut self, addr: u32, value: u32) -> Result<()> {
    if self.phy.contains(addr) {
      return self.phy.write(&self.crg, addr, value);
    }
    self.crg.csr_write(addr, value)
  }

  fn sleep(&mut self, duration: Duration) {
    let ticks = self.ticks_for(duration);
    self.tick(ticks);
  }
}
