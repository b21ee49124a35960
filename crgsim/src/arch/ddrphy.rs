//! SDRAM PHY stand-in behind the memory window.
//!
//! Traffic is accepted only while the operating domain is out of reset, the
//! high-speed clocks run and delay calibration is done. Above the functional
//! limit every written word comes back with one bit flipped.

use super::crg::Crg;
use crate::error::{Error, Result};
use log::trace;
use std::collections::HashMap;

pub struct SdramPhy {
  base: u32,
  size: u32,
  max_functional_hz: u64,
  words: HashMap<u32, u32>,
}

impl SdramPhy {
  pub fn new(base: u32, size: u32, max_functional_hz: u64) -> Self {
    Self {
      base,
      size,
      max_functional_hz,
      words: HashMap::new(),
    }
  }

  pub fn base(&self) -> u32 {
    self.base
  }

  pub fn size(&self) -> u32 {
    self.size
  }

  pub fn contains(&self, addr: u32) -> bool {
    addr >= self.base && (addr - self.base) < self.size
  }

  pub fn ready(crg: &Crg) -> bool {
    let sys = &crg.sys_pll;
    sys.sys().active() && sys.sys4x().active() && sys.sys4x_dqs().active() && crg.idelayctrl.ready()
  }

  fn index(&self, addr: u32) -> Result<u32> {
    if !self.contains(addr) || addr % 4 != 0 {
      return Err(Error::UnmappedRegister(addr));
    }
    Ok((addr - self.base) / 4)
  }

  pub fn read(&self, crg: &Crg, addr: u32) -> Result<u32> {
    let index = self.index(addr)?;
    if !Self::ready(crg) {
      return Err(Error::PhyNotReady);
    }
    Ok(self.words.get(&index).copied().unwrap_or(0))
  }

  pub fn write(&mut self, crg: &Crg, addr: u32, value: u32) -> Result<()> {
    let index = self.index(addr)?;
    if !Self::ready(crg) {
      return Err(Error::PhyNotReady);
    }
    let stored = match crg.sys_clk() {
      Some(rate) if rate.hz() > self.max_functional_hz as f64 => {
        trace!("ddrphy: write at {} beyond functional limit", rate);
        value ^ (1 << (index % 32))
      },
      _ => value,
    };
    self.words.insert(index, stored);
    Ok(())
  }

  /// Drop the contents; refresh stops while the controller is held in reset.
  pub fn clear(&mut self) {
    self.words.clear();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arch::crg::CrgSpec;
  use crate::arch::main_pll::StageTiming;

  fn ready_crg() -> Crg {
    let spec = CrgSpec {
      timing: StageTiming {
        lock_cycles: 10,
        lock_timeout_cycles: 200,
        reset_sync_stages: 1,
      },
      ..CrgSpec::default()
    };
    let mut crg = Crg::new(&spec).unwrap();
    crg.run_until(200, |c| c.ready()).unwrap();
    crg
  }

  #[test]
  fn refuses_traffic_before_calibration() {
    let crg = Crg::new(&CrgSpec::default()).unwrap();
    let mut phy = SdramPhy::new(0x4000_0000, 0x1000, 200_000_000);
    assert!(matches!(phy.write(&crg, 0x4000_0000, 1), Err(Error::PhyNotReady)));
  }

  #[test]
  fn stores_words_below_functional_limit() {
    let crg = ready_crg();
    let mut phy = SdramPhy::new(0x4000_0000, 0x1000, 200_000_000);
    phy.write(&crg, 0x4000_0008, 0xdead_beef).unwrap();
    assert_eq!(phy.read(&crg, 0x4000_0008).unwrap(), 0xdead_beef);
    assert!(phy.read(&crg, 0x4000_1000).is_err());
    assert!(phy.read(&crg, 0x4000_0002).is_err());
  }

  #[test]
  fn corrupts_words_above_functional_limit() {
    let crg = ready_crg();
    let mut phy = SdramPhy::new(0x4000_0000, 0x1000, 120_000_000);
    phy.write(&crg, 0x4000_0004, 0).unwrap();
    assert_eq!(phy.read(&crg, 0x4000_0004).unwrap(), 1 << 1);
  }
}
