//! Register-bus view of the bench, as a remote driver sees it.

use crate::arch::csr;
use crate::arch::drp::{decode_counter, encode_counter, ClkReg1, ClkReg2, ReconfigStatus, CLKOUT_REGS};
use crate::error::{Error, Result};
use std::time::Duration;

/// Opaque register transport plus the passage of wall-clock time.
pub trait BenchBus {
  fn read(&mut self, addr: u32) -> Result<u32>;
  fn write(&mut self, addr: u32, value: u32) -> Result<()>;
  fn sleep(&mut self, duration: Duration);
}

impl<B: BenchBus + ?Sized> BenchBus for &mut B {
  fn read(&mut self, addr: u32) -> Result<u32> {
    (**self).read(addr)
  }

  fn write(&mut self, addr: u32, value: u32) -> Result<()> {
    (**self).write(addr, value)
  }

  fn sleep(&mut self, duration: Duration) {
    (**self).sleep(duration)
  }
}

/// Driver-side helper for the main PLL's reconfiguration registers.
pub struct PllDrp<'a> {
  bus: &'a mut dyn BenchBus,
}

impl<'a> PllDrp<'a> {
  pub fn new(bus: &'a mut dyn BenchBus) -> Self {
    Self { bus }
  }

  pub fn reset(&mut self) -> Result<()> {
    self.bus.write(csr::DRP_RESET, 1)
  }

  pub fn read(&mut self, adr: u8) -> Result<u16> {
    self.bus.write(csr::DRP_ADR, adr as u32)?;
    self.bus.write(csr::DRP_READ, 1)?;
    Ok(self.bus.read(csr::DRP_DAT_R)? as u16)
  }

  pub fn write(&mut self, adr: u8, value: u16) -> Result<()> {
    self.bus.write(csr::DRP_ADR, adr as u32)?;
    self.bus.write(csr::DRP_DAT_W, value as u32)?;
    self.bus.write(csr::DRP_WRITE, 1)
  }

  fn clkout_regs(n: usize) -> Result<(u8, u8)> {
    CLKOUT_REGS.get(n).copied().ok_or(Error::InvalidDrpField {
      field: "clkout",
      value: n as u32,
    })
  }

  /// Stage a new divider for CLKOUT `n`; applied by [`commit`](Self::commit).
  pub fn set_clkout_divider(&mut self, n: usize, div: u32, phase: f64) -> Result<()> {
    let (reg1, reg2) = encode_counter(div, phase)?;
    let (adr1, adr2) = Self::clkout_regs(n)?;
    self.write(adr1, reg1.pack())?;
    self.write(adr2, reg2.pack())
  }

  /// Divider currently held in the DRP registers of CLKOUT `n`
  pub fn clkout_divider(&mut self, n: usize) -> Result<u32> {
    let (adr1, adr2) = Self::clkout_regs(n)?;
    let reg1 = ClkReg1::unpack(self.read(adr1)?);
    let reg2 = ClkReg2::unpack(self.read(adr2)?);
    Ok(decode_counter(reg1, reg2)?.div)
  }

  pub fn commit(&mut self) -> Result<()> {
    self.bus.write(csr::DRP_COMMIT, 1)
  }

  pub fn status(&mut self) -> Result<ReconfigStatus> {
    Ok(ReconfigStatus::from_bits_truncate(
      self.bus.read(csr::DRP_STATUS)?,
    ))
  }

  pub fn locked(&mut self) -> Result<bool> {
    Ok(self.bus.read(csr::DRP_LOCKED)? & 1 != 0)
  }
}
