//! CSR register file of the CRG: 32-bit registers at byte addresses.

use super::crg::Crg;
use crate::error::{Error, Result};
use log::{debug, warn};
use serde::Serialize;
use std::io;

pub const CRG_SYS_CLK_COUNTER: u32 = 0x00;
pub const CRG_PLL_LOCKED: u32 = 0x04;
pub const CRG_IDELAYCTRL_STATUS: u32 = 0x08;
pub const CRG_RESET_STATUS: u32 = 0x0c;
pub const DRP_RESET: u32 = 0x10;
pub const DRP_LOCKED: u32 = 0x14;
pub const DRP_READ: u32 = 0x18;
pub const DRP_WRITE: u32 = 0x1c;
pub const DRP_DRDY: u32 = 0x20;
pub const DRP_ADR: u32 = 0x24;
pub const DRP_DAT_W: u32 = 0x28;
pub const DRP_DAT_R: u32 = 0x2c;
pub const DRP_COMMIT: u32 = 0x30;
pub const DRP_STATUS: u32 = 0x34;

pub const PLL_LOCKED_MAIN: u32 = 1 << 0;
pub const PLL_LOCKED_SYS: u32 = 1 << 1;
pub const IDELAYCTRL_ACTIVE: u32 = 1 << 0;
pub const IDELAYCTRL_READY: u32 = 1 << 1;
pub const RESET_GLOBAL: u32 = 1 << 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
  Ro,
  Wo,
  Rw,
}

impl Access {
  pub fn readable(self) -> bool {
    self != Access::Wo
  }

  pub fn writable(self) -> bool {
    self != Access::Ro
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Access::Ro => "ro",
      Access::Wo => "wo",
      Access::Rw => "rw",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsrRegister {
  pub name: &'static str,
  pub addr: u32,
  pub access: Access,
}

const fn reg(name: &'static str, addr: u32, access: Access) -> CsrRegister {
  CsrRegister { name, addr, access }
}

pub const CSR_MAP: [CsrRegister; 14] = [
  reg("crg_sys_clk_counter", CRG_SYS_CLK_COUNTER, Access::Ro),
  reg("crg_pll_locked", CRG_PLL_LOCKED, Access::Ro),
  reg("crg_idelayctrl_status", CRG_IDELAYCTRL_STATUS, Access::Ro),
  reg("crg_reset_status", CRG_RESET_STATUS, Access::Ro),
  reg("crg_main_pll_drp_reset", DRP_RESET, Access::Wo),
  reg("crg_main_pll_drp_locked", DRP_LOCKED, Access::Ro),
  reg("crg_main_pll_drp_read", DRP_READ, Access::Wo),
  reg("crg_main_pll_drp_write", DRP_WRITE, Access::Wo),
  reg("crg_main_pll_drp_drdy", DRP_DRDY, Access::Ro),
  reg("crg_main_pll_drp_adr", DRP_ADR, Access::Rw),
  reg("crg_main_pll_drp_dat_w", DRP_DAT_W, Access::Rw),
  reg("crg_main_pll_drp_dat_r", DRP_DAT_R, Access::Ro),
  reg("crg_main_pll_drp_commit", DRP_COMMIT, Access::Wo),
  reg("crg_main_pll_drp_status", DRP_STATUS, Access::Ro),
];

pub fn lookup(addr: u32) -> Option<&'static CsrRegister> {
  CSR_MAP.iter().find(|r| r.addr == addr)
}

/// Bus-side DRP handshake registers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrpCsr {
  pub adr: u32,
  pub dat_w: u32,
  pub dat_r: u32,
  pub drdy: bool,
}

#[derive(Serialize)]
struct CsvRow<'a> {
  kind: &'a str,
  name: &'a str,
  address: String,
  size: u32,
  access: &'a str,
}

/// Export the register map (plus the SDRAM window) as `csr.csv`.
pub fn write_csv<W: io::Write>(writer: W, sdram_base: u32, sdram_size: u32) -> Result<()> {
  let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
  for r in CSR_MAP.iter() {
    wtr.serialize(CsvRow {
      kind: "csr_register",
      name: r.name,
      address: format!("0x{:08x}", r.addr),
      size: 1,
      access: r.access.as_str(),
    })?;
  }
  wtr.serialize(CsvRow {
    kind: "memory_region",
    name: "main_ram",
    address: format!("0x{:08x}", sdram_base),
    size: sdram_size,
    access: "cached",
  })?;
  wtr.flush()?;
  Ok(())
}

impl Crg {
  pub fn csr_read(&self, addr: u32) -> Result<u32> {
    let reg = lookup(addr).ok_or(Error::UnmappedRegister(addr))?;
    if !reg.access.readable() {
      return Ok(0);
    }
    let value = match addr {
      CRG_SYS_CLK_COUNTER => self.counter().value,
      CRG_PLL_LOCKED => self.lock_status().bits(),
      CRG_IDELAYCTRL_STATUS => {
        let mut v = 0;
        if self.idelayctrl.active() {
          v |= IDELAYCTRL_ACTIVE;
        }
        if self.idelayctrl.ready() {
          v |= IDELAYCTRL_READY;
        }
        v
      },
      CRG_RESET_STATUS => self.global_reset_asserted() as u32 * RESET_GLOBAL,
      DRP_LOCKED => self.main_pll.locked() as u32,
      DRP_DRDY => self.drp_csr.drdy as u32,
      DRP_ADR => self.drp_csr.adr,
      DRP_DAT_W => self.drp_csr.dat_w,
      DRP_DAT_R => self.drp_csr.dat_r,
      DRP_STATUS => self.main_pll.status().bits(),
      _ => return Err(Error::UnmappedRegister(addr)),
    };
    Ok(value)
  }

  pub fn csr_write(&mut self, addr: u32, value: u32) -> Result<()> {
    let reg = lookup(addr).ok_or(Error::UnmappedRegister(addr))?;
    if !reg.access.writable() {
      return Err(Error::ReadOnlyRegister(addr));
    }
    match addr {
      DRP_RESET => {
        if value & 1 != 0 {
          debug!("csr: drp reset pulse");
          self.main_pll.pulse_reset();
        }
      },
      DRP_READ => {
        let adr = (self.drp_csr.adr & 0x7f) as u8;
        self.drp_csr.dat_r = self.main_pll.drp().read(adr) as u32;
        self.drp_csr.drdy = true;
      },
      DRP_WRITE => {
        let adr = (self.drp_csr.adr & 0x7f) as u8;
        let data = (self.drp_csr.dat_w & 0xffff) as u16;
        self.main_pll.drp_mut().write(adr, data);
        self.drp_csr.drdy = true;
      },
      DRP_ADR => {
        self.drp_csr.adr = value & 0x7f;
        self.drp_csr.drdy = false;
      },
      DRP_DAT_W => {
        self.drp_csr.dat_w = value & 0xffff;
        self.drp_csr.drdy = false;
      },
      DRP_COMMIT => {
        // outcome is reported through DRP_STATUS
        if let Err(e) = self.main_pll.commit() {
          warn!("csr: commit refused: {}", e);
        }
      },
      _ => return Err(Error::UnmappedRegister(addr)),
    }
    Ok(())
  }
}
