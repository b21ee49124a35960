//! Dynamic reconfiguration port: 7-series DRP register image and status bits.

use super::pll::{ClkOut, PllParams};
use crate::error::{Error, Result};

pub const DRP_DEPTH: usize = 0x80;

/// (ClkReg1, ClkReg2) addresses of CLKOUT0..CLKOUT5
pub const CLKOUT_REGS: [(u8, u8); 6] = [
  (0x08, 0x09),
  (0x0A, 0x0B),
  (0x0C, 0x0D),
  (0x0E, 0x0F),
  (0x10, 0x11),
  (0x06, 0x07),
];
pub const CLKFBOUT_REG1: u8 = 0x14;
pub const CLKFBOUT_REG2: u8 = 0x15;
pub const DIVCLK_REG: u8 = 0x16;

const TIME_MAX: u32 = 0x3f;

bitflags::bitflags! {
  /// Reconfiguration status as exposed on the register bus
  #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
  pub struct ReconfigStatus: u32 {
    const BUSY = 1 << 0;
    const DONE = 1 << 1;
    const LOCKED = 1 << 2;
    const TIMEOUT = 1 << 3;
    const RANGE_ERROR = 1 << 4;
    const ABORTED = 1 << 5;
    const REJECTED = 1 << 6;
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClkReg1 {
  pub low_time: u8,
  pub high_time: u8,
  pub phase_mux: u8,
}

impl ClkReg1 {
  pub fn pack(&self) -> u16 {
    (self.low_time as u16 & 0x3f) | ((self.high_time as u16 & 0x3f) << 6) | ((self.phase_mux as u16 & 0x7) << 13)
  }

  pub fn unpack(value: u16) -> Self {
    Self {
      low_time: (value & 0x3f) as u8,
      high_time: ((value >> 6) & 0x3f) as u8,
      phase_mux: ((value >> 13) & 0x7) as u8,
    }
  }

  /// High/low split of `div`, odd dividers get the extra cycle high.
  pub fn for_divider(div: u32) -> Result<Self> {
    let high = div / 2 + div % 2;
    let low = div / 2;
    if div == 0 || high > TIME_MAX {
      return Err(Error::InvalidDrpField { field: "divider", value: div });
    }
    Ok(Self {
      low_time: low as u8,
      high_time: high as u8,
      phase_mux: 0,
    })
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClkReg2 {
  pub delay_time: u8,
  pub no_count: bool,
  pub edge: bool,
}

impl ClkReg2 {
  pub fn pack(&self) -> u16 {
    (self.delay_time as u16 & 0x3f) | ((self.no_count as u16) << 6) | ((self.edge as u16) << 7)
  }

  pub fn unpack(value: u16) -> Self {
    Self {
      delay_time: (value & 0x3f) as u8,
      no_count: value & (1 << 6) != 0,
      edge: value & (1 << 7) != 0,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DivClkReg {
  pub low_time: u8,
  pub high_time: u8,
  pub edge: bool,
  pub no_count: bool,
}

impl DivClkReg {
  pub fn pack(&self) -> u16 {
    (self.low_time as u16 & 0x3f)
      | ((self.high_time as u16 & 0x3f) << 6)
      | ((self.edge as u16) << 12)
      | ((self.no_count as u16) << 13)
  }

  pub fn unpack(value: u16) -> Self {
    Self {
      low_time: (value & 0x3f) as u8,
      high_time: ((value >> 6) & 0x3f) as u8,
      edge: value & (1 << 12) != 0,
      no_count: value & (1 << 13) != 0,
    }
  }

  pub fn divider(&self) -> u32 {
    if self.no_count {
      1
    } else {
      self.high_time as u32 + self.low_time as u32
    }
  }
}

/// Encode a counter (output divider or feedback multiplier) with its phase.
pub fn encode_counter(div: u32, phase: f64) -> Result<(ClkReg1, ClkReg2)> {
  let mut reg1 = ClkReg1::for_divider(div)?;
  let eighths_per_period = 8 * div;
  let eighths = ((phase.rem_euclid(360.0) / 360.0) * eighths_per_period as f64).round() as u32 % eighths_per_period;
  let delay = eighths / 8;
  if delay > TIME_MAX {
    return Err(Error::InvalidDrpField { field: "delay_time", value: delay });
  }
  reg1.phase_mux = (eighths % 8) as u8;
  let reg2 = ClkReg2 {
    delay_time: delay as u8,
    no_count: div == 1,
    edge: div % 2 == 1,
  };
  Ok((reg1, reg2))
}

pub fn decode_counter(reg1: ClkReg1, reg2: ClkReg2) -> Result<ClkOut> {
  let div = if reg2.no_count {
    1
  } else {
    reg1.high_time as u32 + reg1.low_time as u32
  };
  if div == 0 {
    return Err(Error::InvalidDrpField { field: "divider", value: 0 });
  }
  let eighths = reg2.delay_time as u32 * 8 + reg1.phase_mux as u32;
  Ok(ClkOut {
    div,
    phase: eighths as f64 * 360.0 / (8 * div) as f64,
  })
}

/// Shadow DRP register image. Writes land here; nothing reaches the PLL
/// until the owner decodes and commits the whole image.
#[derive(Debug, Clone)]
pub struct Drp {
  shadow: [u16; DRP_DEPTH],
  nclkouts: usize,
}

impl Drp {
  pub fn from_params(params: &PllParams) -> Result<Self> {
    let mut drp = Self {
      shadow: [0; DRP_DEPTH],
      nclkouts: params.clkouts.len(),
    };
    drp.load(params)?;
    Ok(drp)
  }

  /// Rewrite the image from `params`.
  pub fn load(&mut self, params: &PllParams) -> Result<()> {
    if params.clkouts.len() > CLKOUT_REGS.len() {
      return Err(Error::InvalidDrpField {
        field: "clkouts",
        value: params.clkouts.len() as u32,
      });
    }
    let mut shadow = [0u16; DRP_DEPTH];
    for (clkout, &(adr1, adr2)) in params.clkouts.iter().zip(CLKOUT_REGS.iter()) {
      let (reg1, reg2) = encode_counter(clkout.div, clkout.phase)?;
      shadow[adr1 as usize] = reg1.pack();
      shadow[adr2 as usize] = reg2.pack();
    }
    let (fb1, fb2) = encode_counter(params.mult, 0.0)?;
    shadow[CLKFBOUT_REG1 as usize] = fb1.pack();
    shadow[CLKFBOUT_REG2 as usize] = fb2.pack();

    let div = ClkReg1::for_divider(params.divclk)?;
    shadow[DIVCLK_REG as usize] = DivClkReg {
      low_time: div.low_time,
      high_time: div.high_time,
      edge: params.divclk % 2 == 1,
      no_count: params.divclk == 1,
    }
    .pack();

    self.shadow = shadow;
    self.nclkouts = params.clkouts.len();
    Ok(())
  }

  pub fn read(&self, adr: u8) -> u16 {
    self.shadow[adr as usize % DRP_DEPTH]
  }

  pub fn write(&mut self, adr: u8, value: u16) {
    self.shadow[adr as usize % DRP_DEPTH] = value;
  }

  /// Settings currently described by the image.
  pub fn decode(&self) -> Result<PllParams> {
    let clkouts = CLKOUT_REGS
      .iter()
      .take(self.nclkouts)
      .map(|&(adr1, adr2)| {
        decode_counter(
          ClkReg1::unpack(self.read(adr1)),
          ClkReg2::unpack(self.read(adr2)),
        )
      })
      .collect::<Result<Vec<_>>>()?;
    let mult = decode_counter(
      ClkReg1::unpack(self.read(CLKFBOUT_REG1)),
      ClkReg2::unpack(self.read(CLKFBOUT_REG2)),
    )?
    .div;
    let divclk = DivClkReg::unpack(self.read(DIVCLK_REG)).divider();
    if divclk == 0 {
      return Err(Error::InvalidDrpField { field: "divclk", value: 0 });
    }
    Ok(PllParams { divclk, mult, clkouts })
  }
}
