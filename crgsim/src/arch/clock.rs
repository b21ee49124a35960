//! Clock domains, exact clock rates and per-tick edge bookkeeping.

use crate::builtin::Wire;
use serde::{Deserialize, Serialize};
use std::fmt;

fn gcd(mut a: u128, mut b: u128) -> u128 {
  while b != 0 {
    let t = a % b;
    a = b;
    b = t;
  }
  a
}

/// An exact clock rate in Hz, kept as a reduced fraction.
///
/// PLL outputs are `clkin * mult / (divclk * div)`, so carrying the fraction
/// keeps integer relationships between sibling outputs exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rate {
  num: u128,
  den: u128,
}

impl Rate {
  pub fn from_hz(hz: u64) -> Self {
    Self {
      num: hz as u128,
      den: 1,
    }
  }

  pub fn ratio(num: u128, den: u128) -> Self {
    debug_assert_ne!(den, 0);
    let den = den.max(1);
    let g = gcd(num, den).max(1);
    Self {
      num: num / g,
      den: den / g,
    }
  }

  /// `self * mul / div`. `div` must be non-zero.
  pub fn scale(self, mul: u64, div: u64) -> Self {
    Self::ratio(self.num * mul as u128, self.den * div.max(1) as u128)
  }

  pub fn hz(&self) -> f64 {
    self.num as f64 / self.den as f64
  }

  pub fn is_zero(&self) -> bool {
    self.num == 0
  }

  /// `Some(k)` when `self == k * base` for an integer `k`.
  pub fn integer_multiple_of(&self, base: &Rate) -> Option<u64> {
    if base.is_zero() {
      return None;
    }
    let n = self.num * base.den;
    let d = self.den * base.num;
    if n % d == 0 {
      u64::try_from(n / d).ok()
    } else {
      None
    }
  }
}

impl Default for Rate {
  fn default() -> Self {
    Self { num: 0, den: 1 }
  }
}

impl fmt::Display for Rate {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:.3} MHz", self.hz() / 1e6)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResetPolicy {
  Resettable,
  ResetLess,
}

/// A named clock signal plus its reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClockDomain {
  pub name: String,
  /// Target (nominal) frequency in Hz
  pub frequency: u64,
  /// Phase offset in degrees
  pub phase: f64,
  pub policy: ResetPolicy,
}

impl ClockDomain {
  pub fn new(name: impl Into<String>, frequency: u64) -> Self {
    Self {
      name: name.into(),
      frequency,
      phase: 0.0,
      policy: ResetPolicy::Resettable,
    }
  }

  pub fn reset_less(mut self) -> Self {
    self.policy = ResetPolicy::ResetLess;
    self
  }

  pub fn with_phase(mut self, phase: f64) -> Self {
    self.phase = phase;
    self
  }
}

/// Asynchronous assert, synchronous release.
///
/// Reset follows the input immediately; release waits `stages` ticks of
/// deasserted input.
#[derive(Debug, Clone)]
pub struct ResetSynchronizer {
  stages: u32,
  remaining: u32,
}

impl ResetSynchronizer {
  pub fn new(stages: u32) -> Self {
    let stages = stages.max(1);
    Self {
      stages,
      remaining: stages,
    }
  }

  pub fn run(&mut self, async_reset: bool) -> bool {
    if async_reset {
      self.remaining = self.stages;
      return true;
    }
    if self.remaining > 0 {
      self.remaining -= 1;
      return true;
    }
    false
  }
}

/// Counts edges of a derived clock per reference tick.
#[derive(Debug, Clone, Default)]
pub struct EdgeAccumulator {
  acc: u128,
}

impl EdgeAccumulator {
  pub fn advance(&mut self, rate: Rate, ref_hz: u64) -> u64 {
    let threshold = rate.den * ref_hz.max(1) as u128;
    self.acc += rate.num;
    let edges = self.acc / threshold;
    self.acc %= threshold;
    edges as u64
  }

  pub fn clear(&mut self) {
    self.acc = 0;
  }
}

/// Runtime state of one clock domain as seen by its consumers.
#[derive(Debug, Clone)]
pub struct DomainPort {
  pub domain: ClockDomain,
  clock: Wire<Rate>,
  rst: bool,
  sync: ResetSynchronizer,
  acc: EdgeAccumulator,
  edges: u64,
  total_edges: u64,
}

impl DomainPort {
  pub fn new(domain: ClockDomain, sync_stages: u32) -> Self {
    let rst = domain.policy == ResetPolicy::Resettable;
    Self {
      domain,
      clock: Wire::default(),
      rst,
      sync: ResetSynchronizer::new(sync_stages),
      acc: EdgeAccumulator::default(),
      edges: 0,
      total_edges: 0,
    }
  }

  /// Drive the domain for one reference tick.
  ///
  /// `clock` is the PLL output; it only reaches consumers while the source
  /// reports lock.
  pub fn drive(&mut self, clock: Option<Rate>, source_locked: bool, ref_hz: u64) {
    self.rst = match self.domain.policy {
      ResetPolicy::Resettable => self.sync.run(!source_locked),
      ResetPolicy::ResetLess => false,
    };

    match clock {
      Some(rate) if source_locked && !rate.is_zero() => self.clock.set(rate),
      _ => {
        self.clock.clear();
        self.acc.clear();
      },
    }

    self.edges = if self.active() {
      self.acc.advance(self.clock.value, ref_hz)
    } else {
      self.acc.clear();
      0
    };
    self.total_edges += self.edges;
  }

  /// Clock running and, for resettable domains, out of reset
  pub fn active(&self) -> bool {
    self.clock.valid && !self.rst
  }

  /// Current reset level; `None` for reset-less domains.
  pub fn reset_signal(&self) -> Option<bool> {
    match self.domain.policy {
      ResetPolicy::Resettable => Some(self.rst),
      ResetPolicy::ResetLess => None,
    }
  }

  pub fn rate(&self) -> Option<Rate> {
    self.clock.get().copied()
  }

  /// Valid edges seen during the last tick
  pub fn edges(&self) -> u64 {
    self.edges
  }

  pub fn total_edges(&self) -> u64 {
    self.total_edges
  }

  pub fn name(&self) -> &str {
    &self.domain.name
  }
}
