//! Free-running cycle counter of the operating clock.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Single writer: only the operating clock domain advances it.
#[derive(Debug, Default)]
pub struct CycleCounter {
  value: Arc<AtomicU32>,
}

/// Read handle; clone freely, every reader sees the same counter.
#[derive(Debug, Clone)]
pub struct CounterReader {
  value: Arc<AtomicU32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
  pub value: u32,
}

impl CounterSnapshot {
  /// Cycles elapsed since `earlier`, modulo 2^32.
  pub fn cycles_since(&self, earlier: CounterSnapshot) -> u32 {
    self.value.wrapping_sub(earlier.value)
  }
}

impl CycleCounter {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn reader(&self) -> CounterReader {
    CounterReader {
      value: Arc::clone(&self.value),
    }
  }

  /// Count `edges` operating-clock cycles, wrapping at 2^32.
  pub fn advance(&self, edges: u64) {
    if edges > 0 {
      self.value.fetch_add(edges as u32, Ordering::Release);
    }
  }

  /// Power-on / global reset
  pub fn clear(&self) {
    self.value.store(0, Ordering::Release);
  }

  pub fn snapshot(&self) -> CounterSnapshot {
    self.reader().snapshot()
  }
}

impl CounterReader {
  pub fn snapshot(&self) -> CounterSnapshot {
    CounterSnapshot {
      value: self.value.load(Ordering::Acquire),
    }
  }
}
