//! Functional memory test run through the SDRAM window.

use super::bus::BenchBus;
use crate::error::{Error, Result};
use log::debug;
use serde::Serialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MemTestReport {
  pub words: u32,
  pub errors: u32,
}

impl MemTestReport {
  pub fn passed(&self) -> bool {
    self.errors == 0
  }
}

pub trait MemoryTester {
  fn run(&mut self, bus: &mut dyn BenchBus) -> Result<MemTestReport>;
}

/// Read a payload image as little-endian words, zero-padding the tail.
pub fn load_payload(path: &Path) -> Result<Vec<u32>> {
  let bytes = fs::read(path).map_err(|source| Error::Payload {
    path: path.to_path_buf(),
    source,
  })?;
  Ok(
    bytes
      .chunks(4)
      .map(|chunk| {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        u32::from_le_bytes(word)
      })
      .collect(),
  )
}

/// Fails unless `words` 32-bit words fit in a `window` byte region.
pub fn check_payload_fits(words: usize, window: u32) -> Result<()> {
  let bytes = (words as u64).saturating_mul(4);
  if bytes > u64::from(window) {
    return Err(Error::PayloadTooLarge {
      words: words as u64,
      window: u64::from(window),
    });
  }
  Ok(())
}

/// Write-then-verify of a fixed word pattern.
pub struct PatternMemTest {
  base: u32,
  words: Vec<u32>,
}

impl PatternMemTest {
  pub fn new(base: u32, words: Vec<u32>) -> Self {
    Self { base, words }
  }

  /// Pseudo-random pattern (xorshift32)
  pub fn random(base: u32, count: u32, seed: u32) -> Self {
    let mut state = seed.max(1);
    let words = (0..count)
      .map(|_| {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        state
      })
      .collect();
    Self::new(base, words)
  }

  pub fn len(&self) -> usize {
    self.words.len()
  }

  pub fn is_empty(&self) -> bool {
    self.words.is_empty()
  }

  fn word_addr(&self, index: usize) -> Result<u32> {
    u32::try_from(index)
      .ok()
      .and_then(|i| i.checked_mul(4))
      .and_then(|offset| self.base.checked_add(offset))
      .ok_or(Error::PayloadTooLarge {
        words: self.words.len() as u64,
        window: (1u64 << 32) - u64::from(self.base),
      })
  }
}

impl MemoryTester for PatternMemTest {
  fn run(&mut self, bus: &mut dyn BenchBus) -> Result<MemTestReport> {
    for (i, &word) in self.words.iter().enumerate() {
      bus.write(self.word_addr(i)?, word)?;
    }
    let mut errors = 0;
    for (i, &word) in self.words.iter().enumerate() {
      if bus.read(self.word_addr(i)?)? != word {
        errors += 1;
      }
    }
    debug!("memtest: {} words, {} errors", self.words.len(), errors);
    Ok(MemTestReport {
      words: self.words.len() as u32,
      errors,
    })
  }
}
