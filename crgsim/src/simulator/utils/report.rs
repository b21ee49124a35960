use crate::arch::crg::ClockPlan;
use crate::error::Result;
use crate::simulator::sweep::{SweepEntry, SweepResult};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// JSON-lines sink for sweep entries.
pub struct TraceWriter {
  writer: BufWriter<File>,
}

impl TraceWriter {
  pub fn create(path: &Path) -> Result<Self> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
      std::fs::create_dir_all(dir)?;
    }
    Ok(Self {
      writer: BufWriter::new(File::create(path)?),
    })
  }

  pub fn write_entry(&mut self, entry: &SweepEntry) -> Result<()> {
    let line = serde_json::to_string(entry)?;
    writeln!(self.writer, "{}", line)?;
    self.writer.flush()?;
    Ok(())
  }

  pub fn write_all(&mut self, result: &SweepResult) -> Result<()> {
    for entry in &result.entries {
      self.write_entry(entry)?;
    }
    Ok(())
  }
}

fn mhz(hz: f64) -> String {
  format!("{:.3}", hz / 1e6)
}

pub fn print_build_summary(plan: &ClockPlan) {
  println!("\n--- Clock Plan ---");
  println!("{}: {} MHz", plan.reference.name, mhz(plan.reference.frequency as f64));
  for pll in [&plan.main_pll, &plan.sys_pll] {
    println!(
      "\n[{}] clkin {} MHz, divclk {}, mult {}, vco {} MHz",
      pll.name,
      mhz(pll.clkin),
      pll.params.divclk,
      pll.params.mult,
      mhz(pll.vco)
    );
    for out in &pll.outputs {
      println!(
        "  {:<10} div {:>3}  {:>9} MHz (target {} MHz, {:>5.1} deg)",
        out.domain.name,
        out.divide,
        mhz(out.achieved),
        mhz(out.domain.frequency as f64),
        out.domain.phase
      );
    }
  }
  println!("--- End Clock Plan ---\n");
}

pub fn print_sweep_report(result: &SweepResult) {
  println!("\n--- Sweep Results ---");
  println!(
    "{:>12} {:>4} {:>12} {:>12} {:>7} {:>7}  outcome",
    "requested", "div", "expected", "measured", "locked", "test"
  );
  for e in &result.entries {
    println!(
      "{:>12} {:>4} {:>12} {:>12} {:>7} {:>7}  {:?}{}",
      mhz(e.requested_hz as f64),
      e.divider,
      mhz(e.expected_hz),
      e.achieved_hz.map(mhz).unwrap_or_else(|| "-".to_string()),
      e.locked,
      e.test_passed,
      e.outcome,
      if e.reused { " (reused)" } else { "" }
    );
  }
  match result.max_passing() {
    Some(best) => println!(
      "\nmax passing: {} MHz requested, {} MHz measured",
      mhz(best.requested_hz as f64),
      best.achieved_hz.map(mhz).unwrap_or_else(|| "-".to_string())
    ),
    None => println!("\nno candidate passed"),
  }
  if let Some(stop) = result.stop {
    println!("stopped: {:?}", stop);
  }
  println!("--- End Sweep Results ---\n");
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::simulator::sweep::{Outcome, StopReason};

  #[test]
  fn trace_is_one_json_object_per_line() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out").join("trace.jsonl");
    let result = SweepResult {
      entries: vec![SweepEntry {
        requested_hz: 150_000_000,
        divider: 8,
        expected_hz: 150e6,
        achieved_hz: Some(150e6),
        locked: true,
        test_passed: true,
        outcome: Outcome::Passed,
        reused: false,
        memtest: None,
        detail: None,
      }],
      stop: Some(StopReason::RangeExhausted),
    };
    TraceWriter::create(&path).unwrap().write_all(&result).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    let v: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
    assert_eq!(v["divider"], 8);
    assert_eq!(v["outcome"], "passed");
  }
}
