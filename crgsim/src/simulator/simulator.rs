use super::bench::Bench;
use super::bus::BenchBus;
use super::config::{validate_config, AppConfig};
use super::memtest::{check_payload_fits, load_payload, PatternMemTest};
use super::sim::mode::StepMode;
use super::sim::shell::{Command, Shell};
use super::sweep::{FrequencySweep, SweepParams, SweepResult};
use super::utils::report::{print_build_summary, print_sweep_report, TraceWriter};
use crate::arch::csr;
use crate::error::Result;
use log::{info, warn};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;

const PATTERN_SEED: u32 = 0x1234_5678;

/// Files written by [`Simulator::build`]
#[derive(Debug, Clone)]
pub struct BuildArtifacts {
  pub csr_csv: PathBuf,
  pub clock_plan: PathBuf,
}

pub struct Simulator {
  config: AppConfig,
  bench: Bench,
  payload: Option<Vec<u32>>,
}

impl Simulator {
  pub fn from_app_config(config: &AppConfig) -> Result<Self> {
    validate_config(config)?;
    Ok(Self {
      config: config.clone(),
      bench: Bench::new(config)?,
      payload: None,
    })
  }

  pub fn config(&self) -> &AppConfig {
    &self.config
  }

  pub fn bench(&self) -> &Bench {
    &self.bench
  }

  pub fn bench_mut(&mut self) -> &mut Bench {
    &mut self.bench
  }

  /// Elaborate the clock tree; write `csr.csv` and `crg.toml`.
  pub fn build(&self) -> Result<BuildArtifacts> {
    let out_dir = &self.config.simulation.out_dir;
    fs::create_dir_all(out_dir)?;

    let csr_csv = out_dir.join("csr.csv");
    csr::write_csv(
      BufWriter::new(File::create(&csr_csv)?),
      self.config.sdram.base,
      self.config.sdram.size,
    )?;

    let plan = self.bench.crg().plan();
    let clock_plan = out_dir.join("crg.toml");
    fs::write(&clock_plan, toml::to_string_pretty(plan)?)?;

    if !self.config.simulation.quiet {
      print_build_summary(plan);
    }
    info!("build: wrote {:?} and {:?}", csr_csv, clock_plan);
    Ok(BuildArtifacts { csr_csv, clock_plan })
  }

  fn power_on_budget(&self) -> u64 {
    4 * self.config.crg.lock_timeout_cycles as u64
  }

  /// Read the test payload and bring the bench up.
  pub fn load(&mut self) -> Result<u64> {
    if let Some(path) = &self.config.sweep.payload {
      let words = load_payload(path)?;
      check_payload_fits(words.len(), self.config.sdram.size)?;
      info!("load: payload {:?}, {} words", path, words.len());
      self.payload = Some(words);
    }
    self.bench.power_on(self.power_on_budget())
  }

  fn tester(&mut self) -> Result<PatternMemTest> {
    let base = self.config.sdram.base;
    if self.payload.is_none() {
      if let Some(path) = &self.config.sweep.payload {
        self.payload = Some(load_payload(path)?);
      }
    }
    let tester = match &self.payload {
      Some(words) => PatternMemTest::new(base, words.clone()),
      None => PatternMemTest::random(base, self.config.sweep.payload_words, PATTERN_SEED),
    };
    check_payload_fits(tester.len(), self.config.sdram.size)?;
    Ok(tester)
  }

  /// Run the frequency sweep against the bench and report it.
  pub fn test(&mut self) -> Result<SweepResult> {
    if !self.bench.crg().ready() {
      self.bench.power_on(self.power_on_budget())?;
    }
    let tester = self.tester()?;
    let params = SweepParams::from_config(&self.config.sweep, self.bench.crg().plan());
    let mut sweep = FrequencySweep::new(params, tester);
    let outcome = sweep.run(&mut self.bench).map(|_| ());

    if let Some(path) = &self.config.simulation.trace_file {
      TraceWriter::create(path)?.write_all(sweep.result())?;
    }
    if let Err(e) = outcome {
      warn!("test: sweep abandoned in {:?}: {}", sweep.state(), e);
      return Err(e);
    }
    let result = sweep.into_result();
    if !self.config.simulation.quiet {
      print_sweep_report(&result);
    }
    Ok(result)
  }

  fn print_status(&self) {
    let crg = self.bench.crg();
    let lock = crg.lock_status();
    println!(
      "tick {:>8}  main {:?}  sys {:?}  idelayctrl {}  counter {}",
      crg.ticks(),
      lock.main,
      lock.sys,
      if crg.idelayctrl.ready() { "ready" } else { "-" },
      crg.counter().value
    );
  }

  /// Drive the bench tick by tick from an interactive shell.
  pub fn step(&mut self, mode: StepMode) -> Result<()> {
    if mode == StepMode::Continuous {
      let ticks = self.bench.power_on(self.power_on_budget())?;
      println!("ready after {} ticks", ticks);
      self.print_status();
      return Ok(());
    }

    println!("Step mode - Press Enter to step, 'q' to quit");
    let mut shell = Shell::new()?;
    loop {
      match shell.read_command()? {
        Command::Step(n) => {
          self.bench.tick(n as u64);
          self.print_status();
        },
        Command::Read(addr) => match self.bench.read(addr) {
          Ok(v) => println!("0x{:08x}: 0x{:08x}", addr, v),
          Err(e) => eprintln!("Error: {}", e),
        },
        Command::ToggleReset => {
          let crg = self.bench.crg_mut();
          let ready = crg.global_reset_asserted();
          crg.set_system_ready(ready);
          println!("system_ready = {}", ready);
        },
        Command::Continue => {
          let budget = self.power_on_budget();
          match self.bench.crg_mut().run_until(budget, |c| c.ready()) {
            Some(n) => println!("ready after {} ticks", n),
            None => println!("not ready after {} ticks", budget),
          }
          self.print_status();
        },
        Command::Quit => break,
      }
    }
    Ok(())
  }
}
