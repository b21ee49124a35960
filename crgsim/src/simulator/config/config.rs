use crate::arch::crg::CrgSpec;
use crate::arch::main_pll::StageTiming;
use crate::arch::pll::PllLimits;
use crate::error::{Error, Result};
use crate::simulator::sweep::StopPolicy;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Embedded defaults, the first configuration layer
pub const DEFAULT_TOML: &str = include_str!("default.toml");

pub const ENV_PREFIX: &str = "CRGSIM";

/// Reference oscillator
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ReferenceSection {
  pub name: String,
  pub frequency: u64,
}

impl Default for ReferenceSection {
  fn default() -> Self {
    Self {
      name: "clk100".to_string(),
      frequency: 100_000_000,
    }
  }
}

/// Clock tree and lock timing
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CrgSection {
  pub sys_clk_freq: u64,
  pub speedgrade: i32,
  pub idelay_freq: u64,
  pub uart_freq: u64,
  pub lock_cycles: u32,
  pub lock_timeout_cycles: u32,
  pub reset_sync_stages: u32,
  pub idelayctrl_reset_cycles: u32,
  pub margin: f64,
}

impl Default for CrgSection {
  fn default() -> Self {
    Self {
      sys_clk_freq: 150_000_000,
      speedgrade: -1,
      idelay_freq: 200_000_000,
      uart_freq: 100_000_000,
      lock_cycles: 1000,
      lock_timeout_cycles: 20000,
      reset_sync_stages: 1,
      idelayctrl_reset_cycles: 16,
      margin: 1e-2,
    }
  }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SdramSection {
  pub base: u32,
  pub size: u32,
  /// Highest operating clock at which the PHY stores data intact
  pub max_functional_freq: u64,
}

impl Default for SdramSection {
  fn default() -> Self {
    Self {
      base: 0x4000_0000,
      size: 0x1000_0000,
      max_functional_freq: 160_000_000,
    }
  }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SweepSection {
  pub freq_min: u64,
  pub freq_max: u64,
  pub freq_step: u64,
  /// VCO the candidate dividers are derived from; the elaborated main PLL VCO when unset
  pub vco_freq: Option<u64>,
  /// Known-good test image; a generated pattern of `payload_words` words when unset
  pub payload: Option<PathBuf>,
  pub payload_words: u32,
  pub measure_window_us: u64,
  pub poll_interval_us: u64,
  pub lock_poll_limit: u32,
  pub stop_policy: StopPolicy,
  pub skip_duplicate_dividers: bool,
  pub validate_candidates: bool,
}

impl Default for SweepSection {
  fn default() -> Self {
    Self {
      freq_min: 60_000_000,
      freq_max: 150_000_000,
      freq_step: 1_000_000,
      vco_freq: None,
      payload: None,
      payload_words: 256,
      measure_window_us: 100,
      poll_interval_us: 5,
      lock_poll_limit: 400,
      stop_policy: StopPolicy::ExhaustRange,
      skip_duplicate_dividers: true,
      validate_candidates: true,
    }
  }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SimulationSection {
  pub quiet: bool,
  pub step_mode: bool,
  pub trace_file: Option<PathBuf>,
  pub out_dir: PathBuf,
}

impl Default for SimulationSection {
  fn default() -> Self {
    Self {
      quiet: false,
      step_mode: false,
      trace_file: None,
      out_dir: PathBuf::from("build"),
    }
  }
}

/// Whole application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct AppConfig {
  #[serde(default)]
  pub reference: ReferenceSection,
  #[serde(default)]
  pub crg: CrgSection,
  #[serde(default)]
  pub sdram: SdramSection,
  #[serde(default)]
  pub sweep: SweepSection,
  #[serde(default)]
  pub simulation: SimulationSection,
}

impl AppConfig {
  pub fn crg_spec(&self) -> CrgSpec {
    CrgSpec {
      ref_name: self.reference.name.clone(),
      ref_hz: self.reference.frequency,
      sys_clk_freq: self.crg.sys_clk_freq,
      idelay_freq: self.crg.idelay_freq,
      uart_freq: self.crg.uart_freq,
      ratio: 4,
      speedgrade: self.crg.speedgrade,
      margin: self.crg.margin,
      timing: StageTiming {
        lock_cycles: self.crg.lock_cycles,
        lock_timeout_cycles: self.crg.lock_timeout_cycles,
        reset_sync_stages: self.crg.reset_sync_stages,
      },
      idelayctrl_reset_cycles: self.crg.idelayctrl_reset_cycles,
    }
  }
}

/// Command-line values layered on top of every other source
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
  pub quiet: bool,
  pub step: bool,
  pub trace_file: Option<PathBuf>,
  pub freq_min: Option<u64>,
  pub freq_max: Option<u64>,
  pub freq_step: Option<u64>,
  pub payload: Option<PathBuf>,
  pub stop_on_first_failure: bool,
}

/// Load the embedded defaults only
pub fn load_default_config() -> Result<AppConfig> {
  load_layers(None, None)
}

/// Defaults, then `path` (if any), then `CRGSIM_*` variables of the process environment.
///
/// Relative paths inside the file resolve against the file's directory.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
  let mut config = load_layers(path, None)?;
  if let Some(dir) = path.and_then(Path::parent) {
    resolve_paths(&mut config, dir);
  }
  Ok(config)
}

/// Same as [`load_config`] with the environment taken from `env` instead of the process.
pub fn load_config_with_env(path: Option<&Path>, env: config::Map<String, String>) -> Result<AppConfig> {
  let mut config = load_layers(path, Some(env))?;
  if let Some(dir) = path.and_then(Path::parent) {
    resolve_paths(&mut config, dir);
  }
  Ok(config)
}

fn load_layers(path: Option<&Path>, env: Option<config::Map<String, String>>) -> Result<AppConfig> {
  let mut builder = Config::builder().add_source(File::from_str(DEFAULT_TOML, FileFormat::Toml));
  if let Some(path) = path {
    builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
  }
  builder = builder.add_source(
    Environment::with_prefix(ENV_PREFIX)
      .prefix_separator("_")
      .separator("__")
      .try_parsing(true)
      .source(env),
  );
  Ok(builder.build()?.try_deserialize::<AppConfig>()?)
}

/// Make relative payload, trace and output paths relative to `base`.
pub fn resolve_paths(config: &mut AppConfig, base: &Path) {
  let rebase = |p: &mut PathBuf| {
    if p.is_relative() {
      *p = base.join(&*p);
    }
  };
  if let Some(payload) = config.sweep.payload.as_mut() {
    rebase(payload);
  }
  if let Some(trace) = config.simulation.trace_file.as_mut() {
    rebase(trace);
  }
  rebase(&mut config.simulation.out_dir);
}

pub fn apply_cli_overrides(config: &mut AppConfig, cli: &CliOverrides) {
  if cli.quiet {
    config.simulation.quiet = true;
  }
  if cli.step {
    config.simulation.step_mode = true;
  }
  if let Some(file) = &cli.trace_file {
    config.simulation.trace_file = Some(file.clone());
  }
  if let Some(v) = cli.freq_min {
    config.sweep.freq_min = v;
  }
  if let Some(v) = cli.freq_max {
    config.sweep.freq_max = v;
  }
  if let Some(v) = cli.freq_step {
    config.sweep.freq_step = v;
  }
  if let Some(payload) = &cli.payload {
    config.sweep.payload = Some(payload.clone());
  }
  if cli.stop_on_first_failure {
    config.sweep.stop_policy = StopPolicy::FirstFailure;
  }
}

fn invalid(msg: impl Into<String>) -> Error {
  Error::Config(msg.into())
}

pub fn validate_config(config: &AppConfig) -> Result<()> {
  if config.reference.frequency == 0 {
    return Err(invalid("reference.frequency must be non-zero"));
  }
  PllLimits::series7(config.crg.speedgrade)?;
  if config.crg.reset_sync_stages == 0 {
    return Err(invalid("crg.reset_sync_stages must be at least 1"));
  }
  if config.crg.lock_timeout_cycles <= config.crg.lock_cycles {
    return Err(invalid("crg.lock_timeout_cycles must exceed crg.lock_cycles"));
  }
  if !(config.crg.margin > 0.0 && config.crg.margin < 1.0) {
    return Err(invalid(format!("crg.margin {} outside (0, 1)", config.crg.margin)));
  }

  if config.sdram.size == 0 || config.sdram.base % 4 != 0 {
    return Err(invalid("sdram window must be non-empty and word aligned"));
  }
  if config.sdram.base.checked_add(config.sdram.size - 1).is_none() {
    return Err(invalid("sdram window exceeds the 32-bit address space"));
  }

  let sweep = &config.sweep;
  if sweep.freq_min == 0 {
    return Err(invalid("sweep.freq_min must be non-zero"));
  }
  if sweep.freq_min > sweep.freq_max {
    return Err(invalid(format!(
      "sweep range inverted: freq_min {} > freq_max {}",
      sweep.freq_min, sweep.freq_max
    )));
  }
  if sweep.freq_step == 0 {
    return Err(invalid("sweep.freq_step must be non-zero"));
  }
  if sweep.measure_window_us == 0 || sweep.poll_interval_us == 0 || sweep.lock_poll_limit == 0 {
    return Err(invalid("sweep timing values must be non-zero"));
  }
  if sweep.payload.is_none() && sweep.payload_words == 0 {
    return Err(invalid("sweep.payload_words must be non-zero without a payload file"));
  }
  if sweep.payload.is_none() && u64::from(sweep.payload_words) * 4 > u64::from(config.sdram.size) {
    return Err(invalid(format!(
      "sweep.payload_words {} exceeds the {} byte sdram window",
      sweep.payload_words, config.sdram.size
    )));
  }
  if sweep.vco_freq == Some(0) {
    return Err(invalid("sweep.vco_freq must be non-zero"));
  }
  Ok(())
}
