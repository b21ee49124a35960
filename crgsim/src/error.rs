use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
  #[error("PLL did not lock within {cycles} cycles (requested {requested_hz} Hz)")]
  LockTimeout { requested_hz: u64, cycles: u64 },

  #[error("{what} = {value} outside valid range [{min}, {max}]")]
  OutOfRange {
    what: &'static str,
    value: f64,
    min: f64,
    max: f64,
  },

  #[error("global reset asserted while a reconfiguration was in flight")]
  ResetDuringReconfiguration,

  #[error("reconfiguration port busy")]
  PortBusy,

  #[error("no PLL configuration found for clkin {clkin_hz} Hz")]
  NoPllConfig { clkin_hz: u64 },

  #[error("unmapped register 0x{0:08x}")]
  UnmappedRegister(u32),

  #[error("register 0x{0:08x} is read-only")]
  ReadOnlyRegister(u32),

  #[error("payload of {words} words does not fit the {window} byte SDRAM window")]
  PayloadTooLarge { words: u64, window: u64 },

  #[error("SDRAM PHY not ready")]
  PhyNotReady,

  #[error("invalid DRP field {field} = {value}")]
  InvalidDrpField { field: &'static str, value: u32 },

  #[error("configuration error: {0}")]
  Config(String),

  #[error("cannot read payload {path:?}: {source}")]
  Payload {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  #[error("config source error: {0}")]
  ConfigSource(#[from] config::ConfigError),

  #[error("TOML serialization error: {0}")]
  Toml(#[from] toml::ser::Error),

  #[error("JSON error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("CSV error: {0}")]
  Csv(#[from] csv::Error),

  #[error("readline error: {0}")]
  Readline(#[from] rustyline::error::ReadlineError),
}

impl Error {
  pub(crate) fn out_of_range(what: &'static str, value: f64, min: f64, max: f64) -> Self {
    Error::OutOfRange { what, value, min, max }
  }
}

pub type Result<T> = std::result::Result<T, Error>;
