//! Logging setup on top of `env_logger`.

use env_logger::{Builder, Env};
use log::LevelFilter;
use std::io::Write;

/// Initialise the global logger. `RUST_LOG` wins over `quiet`.
///
/// Safe to call more than once; later calls only adjust the max level.
pub fn init_log(quiet: bool) {
  let default = if quiet { "warn" } else { "info" };
  let result = Builder::from_env(Env::default().default_filter_or(default))
    .format(|buf, record| {
      writeln!(
        buf,
        "\x1b[34m[{}]\x1b[0m {}: {}",
        record.level(),
        record.target().trim_start_matches("crgsim::"),
        record.args()
      )
    })
    .try_init();
  if result.is_err() && quiet && std::env::var_os("RUST_LOG").is_none() {
    log::set_max_level(LevelFilter::Warn);
  }
}
