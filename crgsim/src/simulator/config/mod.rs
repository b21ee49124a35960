pub mod config;

pub use config::{
  apply_cli_overrides, load_config, load_default_config, validate_config, AppConfig, CliOverrides,
};
