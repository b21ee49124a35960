pub mod arch;
pub mod builtin;
pub mod error;
pub mod simulator;

pub use error::{Error, Result};
pub use simulator::config::AppConfig;
pub use simulator::utils::log;
pub use simulator::Simulator;
