pub mod bench;
pub mod bus;
pub mod config;
pub mod memtest;
pub mod sim;
pub mod simulator;
pub mod sweep;
pub mod utils;

pub use bench::Bench;
pub use bus::BenchBus;
pub use simulator::Simulator;
pub use utils::log;
