pub mod log;
pub mod report;

pub use self::log::init_log;
