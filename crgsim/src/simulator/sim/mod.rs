pub mod mode;
pub mod shell;

pub use mode::StepMode;
pub use shell::{Command, Shell};
