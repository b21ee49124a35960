pub mod clock;
pub mod counter;
pub mod crg;
pub mod csr;
pub mod ddrphy;
pub mod drp;
pub mod idelayctrl;
pub mod main_pll;
pub mod pll;
pub mod sys_pll;

pub use clock::{ClockDomain, Rate, ResetPolicy};
pub use counter::{CounterReader, CounterSnapshot};
pub use crg::{ClockPlan, Crg, CrgSpec};
pub use ddrphy::SdramPhy;
pub use pll::LockState;
