/// Cycle-model building blocks shared by every hardware model
pub mod port;

pub use port::Wire;

/// A block of synchronous logic advanced once per reference tick.
///
/// `run` evaluates one tick. Parents call their children in dependency
/// order and copy outputs to inputs between calls.
pub trait Module {
  fn run(&mut self);
  fn reset(&mut self);
  fn name(&self) -> &str;
}
