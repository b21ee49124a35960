use clap::Parser;
use crgsim::simulator::config::{apply_cli_overrides, load_config, CliOverrides};
use crgsim::simulator::sim::mode::StepMode;
use crgsim::simulator::utils::log::init_log;
use crgsim::simulator::Simulator;
use std::path::PathBuf;
use std::process::ExitCode;

/// crgsim - clock/reset generator bench for a DDR memory controller
#[derive(Parser, Debug)]
#[command(name = "crgsim")]
#[command(version = "0.1.0")]
#[command(about = "PLL cascade, reset sequencing and frequency sweep bench", long_about = None)]
struct Args {
  /// Elaborate the clock tree and write csr.csv / crg.toml
  #[arg(long)]
  build: bool,

  /// Read the payload and bring the bench up until every stage is locked
  #[arg(long)]
  load: bool,

  /// Run the frequency sweep
  #[arg(long)]
  test: bool,

  /// Enable step mode (interactive stepping)
  #[arg(short, long)]
  step: bool,

  /// Configuration file (TOML), layered over the built-in defaults
  #[arg(short, long, value_name = "FILE")]
  config: Option<PathBuf>,

  /// Quiet mode (only warnings and errors)
  #[arg(short, long)]
  quiet: bool,

  /// Write sweep entries as JSON lines
  #[arg(long, value_name = "FILE")]
  trace_file: Option<PathBuf>,

  /// Lowest sweep frequency in Hz
  #[arg(long, value_name = "HZ")]
  freq_min: Option<u64>,

  /// Highest sweep frequency in Hz
  #[arg(long, value_name = "HZ")]
  freq_max: Option<u64>,

  /// Sweep increment in Hz
  #[arg(long, value_name = "HZ")]
  freq_step: Option<u64>,

  /// Known-good test payload
  #[arg(long, value_name = "FILE")]
  payload: Option<PathBuf>,

  /// End the sweep at the first failing candidate
  #[arg(long)]
  stop_on_first_failure: bool,
}

fn run(args: Args) -> crgsim::Result<()> {
  let mut config = load_config(args.config.as_deref())?;
  apply_cli_overrides(
    &mut config,
    &CliOverrides {
      quiet: args.quiet,
      step: args.step,
      trace_file: args.trace_file,
      freq_min: args.freq_min,
      freq_max: args.freq_max,
      freq_step: args.freq_step,
      payload: args.payload,
      stop_on_first_failure: args.stop_on_first_failure,
    },
  );

  let mut simulator = Simulator::from_app_config(&config)?;

  if args.build {
    simulator.build()?;
  }
  if args.load {
    simulator.load()?;
  }
  if args.test {
    simulator.test()?;
  }
  if config.simulation.step_mode || !(args.build || args.load || args.test) {
    simulator.step(StepMode::from(config.simulation.step_mode))?;
  }
  Ok(())
}

fn main() -> ExitCode {
  let args = Args::parse();
  init_log(args.quiet);

  match run(args) {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      log::error!("{}", e);
      ExitCode::FAILURE
    },
  }
}
