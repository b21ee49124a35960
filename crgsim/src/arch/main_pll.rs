//! Reference Lock Stage: first PLL of the cascade, owner of the DRP.

use super::clock::{ClockDomain, DomainPort, Rate};
use super::drp::{Drp, ReconfigStatus};
use super::pll::{LockState, PllCore, PllLimits, PllParams};
use crate::builtin::Module;
use crate::error::{Error, Result};
use log::{debug, warn};

/// Lock and reset timing shared by the stages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTiming {
  pub lock_cycles: u32,
  pub lock_timeout_cycles: u32,
  pub reset_sync_stages: u32,
}

#[derive(Debug, Clone)]
struct InFlight {
  elapsed: u32,
  previous: PllParams,
}

pub struct ReferenceLockStage {
  name: String,
  ref_hz: u64,
  boot: PllParams,
  core: PllCore,
  drp: Drp,
  outputs: Vec<DomainPort>,
  calibration_output: usize,
  timing: StageTiming,
  status: ReconfigStatus,
  inflight: Option<InFlight>,
  reset_pulse: bool,

  /// Reset input, the inverse of "system ready"
  pub reset: bool,
}

impl ReferenceLockStage {
  pub fn new(
    name: impl Into<String>,
    ref_hz: u64,
    params: PllParams,
    domains: Vec<ClockDomain>,
    calibration_output: usize,
    limits: PllLimits,
    timing: StageTiming,
  ) -> Result<Self> {
    let name = name.into();
    if calibration_output >= domains.len() {
      return Err(Error::Config(format!(
        "{}: calibration output {} does not exist",
        name, calibration_output
      )));
    }
    let drp = Drp::from_params(&params)?;
    let outputs = domains
      .into_iter()
      .map(|d| DomainPort::new(d, timing.reset_sync_stages))
      .collect();
    Ok(Self {
      core: PllCore::new(name.clone(), limits, params.clone(), timing.lock_cycles),
      name,
      ref_hz,
      boot: params,
      drp,
      outputs,
      calibration_output,
      timing,
      status: ReconfigStatus::empty(),
      inflight: None,
      reset_pulse: false,
      reset: false,
    })
  }

  /// Apply the DRP shadow image as one transaction.
  ///
  /// Lock drops immediately; completion, timeout or abort shows up in
  /// [`status`](Self::status) on later ticks.
  pub fn commit(&mut self) -> Result<()> {
    if self.inflight.is_some() {
      self.status |= ReconfigStatus::REJECTED;
      return Err(Error::PortBusy);
    }
    if self.reset {
      self.status |= ReconfigStatus::REJECTED;
      return Err(Error::ResetDuringReconfiguration);
    }

    let clkin = Rate::from_hz(self.ref_hz);
    let limits = *self.core.limits();
    let params = match self.drp.decode().and_then(|p| p.validate(clkin, &limits).map(|_| p)) {
      Ok(params) => params,
      Err(e) => {
        warn!("{}: reconfiguration rejected: {}", self.name, e);
        self.status = ReconfigStatus::RANGE_ERROR;
        if let Err(load_err) = self.drp.load(self.core.params()) {
          warn!("{}: DRP rollback failed: {}", self.name, load_err);
        }
        return Err(e);
      },
    };

    debug!("{}: commit {:?}", self.name, params);
    let previous = self.core.params().clone();
    self.core.reconfigure(params);
    self.inflight = Some(InFlight { elapsed: 0, previous });
    self.status = ReconfigStatus::BUSY;
    Ok(())
  }

  /// One-tick PLL reset, settings unchanged
  pub fn pulse_reset(&mut self) {
    self.reset_pulse = true;
  }

  fn abort(&mut self, inflight: InFlight) {
    warn!("{}: reset during reconfiguration, request abandoned", self.name);
    if let Err(e) = self.drp.load(&inflight.previous) {
      warn!("{}: DRP rollback failed: {}", self.name, e);
    }
    self.core.reconfigure(inflight.previous);
    self.status = ReconfigStatus::ABORTED;
  }

  fn track_reconfiguration(&mut self) {
    let Some(inflight) = self.inflight.as_mut() else {
      return;
    };
    inflight.elapsed += 1;
    let elapsed = inflight.elapsed;
    if self.core.locked() {
      debug!("{}: relocked after {} cycles", self.name, elapsed);
      self.status = ReconfigStatus::DONE;
      self.inflight = None;
    } else if elapsed >= self.timeout_cycles() {
      warn!("{}: no lock after {} cycles", self.name, elapsed);
      self.status = ReconfigStatus::TIMEOUT;
      self.inflight = None;
    }
  }

  fn timeout_cycles(&self) -> u32 {
    self.timing.lock_timeout_cycles
  }

  pub fn locked(&self) -> bool {
    self.core.locked()
  }

  pub fn lock_state(&self) -> LockState {
    self.core.state()
  }

  pub fn status(&self) -> ReconfigStatus {
    self.status
  }

  pub fn reconfiguring(&self) -> bool {
    self.inflight.is_some()
  }

  pub fn drp(&self) -> &Drp {
    &self.drp
  }

  pub fn drp_mut(&mut self) -> &mut Drp {
    &mut self.drp
  }

  pub fn params(&self) -> &PllParams {
    self.core.params()
  }

  pub fn limits(&self) -> &PllLimits {
    self.core.limits()
  }

  pub fn outputs(&self) -> &[DomainPort] {
    &self.outputs
  }

  /// Clock feeding the cascade stage
  pub fn intermediate(&self) -> &DomainPort {
    &self.outputs[0]
  }

  pub fn calibration_clock(&self) -> &DomainPort {
    &self.outputs[self.calibration_output]
  }
}

impl Module for ReferenceLockStage {
  fn run(&mut self) {
    if self.reset {
      if let Some(inflight) = self.inflight.take() {
        self.abort(inflight);
      }
    }
    let reset = self.reset || std::mem::take(&mut self.reset_pulse);
    self.core.run(reset, Some(Rate::from_hz(self.ref_hz)));
    self.track_reconfiguration();

    let locked = self.core.locked();
    for (n, port) in self.outputs.iter_mut().enumerate() {
      port.drive(self.core.output(n), locked, self.ref_hz);
    }
    self.status.set(ReconfigStatus::LOCKED, locked);
  }

  fn reset(&mut self) {
    if let Err(e) = self.drp.load(&self.boot) {
      warn!("{}: DRP reload failed: {}", self.name, e);
    }
    self.core.reconfigure(self.boot.clone());
    self.outputs = self
      .outputs
      .iter()
      .map(|port| DomainPort::new(port.domain.clone(), self.timing.reset_sync_stages))
      .collect();
    self.status = ReconfigStatus::empty();
    self.inflight = None;
    self.reset_pulse = false;
  }

  fn name(&self) -> &str {
    &self.name
  }
}
