//! Governor orchestration
//!
//! `Init -> GroupEstablished -> LimitsApplied -> WatchdogArmed -> Running -> Exited`
//!
//! Limits are always fully applied, and the watchdog armed, before any suite
//! code runs. The first limit that cannot be applied stops setup.

use std::fmt;

use log::{debug, error, warn};
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use tether_core::Result;
use tether_rlimit::{EffectiveLimit, ResourceKind};
use tether_signal::{group, restore_default, watchdog};

use crate::config::{GovernorConfig, WatchdogRequest};
use crate::suite::{SuiteOutcome, SuiteRunner};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum GovernorState {
    Init,
    GroupEstablished,
    LimitsApplied,
    WatchdogArmed,
    Running,
    Exited,
}

impl fmt::Display for GovernorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GovernorState::Init => "init",
            GovernorState::GroupEstablished => "group-established",
            GovernorState::LimitsApplied => "limits-applied",
            GovernorState::WatchdogArmed => "watchdog-armed",
            GovernorState::Running => "running",
            GovernorState::Exited => "exited",
        };
        f.write_str(name)
    }
}

/// Sets up the governed process and runs the suite under it
pub struct Governor {
    config: GovernorConfig,
    program: String,
    state: GovernorState,
    group: Option<Pid>,
    applied: Vec<(ResourceKind, EffectiveLimit)>,
}

impl Governor {
    pub fn new(config: GovernorConfig) -> Self {
        Self {
            config,
            program: "tether".to_string(),
            state: GovernorState::Init,
            group: None,
            applied: Vec::new(),
        }
    }

    /// Name used as the prefix of the debug echo
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn state(&self) -> GovernorState {
        self.state
    }

    /// The process group the watchdog targets, if one could be created
    pub fn process_group(&self) -> Option<Pid> {
        self.group
    }

    /// Pairs committed so far, in application order
    pub fn applied(&self) -> &[(ResourceKind, EffectiveLimit)] {
        &self.applied
    }

    fn transition(&mut self, next: GovernorState) {
        debug!("governor: {} -> {}", self.state, next);
        self.state = next;
    }

    /// Move into a private process group. Failure only narrows the watchdog
    /// to this process, so it is logged and setup continues.
    pub fn establish_group(&mut self) {
        match group::establish() {
            Ok(pgid) => self.group = Some(pgid),
            Err(e) => warn!("{}: {}; watchdog will only stop this process", self.program, e),
        }
        self.transition(GovernorState::GroupEstablished);
    }

    /// Apply every request in configuration order, stopping at the first failure
    pub fn apply_limits(&mut self) -> Result<()> {
        for request in &self.config.requests {
            match request.apply() {
                Ok(limit) => {
                    debug!(
                        "{}: {} in {}: {}",
                        self.program,
                        request.kind,
                        request.kind.unit(),
                        limit
                    );
                    self.applied.push((request.kind, limit));
                }
                Err(e) => {
                    if e.is_privilege() {
                        error!(
                            "{}: {}; the kernel refused to raise the hard ceiling",
                            self.program, e
                        );
                    } else {
                        error!("{}: {}", self.program, e);
                    }
                    self.state = GovernorState::Exited;
                    return Err(e);
                }
            }
        }
        self.transition(GovernorState::LimitsApplied);
        Ok(())
    }

    /// Install the expiry handler, then arm. A disarm request cancels any
    /// inherited deadline and puts SIGALRM back to its default.
    pub fn arm_watchdog(&mut self) -> Result<()> {
        match self.config.watchdog {
            Some(WatchdogRequest::Arm(seconds)) => {
                let armed = watchdog::install_handler().and_then(|_| watchdog::arm(seconds));
                if let Err(e) = armed {
                    error!("{}: {}", self.program, e);
                    self.state = GovernorState::Exited;
                    return Err(e);
                }
                self.transition(GovernorState::WatchdogArmed);
            }
            Some(WatchdogRequest::Disarm) => {
                if let Err(e) = watchdog::disarm() {
                    error!("{}: {}", self.program, e);
                    self.state = GovernorState::Exited;
                    return Err(e);
                }
                restore_default(Signal::SIGALRM);
            }
            None => {}
        }
        Ok(())
    }

    fn echo(&self) {
        if !self.config.debug {
            return;
        }
        for option in &self.config.accepted {
            debug!("{}: {}", self.program, option);
        }
        for (key, value) in std::env::vars_os() {
            debug!(
                "{}: {}={}",
                self.program,
                key.to_string_lossy(),
                value.to_string_lossy()
            );
        }
    }

    /// Run setup up to the point the suite would start.
    ///
    /// A dry run stops after the limits: it never arms the watchdog.
    pub fn prepare(&mut self) -> Result<()> {
        if self.state != GovernorState::Init {
            return Ok(());
        }
        self.establish_group();
        self.apply_limits()?;
        self.echo();
        if !self.config.dry_run {
            self.arm_watchdog()?;
        }
        Ok(())
    }

    /// Prepare, then hand control to `suite` and pass its outcome through.
    pub fn run<S: SuiteRunner + ?Sized>(&mut self, suite: &mut S) -> Result<SuiteOutcome> {
        self.prepare()?;

        if self.config.dry_run {
            debug!("{}: dry run, suite not started", self.program);
            self.transition(GovernorState::Exited);
            return Ok(SuiteOutcome::Skipped);
        }

        self.transition(GovernorState::Running);
        let outcome = suite.run();
        self.transition(GovernorState::Exited);

        let outcome = outcome.inspect_err(|e| error!("{}: {}", self.program, e))?;
        debug!("{}: suite finished: {}", self.program, outcome);
        Ok(outcome)
    }
}
