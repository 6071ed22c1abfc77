//! tether: process-level resource governor for test suites
//!
//! Before a suite runs, tether moves the process into a group of its own,
//! applies the requested rlimits and arms a real-time watchdog that takes the
//! whole group down on expiry. Suites that exhaust resources on purpose
//! (memory bombs, fork bombs, infinite loops, stack overflows) can then run
//! as death tests without hanging or destabilizing the host.
//!
//! # Example
//!
//! ```ignore
//! use tether::{CommandSuite, Governor, GovernorConfig, ResourceKind};
//!
//! let config = GovernorConfig::builder()
//!     .limit(ResourceKind::CpuTime, 10)
//!     .limit(ResourceKind::OpenFiles, 64)
//!     .limit(ResourceKind::RealTime, 30)
//!     .build()?;
//!
//! let mut suite = CommandSuite::new("./run-tests");
//! let outcome = Governor::new(config).run(&mut suite)?;
//! println!("{}", outcome);
//! ```

pub mod config;
pub mod governor;
pub mod probe;
pub mod suite;

pub use tether_core::{
    self as core, EXIT_CONFIG, EXIT_OK, EXIT_TIMEOUT, Result, TetherError, parse_number,
};
pub use tether_rlimit::{EffectiveLimit, LimitRequest, ResourceKind, UNLIMITED};
pub use tether_signal::{self as signal, SignalHandlerBinding, WatchdogState};

pub use config::{FLAGS, FlagSpec, GovernorConfig, GovernorConfigBuilder, WatchdogRequest};
pub use governor::{Governor, GovernorState};
pub use probe::Probe;
pub use suite::{CommandSuite, SuiteOutcome, SuiteRunner};
