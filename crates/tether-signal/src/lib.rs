//! tether-signal: signal plumbing for the governed process
//!
//! - [`install`]: handler installation with a shared alternate signal stack
//! - [`group`]: the process group the governor owns
//! - [`watchdog`]: one-shot real-time deadline that takes the whole group down
//! - [`trace`]: stack dumps for diagnosing a dying test

pub mod group;
pub mod install;
pub mod trace;
pub mod watchdog;

pub use install::{HandlerFn, SignalHandlerBinding, install, reraise, restore_default};
pub use trace::{stacktrace, stacktrace_to};
pub use watchdog::WatchdogState;
