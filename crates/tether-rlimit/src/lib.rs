//! tether-rlimit: Soft/hard resource ceilings via getrlimit/setrlimit
//!
//! Provides the resource identifiers the governor understands and the
//! decision table that turns a requested ceiling into the soft/hard pair
//! committed to the kernel.

pub mod rlimit;

pub use rlimit::{EffectiveLimit, LimitRequest, ResourceKind, UNLIMITED, apply};
