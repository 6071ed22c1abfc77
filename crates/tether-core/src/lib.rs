//! tether-core: shared types, errors, and numeric parsing for tether
//!
//! This crate provides the foundational pieces used by every tether sub-crate:
//! - Error taxonomy and Result alias
//! - Strict parsing of limit arguments (C-style flexible base)
//! - The process exit statuses the governor reports

pub mod error;
pub mod number;

pub use error::{Result, TetherError};
pub use number::{Prefix, parse_number, parse_prefix};

/// Exit status for help-only and dry-run invocations.
pub const EXIT_OK: i32 = 0;

/// Exit status for configuration, privilege and setup failures.
pub const EXIT_CONFIG: i32 = 1;

/// Exit status reported when the real-time watchdog expires.
pub const EXIT_TIMEOUT: i32 = 2;
