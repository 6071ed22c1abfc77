//! Governor configuration and the canonical flag table
//!
//! Every resource has exactly one row in [`FLAGS`]. Front ends derive their
//! option letters from it; the letters are presentation only and the
//! governor never looks at them except to echo accepted options.

use tether_core::{Result, TetherError};
use tether_rlimit::{LimitRequest, ResourceKind};

/// Command-line presentation of one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagSpec {
    pub kind: ResourceKind,
    /// Letter that takes a value (`-c SECONDS`)
    pub set: char,
    /// Letter that requests unlimited (`-C`)
    pub unlimited: char,
    /// Variant letters for `set`
    pub set_aliases: &'static [char],
    /// Variant letters for `unlimited`
    pub unlimited_aliases: &'static [char],
    pub long: &'static str,
    pub long_unlimited: &'static str,
    pub value_name: &'static str,
    pub help: &'static str,
}

pub const FLAGS: [FlagSpec; 9] = [
    FlagSpec {
        kind: ResourceKind::CpuTime,
        set: 'c',
        unlimited: 'C',
        set_aliases: &[],
        unlimited_aliases: &[],
        long: "cpu",
        long_unlimited: "cpu-unlimited",
        value_name: "SECONDS",
        help: "process CPU time limit",
    },
    FlagSpec {
        kind: ResourceKind::DataSegment,
        set: 'd',
        unlimited: 'D',
        set_aliases: &[],
        unlimited_aliases: &[],
        long: "data",
        long_unlimited: "data-unlimited",
        value_name: "BYTES",
        help: "process data segment size limit",
    },
    FlagSpec {
        kind: ResourceKind::CoreFileSize,
        set: 'e',
        unlimited: 'E',
        set_aliases: &[],
        unlimited_aliases: &[],
        long: "core",
        long_unlimited: "core-unlimited",
        value_name: "BYTES",
        help: "process core file limit",
    },
    FlagSpec {
        kind: ResourceKind::FileSize,
        set: 'f',
        unlimited: 'F',
        set_aliases: &[],
        unlimited_aliases: &[],
        long: "file-size",
        long_unlimited: "file-size-unlimited",
        value_name: "BYTES",
        help: "process file size limit",
    },
    FlagSpec {
        kind: ResourceKind::VirtualMemory,
        set: 'm',
        unlimited: 'M',
        set_aliases: &['v'],
        unlimited_aliases: &['V'],
        long: "memory",
        long_unlimited: "memory-unlimited",
        value_name: "BYTES",
        help: "process virtual memory limit",
    },
    FlagSpec {
        kind: ResourceKind::OpenFiles,
        set: 'o',
        unlimited: 'O',
        set_aliases: &[],
        unlimited_aliases: &[],
        long: "open-files",
        long_unlimited: "open-files-unlimited",
        value_name: "OPENED",
        help: "process open file descriptor limit",
    },
    FlagSpec {
        kind: ResourceKind::RealTime,
        set: 'r',
        unlimited: 'R',
        set_aliases: &[],
        unlimited_aliases: &[],
        long: "real",
        long_unlimited: "real-unlimited",
        value_name: "SECONDS",
        help: "process real time limit",
    },
    FlagSpec {
        kind: ResourceKind::StackSize,
        set: 's',
        unlimited: 'S',
        set_aliases: &[],
        unlimited_aliases: &[],
        long: "stack",
        long_unlimited: "stack-unlimited",
        value_name: "BYTES",
        help: "process stack size limit",
    },
    FlagSpec {
        kind: ResourceKind::ProcessCount,
        set: 't',
        unlimited: 'T',
        set_aliases: &[],
        unlimited_aliases: &[],
        long: "threads",
        long_unlimited: "threads-unlimited",
        value_name: "THREADS",
        help: "user process and thread limit",
    },
];

/// The table row for `kind`
pub fn flag(kind: ResourceKind) -> &'static FlagSpec {
    let row = match kind {
        ResourceKind::CpuTime => 0,
        ResourceKind::DataSegment => 1,
        ResourceKind::CoreFileSize => 2,
        ResourceKind::FileSize => 3,
        ResourceKind::VirtualMemory => 4,
        ResourceKind::OpenFiles => 5,
        ResourceKind::RealTime => 6,
        ResourceKind::StackSize => 7,
        ResourceKind::ProcessCount => 8,
    };
    &FLAGS[row]
}

/// What to do with the real-time watchdog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogRequest {
    /// Expire after this many seconds
    Arm(u64),
    /// Cancel any inherited deadline
    Disarm,
}

/// Everything the governor needs, fixed before setup begins
#[derive(Debug, Clone, Default)]
pub struct GovernorConfig {
    /// Limits in the order they were given
    pub requests: Vec<LimitRequest>,
    pub watchdog: Option<WatchdogRequest>,
    /// Echo accepted options and the environment
    pub debug: bool,
    /// Apply limits, then stop without running the suite
    pub dry_run: bool,
    /// Raise hard ceilings instead of clamping to them
    pub force: bool,
    /// Accepted options as they would be typed, for the debug echo
    pub accepted: Vec<String>,
}

impl GovernorConfig {
    pub fn builder() -> GovernorConfigBuilder {
        GovernorConfigBuilder::default()
    }

    /// Requested ceiling for `kind`, last request wins. `Some(None)` is unlimited.
    pub fn requested(&self, kind: ResourceKind) -> Option<Option<u64>> {
        self.requests
            .iter()
            .rev()
            .find(|request| request.kind == kind)
            .map(|request| request.value)
    }
}

/// Builder for [`GovernorConfig`]
#[derive(Debug, Default)]
pub struct GovernorConfigBuilder {
    config: GovernorConfig,
}

impl GovernorConfigBuilder {
    /// Request `value` for `kind`
    pub fn limit(mut self, kind: ResourceKind, value: u64) -> Self {
        let spec = flag(kind);
        self.config.accepted.push(format!("-{} {}", spec.set, value));
        match kind {
            ResourceKind::RealTime => self.config.watchdog = Some(WatchdogRequest::Arm(value)),
            _ => self.config.requests.push(LimitRequest::new(kind, value)),
        }
        self
    }

    /// Request no ceiling for `kind`
    pub fn unlimited(mut self, kind: ResourceKind) -> Self {
        let spec = flag(kind);
        self.config.accepted.push(format!("-{}", spec.unlimited));
        match kind {
            ResourceKind::RealTime => self.config.watchdog = Some(WatchdogRequest::Disarm),
            _ => self.config.requests.push(LimitRequest::unlimited(kind)),
        }
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.config.force = force;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        if debug {
            self.config.accepted.push("-!".to_string());
        }
        self.config.debug = debug;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        if dry_run {
            self.config.accepted.push("-0".to_string());
        }
        self.config.dry_run = dry_run;
        self
    }

    /// Validate and freeze the configuration
    pub fn build(mut self) -> Result<GovernorConfig> {
        let force = self.config.force;
        for request in &mut self.config.requests {
            request.force = force;
        }

        match self.config.watchdog {
            Some(WatchdogRequest::Arm(0)) => self.config.watchdog = Some(WatchdogRequest::Disarm),
            Some(WatchdogRequest::Arm(seconds)) if libc::time_t::try_from(seconds).is_err() => {
                return Err(TetherError::InvalidConfig(format!(
                    "real time limit of {} seconds is out of range",
                    seconds
                )));
            }
            _ => {}
        }

        Ok(self.config)
    }
}
