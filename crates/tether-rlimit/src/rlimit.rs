//! setrlimit-based resource ceilings (no privileges needed to lower them)
//!
//! A request below the current hard ceiling only moves the soft limit. A
//! request at or above the hard ceiling is clamped to that ceiling unless the
//! caller forces it, in which case both limits move (which usually needs
//! `CAP_SYS_RESOURCE` when raising).

use std::fmt;

use log::debug;
use nix::sys::resource::{Resource, getrlimit, setrlimit};
use tether_core::{Result, TetherError};

/// Sentinel for "no ceiling" (`RLIM_INFINITY`).
pub const UNLIMITED: u64 = libc::RLIM_INFINITY;

/// Resources the governor can constrain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// CPU time in seconds (RLIMIT_CPU)
    CpuTime,
    /// Data segment size in bytes (RLIMIT_DATA)
    DataSegment,
    /// Core file size in bytes (RLIMIT_CORE)
    CoreFileSize,
    /// Largest file the process may create, in bytes (RLIMIT_FSIZE)
    FileSize,
    /// Address space size in bytes (RLIMIT_AS)
    VirtualMemory,
    /// Open file descriptors (RLIMIT_NOFILE)
    OpenFiles,
    /// Wall-clock seconds, enforced by the watchdog timer rather than an rlimit
    RealTime,
    /// Stack size in bytes (RLIMIT_STACK)
    StackSize,
    /// Processes and threads of the real user (RLIMIT_NPROC)
    ProcessCount,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 9] = [
        ResourceKind::CpuTime,
        ResourceKind::DataSegment,
        ResourceKind::CoreFileSize,
        ResourceKind::FileSize,
        ResourceKind::VirtualMemory,
        ResourceKind::OpenFiles,
        ResourceKind::RealTime,
        ResourceKind::StackSize,
        ResourceKind::ProcessCount,
    ];

    /// The kernel resource behind this kind, `None` for [`ResourceKind::RealTime`].
    pub fn resource(self) -> Option<Resource> {
        match self {
            ResourceKind::CpuTime => Some(Resource::RLIMIT_CPU),
            ResourceKind::DataSegment => Some(Resource::RLIMIT_DATA),
            ResourceKind::CoreFileSize => Some(Resource::RLIMIT_CORE),
            ResourceKind::FileSize => Some(Resource::RLIMIT_FSIZE),
            ResourceKind::VirtualMemory => Some(Resource::RLIMIT_AS),
            ResourceKind::OpenFiles => Some(Resource::RLIMIT_NOFILE),
            ResourceKind::RealTime => None,
            ResourceKind::StackSize => Some(Resource::RLIMIT_STACK),
            ResourceKind::ProcessCount => Some(Resource::RLIMIT_NPROC),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ResourceKind::CpuTime => "RLIMIT_CPU",
            ResourceKind::DataSegment => "RLIMIT_DATA",
            ResourceKind::CoreFileSize => "RLIMIT_CORE",
            ResourceKind::FileSize => "RLIMIT_FSIZE",
            ResourceKind::VirtualMemory => "RLIMIT_AS",
            ResourceKind::OpenFiles => "RLIMIT_NOFILE",
            ResourceKind::RealTime => "ITIMER_REAL",
            ResourceKind::StackSize => "RLIMIT_STACK",
            ResourceKind::ProcessCount => "RLIMIT_NPROC",
        }
    }

    /// Unit of the magnitude a request carries
    pub fn unit(self) -> &'static str {
        match self {
            ResourceKind::CpuTime | ResourceKind::RealTime => "seconds",
            ResourceKind::OpenFiles => "descriptors",
            ResourceKind::ProcessCount => "processes",
            _ => "bytes",
        }
    }

    /// Read the current soft/hard pair from the kernel
    pub fn current(self) -> Result<EffectiveLimit> {
        let resource = self.rlimit()?;
        let (soft, hard) = getrlimit(resource).map_err(|source| TetherError::LimitRead {
            resource: self.name(),
            source,
        })?;
        Ok(EffectiveLimit { soft, hard })
    }

    fn rlimit(self) -> Result<Resource> {
        self.resource().ok_or_else(|| {
            TetherError::InvalidConfig(format!(
                "{} is enforced by the watchdog, not by setrlimit",
                self.name()
            ))
        })
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Soft/hard pair as committed to the kernel; `soft <= hard` always holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveLimit {
    pub soft: u64,
    pub hard: u64,
}

impl EffectiveLimit {
    /// Compute the pair that honours `requested` against this current pair.
    ///
    /// | condition                      | soft        | hard      |
    /// |--------------------------------|-------------|-----------|
    /// | `requested < hard`             | `requested` | unchanged |
    /// | `requested >= hard`, forced    | `requested` | `requested` |
    /// | `requested >= hard`, not forced| `hard`      | unchanged |
    pub fn resolve(self, requested: u64, force: bool) -> EffectiveLimit {
        if requested < self.hard {
            EffectiveLimit {
                soft: requested,
                hard: self.hard,
            }
        } else if force {
            EffectiveLimit {
                soft: requested,
                hard: requested,
            }
        } else {
            EffectiveLimit {
                soft: self.hard,
                hard: self.hard,
            }
        }
    }
}

impl fmt::Display for EffectiveLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "soft={} hard={}", Magnitude(self.soft), Magnitude(self.hard))
    }
}

struct Magnitude(u64);

impl fmt::Display for Magnitude {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == UNLIMITED {
            f.write_str("unlimited")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// One requested ceiling, consumed as soon as it is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitRequest {
    pub kind: ResourceKind,
    /// Requested magnitude, `None` for unlimited
    pub value: Option<u64>,
    /// Move the hard ceiling too when the request reaches it
    pub force: bool,
}

impl LimitRequest {
    pub fn new(kind: ResourceKind, value: u64) -> Self {
        Self {
            kind,
            value: Some(value),
            force: false,
        }
    }

    pub fn unlimited(kind: ResourceKind) -> Self {
        Self {
            kind,
            value: None,
            force: false,
        }
    }

    pub fn forced(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// The ceiling handed to the decision table
    pub fn requested(&self) -> u64 {
        self.value.unwrap_or(UNLIMITED)
    }

    /// Read, resolve and commit this request
    pub fn apply(&self) -> Result<EffectiveLimit> {
        let resource = self.kind.rlimit()?;
        let was = self.kind.current()?;
        let now = was.resolve(self.requested(), self.force);

        debug!("{}: was {}", self.kind, was);

        setrlimit(resource, now.soft, now.hard).map_err(|source| TetherError::LimitCommit {
            resource: self.kind.name(),
            soft: now.soft,
            hard: now.hard,
            source,
        })?;

        debug!("{}: now {}", self.kind, now);
        Ok(now)
    }
}

/// Apply `value` (or unlimited) to `kind`, returning the committed pair.
pub fn apply(kind: ResourceKind, value: Option<u64>, force: bool) -> Result<EffectiveLimit> {
    LimitRequest {
        kind,
        value,
        force,
    }
    .apply()
}
