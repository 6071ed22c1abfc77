//! Built-in death tests
//!
//! Each probe exhausts one resource. Under a matching limit it either dies the
//! way the limit dictates or reports that exhaustion was detected; without
//! one it runs until the watchdog or its own safety cap stops it.
//!
//! | probe        | limit       | expected end                      |
//! |--------------|-------------|-----------------------------------|
//! | `cpu`        | `-c`        | killed by SIGXCPU                 |
//! | `real`       | `-r`        | watchdog, exit status 2           |
//! | `stack`      | `-s`        | killed by SIGSEGV                 |
//! | `core`       | `-e`        | killed by SIGABRT                 |
//! | `memory`     | `-m`        | allocation fails, 0 failures      |
//! | `processes`  | `-t`        | fork fails, 0 failures            |
//! | `open-files` | `-o`        | open fails with EMFILE, 0 failures|

use std::fmt;
use std::fs::File;
use std::hint::black_box;
use std::str::FromStr;
use std::time::Duration;

use log::{debug, warn};
use nix::sys::signal::{self, Signal};
use tether_core::TetherError;
use tether_signal::restore_default;

const BLOCK: usize = 1 << 20;
const MAX_BLOCKS: usize = 1 << 20;
const MAX_PROCESSES: usize = 4096;
const MAX_OPEN_FILES: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Cpu,
    Real,
    Stack,
    Core,
    Memory,
    Processes,
    OpenFiles,
}

impl Probe {
    pub const ALL: [Probe; 7] = [
        Probe::Cpu,
        Probe::Real,
        Probe::Stack,
        Probe::Core,
        Probe::Memory,
        Probe::Processes,
        Probe::OpenFiles,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Probe::Cpu => "cpu",
            Probe::Real => "real",
            Probe::Stack => "stack",
            Probe::Core => "core",
            Probe::Memory => "memory",
            Probe::Processes => "processes",
            Probe::OpenFiles => "open-files",
        }
    }

    /// Run the probe and return its failure count (0 or 1).
    ///
    /// The signal-terminated probes only return if their signal did not kill
    /// the process, which counts as a failure.
    pub fn run(self) -> u32 {
        debug!("probe {}: starting", self);
        match self {
            Probe::Cpu => spin(),
            Probe::Real => sleep_forever(),
            Probe::Stack => {
                restore_default(Signal::SIGSEGV);
                black_box(recurse(0));
                1
            }
            Probe::Core => {
                restore_default(Signal::SIGABRT);
                if let Err(e) = signal::raise(Signal::SIGABRT) {
                    warn!("probe core: raise failed: {}", e);
                }
                1
            }
            Probe::Memory => exhausted(self, allocate_until_failure()),
            Probe::Processes => exhausted(self, fork_until_failure()),
            Probe::OpenFiles => exhausted(self, open_until_failure()),
        }
    }
}

impl fmt::Display for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Probe {
    type Err = TetherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Probe::ALL
            .into_iter()
            .find(|probe| probe.name() == s)
            .ok_or_else(|| TetherError::InvalidConfig(format!("unknown probe: {}", s)))
    }
}

fn exhausted(probe: Probe, hit_limit: bool) -> u32 {
    if hit_limit {
        debug!("probe {}: limit enforced", probe);
        0
    } else {
        warn!("probe {}: safety cap reached before any limit", probe);
        1
    }
}

fn spin() -> ! {
    let mut counter: u64 = 0;
    loop {
        counter = black_box(counter.wrapping_add(1));
    }
}

fn sleep_forever() -> ! {
    loop {
        std::thread::sleep(Duration::from_secs(1));
    }
}

fn recurse(depth: u64) -> u64 {
    let frame = [depth as u8; 1024];
    if black_box(depth) == u64::MAX {
        return 0;
    }
    recurse(depth + 1) + u64::from(black_box(&frame)[0])
}

/// malloc 1 MiB blocks until malloc fails. Blocks are chained through their
/// first word so the probe itself needs no allocation.
fn allocate_until_failure() -> bool {
    let mut head: *mut *mut libc::c_void = std::ptr::null_mut();
    let mut failed = false;
    for _ in 0..MAX_BLOCKS {
        let block = unsafe { libc::malloc(BLOCK) } as *mut *mut libc::c_void;
        if block.is_null() {
            failed = true;
            break;
        }
        unsafe { block.write(head.cast()) };
        head = block;
    }
    while !head.is_null() {
        let next = unsafe { head.read() } as *mut *mut libc::c_void;
        unsafe { libc::free(head.cast()) };
        head = next;
    }
    failed
}

/// Fork idle children until fork fails, then reap them.
fn fork_until_failure() -> bool {
    let mut children = Vec::with_capacity(MAX_PROCESSES);
    let mut failed = false;
    for _ in 0..MAX_PROCESSES {
        match unsafe { libc::fork() } {
            0 => loop {
                unsafe { libc::pause() };
            },
            pid if pid < 0 => {
                failed = true;
                break;
            }
            pid => children.push(pid),
        }
    }
    for &pid in &children {
        unsafe {
            libc::kill(pid, libc::SIGKILL);
            libc::waitpid(pid, std::ptr::null_mut(), 0);
        }
    }
    debug!("probe processes: {} children before failure", children.len());
    failed
}

/// Open /dev/null until the descriptor table is full.
fn open_until_failure() -> bool {
    let mut opened = Vec::new();
    for _ in 0..MAX_OPEN_FILES {
        match File::open("/dev/null") {
            Ok(file) => opened.push(file),
            Err(e) => {
                debug!("probe open-files: {} opened, then {}", opened.len(), e);
                return e.raw_os_error() == Some(libc::EMFILE);
            }
        }
    }
    false
}
