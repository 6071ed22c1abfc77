//! One-shot real-time watchdog
//!
//! `arm` starts `ITIMER_REAL`; when it expires the kernel sends SIGALRM and
//! [`on_deadline`] takes the whole process group down, so children left
//! behind by the code under test (fork bombs, leaked subprocesses) die with
//! the governor instead of being orphaned.
//!
//! The handler cannot SIGKILL its own group and still report a status: the
//! kill would land on the governor first. It first moves the governor into its
//! parent's group, which needs no new process and so still works once a fork
//! bomb has used up RLIMIT_NPROC. When that is refused (the parent is gone or
//! lives in another session) it clones a reaper that leaves the group, waits
//! for the governor to `_exit(2)`, then kills the group.

use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use log::debug;
use nix::errno::Errno;
use nix::sys::signal::{SigHandler, Signal};
use tether_core::{EXIT_TIMEOUT, Result, TetherError};

use crate::group;
use crate::install::install;

static DEADLINE: AtomicU64 = AtomicU64::new(0);
static TIMED_OUT: AtomicBool = AtomicBool::new(false);

const TIMEOUT_MESSAGE: &[u8] = b"tether: real time limit expired, terminating process group\n";

/// How often, and how many times, the reaper checks whether the governor is gone.
const REAPER_POLL_NS: libc::c_long = 1_000_000;
const REAPER_MAX_POLLS: u32 = 1000;

/// Snapshot of the watchdog as last set by [`arm`] / [`disarm`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogState {
    pub armed: bool,
    pub deadline_seconds: u64,
}

/// Install [`on_deadline`] for SIGALRM on the alternate stack.
///
/// Must happen before [`arm`], otherwise an early expiry would hit the
/// default disposition and kill only this process.
pub fn install_handler() -> Result<SigHandler> {
    install(Signal::SIGALRM, Some(on_deadline), true, true)
}

/// Arm the one-shot timer, replacing any deadline already armed. Zero disarms.
pub fn arm(deadline_seconds: u64) -> Result<()> {
    let seconds = libc::time_t::try_from(deadline_seconds).map_err(|_| {
        TetherError::InvalidConfig(format!(
            "real time limit of {} seconds is out of range",
            deadline_seconds
        ))
    })?;

    let timer = libc::itimerval {
        it_interval: libc::timeval {
            tv_sec: 0,
            tv_usec: 0,
        },
        it_value: libc::timeval {
            tv_sec: seconds,
            tv_usec: 0,
        },
    };

    if unsafe { libc::setitimer(libc::ITIMER_REAL, &timer, ptr::null_mut()) } != 0 {
        return Err(TetherError::Timer(Errno::last()));
    }

    DEADLINE.store(deadline_seconds, Ordering::SeqCst);
    if deadline_seconds == 0 {
        debug!("watchdog disarmed");
    } else {
        debug!("watchdog armed for {}s", deadline_seconds);
    }
    Ok(())
}

/// Cancel any pending deadline
pub fn disarm() -> Result<()> {
    arm(0)
}

pub fn state() -> WatchdogState {
    let deadline_seconds = DEADLINE.load(Ordering::SeqCst);
    WatchdogState {
        armed: deadline_seconds != 0,
        deadline_seconds,
    }
}

/// Seconds left before expiry according to the kernel, 0 when disarmed.
pub fn remaining() -> Result<u64> {
    let mut current: libc::itimerval = unsafe { std::mem::zeroed() };
    if unsafe { libc::getitimer(libc::ITIMER_REAL, &mut current) } != 0 {
        return Err(TetherError::Timer(Errno::last()));
    }
    let secs = current.it_value.tv_sec.max(0) as u64;
    Ok(if current.it_value.tv_usec > 0 { secs + 1 } else { secs })
}

/// Whether the SIGALRM handler has run in this process
pub fn timed_out() -> bool {
    TIMED_OUT.load(Ordering::SeqCst)
}

/// SIGALRM handler. Async-signal-safe calls only.
pub extern "C" fn on_deadline(_signum: libc::c_int) {
    TIMED_OUT.store(true, Ordering::SeqCst);
    unsafe {
        libc::write(
            libc::STDERR_FILENO,
            TIMEOUT_MESSAGE.as_ptr().cast(),
            TIMEOUT_MESSAGE.len(),
        );
    }

    let pgid = group::raw();
    if pgid > 0 {
        unsafe { terminate_group(pgid) };
    }

    unsafe { libc::_exit(EXIT_TIMEOUT) }
}

/// Arrange for SIGKILL to reach every member of `pgid` once this process is gone.
///
/// # Safety
///
/// Signal context only; the clone child must not touch the allocator or any
/// lock, so it sticks to raw system calls.
unsafe fn terminate_group(pgid: libc::pid_t) {
    unsafe {
        if leave_group(pgid) {
            libc::kill(-pgid, libc::SIGKILL);
            return;
        }

        let governor = libc::getpid();
        // clone(SIGCHLD) without a new stack is fork() minus atfork handlers.
        let reaper = libc::syscall(
            libc::SYS_clone,
            libc::SIGCHLD as libc::c_ulong,
            0 as libc::c_ulong,
            0 as libc::c_ulong,
            0 as libc::c_ulong,
            0 as libc::c_ulong,
        );

        if reaper == 0 {
            libc::setpgid(0, 0);
            let pause = libc::timespec {
                tv_sec: 0,
                tv_nsec: REAPER_POLL_NS,
            };
            let mut polls = 0;
            while libc::getppid() == governor && polls < REAPER_MAX_POLLS {
                libc::nanosleep(&pause, ptr::null_mut());
                polls += 1;
            }
            libc::kill(-pgid, libc::SIGKILL);
            libc::_exit(0);
        }

        if reaper < 0 {
            // No reaper (RLIMIT_NPROC exhausted): the group still has to die, us included.
            libc::kill(-pgid, libc::SIGKILL);
        }
    }
}

/// Join the parent's process group so a SIGKILL to `pgid` misses this process.
///
/// # Safety
///
/// Signal context only; raw system calls.
unsafe fn leave_group(pgid: libc::pid_t) -> bool {
    unsafe {
        let parent_group = libc::getpgid(libc::getppid());
        parent_group > 0 && parent_group != pgid && libc::setpgid(0, parent_group) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_child(child: impl FnOnce() -> i32) -> i32 {
        unsafe {
            let pid = libc::fork();
            assert!(pid >= 0, "fork failed");
            if pid == 0 {
                libc::_exit(child());
            }
            let mut status: i32 = 0;
            libc::waitpid(pid, &mut status, 0);
            assert!(libc::WIFEXITED(status), "child should exit normally");
            libc::WEXITSTATUS(status)
        }
    }

    #[test]
    fn test_arm_then_disarm_updates_state() {
        let code = in_child(|| {
            if arm(3600).is_err() {
                return 1;
            }
            let armed = state();
            if armed != (WatchdogState { armed: true, deadline_seconds: 3600 }) {
                return 2;
            }
            match remaining() {
                Ok(secs) if secs > 3500 && secs <= 3600 => {}
                _ => return 3,
            }
            if disarm().is_err() {
                return 4;
            }
            if state().armed {
                return 5;
            }
            match remaining() {
                Ok(0) => 0,
                _ => 6,
            }
        });
        assert_eq!(code, 0);
    }

    #[test]
    fn test_rearm_replaces_deadline() {
        let code = in_child(|| {
            if arm(3600).is_err() || arm(60).is_err() {
                return 1;
            }
            let replaced = matches!(remaining(), Ok(secs) if secs <= 60);
            let _ = disarm();
            if replaced && state().deadline_seconds == 0 { 0 } else { 2 }
        });
        assert_eq!(code, 0);
    }

    #[test]
    fn test_out_of_range_deadline_rejected() {
        let err = arm(u64::MAX).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_not_timed_out_by_default() {
        assert!(!timed_out());
    }
}
