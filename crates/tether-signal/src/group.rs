//! Process group owned by the governor
//!
//! The group id is written once, after `setpgid(0, 0)` succeeds, and is read
//! from the watchdog's signal handler. An atomic keeps that read signal safe.

use std::sync::atomic::{AtomicI32, Ordering};

use log::debug;
use nix::unistd::{Pid, getpgrp, setpgid};
use tether_core::{Result, TetherError};

static PROCESS_GROUP: AtomicI32 = AtomicI32::new(0);

/// Move the calling process into a group of its own and remember its id.
///
/// Only a successful call records the group: killing a group we merely
/// inherited would take unrelated processes (the caller's shell or test
/// runner) down with us.
pub fn establish() -> Result<Pid> {
    setpgid(Pid::from_raw(0), Pid::from_raw(0)).map_err(TetherError::ProcessGroup)?;
    let pgid = getpgrp();
    match PROCESS_GROUP.compare_exchange(0, pgid.as_raw(), Ordering::SeqCst, Ordering::SeqCst) {
        Ok(_) => debug!("process group {} established", pgid),
        Err(existing) => debug!("process group already established as {}", existing),
    }
    Ok(pgid)
}

/// The group recorded by [`establish`], if any
pub fn current() -> Option<Pid> {
    match raw() {
        0 => None,
        pgid => Some(Pid::from_raw(pgid)),
    }
}

pub(crate) fn raw() -> libc::pid_t {
    PROCESS_GROUP.load(Ordering::SeqCst)
}
