//! Signal handler installation with an optional alternate signal stack
//!
//! Handlers are plain `extern "C"` functions: they run at arbitrary
//! interruption points and must not capture state. The alternate stack is
//! one anonymous mapping created on first use and kept for the life of the
//! process, so a handler can still run after the normal stack overflowed.

use std::cmp;
use std::ptr::{self, NonNull};
use std::sync::OnceLock;

use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use tether_core::{Result, TetherError};

/// Signature every installable handler must have.
pub type HandlerFn = extern "C" fn(libc::c_int);

// Not exported by every libc release; value from <elf.h>.
const AT_MINSIGSTKSZ: libc::c_ulong = 51;

/// The process-wide alternate signal stack
#[derive(Debug)]
struct AltStack {
    base: NonNull<libc::c_void>,
    len: usize,
}

// The mapping is never unmapped or mutated after creation.
unsafe impl Send for AltStack {}
unsafe impl Sync for AltStack {}

static ALT_STACK: OnceLock<AltStack> = OnceLock::new();

impl AltStack {
    /// Size the kernel requires for a signal frame on this machine, page aligned
    fn required_len() -> usize {
        let dynamic = unsafe { libc::getauxval(AT_MINSIGSTKSZ) } as usize;
        let min = cmp::max(libc::SIGSTKSZ, dynamic);
        let page = match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
            n if n > 0 => n as usize,
            _ => 4096,
        };
        min.div_ceil(page) * page
    }

    fn map() -> Result<Self> {
        let len = Self::required_len();
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_STACK,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(TetherError::AltStack(Errno::last()));
        }
        let base = NonNull::new(base).ok_or(TetherError::AltStack(Errno::ENOMEM))?;
        debug!("alternate signal stack mapped: {} bytes at {:p}", len, base);
        Ok(Self { base, len })
    }

    /// Make this region the calling thread's alternate stack if it is not already.
    fn register(&self) -> Result<()> {
        let mut current: libc::stack_t = unsafe { std::mem::zeroed() };
        if unsafe { libc::sigaltstack(ptr::null(), &mut current) } != 0 {
            return Err(TetherError::AltStack(Errno::last()));
        }
        if current.ss_sp == self.base.as_ptr() && current.ss_flags & libc::SS_DISABLE == 0 {
            return Ok(());
        }

        let wanted = libc::stack_t {
            ss_sp: self.base.as_ptr(),
            ss_flags: 0,
            ss_size: self.len,
        };
        if unsafe { libc::sigaltstack(&wanted, ptr::null_mut()) } != 0 {
            return Err(TetherError::AltStack(Errno::last()));
        }
        Ok(())
    }
}

/// Allocate the alternate stack on first use and register it for this thread.
fn ensure_alt_stack() -> Result<()> {
    let stack = match ALT_STACK.get() {
        Some(stack) => stack,
        None => {
            let mapped = AltStack::map()?;
            // A concurrent first use may win; its region is used and ours is leaked.
            let _ = ALT_STACK.set(mapped);
            ALT_STACK.get().ok_or(TetherError::AltStack(Errno::ENOMEM))?
        }
    };
    stack.register()
}

/// Size in bytes of the alternate stack, if one has been allocated.
pub fn alt_stack_len() -> Option<usize> {
    ALT_STACK.get().map(|stack| stack.len)
}

/// Install `handler` for `signal`, or restore the default disposition when `None`.
///
/// `restart` adds `SA_RESTART`; `alternate_stack` adds `SA_ONSTACK` and makes
/// sure the shared alternate stack exists and is registered for the calling
/// thread. Neither flag applies when restoring the default. Returns the
/// previously installed handler.
pub fn install(
    signal: Signal,
    handler: Option<HandlerFn>,
    restart: bool,
    alternate_stack: bool,
) -> Result<SigHandler> {
    let action = match handler {
        Some(handler) => {
            let mut flags = SaFlags::empty();
            if restart {
                flags |= SaFlags::SA_RESTART;
            }
            if alternate_stack {
                ensure_alt_stack()?;
                flags |= SaFlags::SA_ONSTACK;
            }
            SigAction::new(SigHandler::Handler(handler), flags, SigSet::empty())
        }
        None => SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty()),
    };

    let previous = unsafe { signal::sigaction(signal, &action) }.map_err(|source| {
        TetherError::SignalInstall {
            signal: signal.to_string(),
            source,
        }
    })?;

    debug!(
        "{}: installed {} (restart={}, onstack={})",
        signal,
        if handler.is_some() { "handler" } else { "default" },
        restart && handler.is_some(),
        alternate_stack && handler.is_some()
    );
    Ok(previous.handler())
}

/// Restore the default disposition, logging instead of failing.
pub fn restore_default(signal: Signal) -> Option<SigHandler> {
    match install(signal, None, false, false) {
        Ok(previous) => Some(previous),
        Err(e) => {
            warn!("Failed to restore default disposition: {}", e);
            None
        }
    }
}

/// Die the way a child died: default disposition, then raise `signal` on ourselves.
///
/// Returns only if the signal did not terminate the process (it is ignored by
/// default, or blocked); the caller then exits with the conventional `128 + signo`.
pub fn reraise(signal: Signal) -> i32 {
    restore_default(signal);
    if let Err(e) = signal::raise(signal) {
        warn!("Failed to raise {}: {}", signal, e);
    }
    128 + signal as i32
}

/// A handler binding, built up and then installed in one call
#[derive(Debug, Clone, Copy)]
pub struct SignalHandlerBinding {
    pub signal: Signal,
    pub handler: Option<HandlerFn>,
    pub alternate_stack: bool,
    pub restart_syscalls: bool,
}

impl SignalHandlerBinding {
    pub fn new(signal: Signal, handler: Option<HandlerFn>) -> Self {
        Self {
            signal,
            handler,
            alternate_stack: false,
            restart_syscalls: false,
        }
    }

    pub fn alternate_stack(mut self, enabled: bool) -> Self {
        self.alternate_stack = enabled;
        self
    }

    pub fn restart_syscalls(mut self, enabled: bool) -> Self {
        self.restart_syscalls = enabled;
        self
    }

    /// Install the binding, returning the handler it replaced
    pub fn install(&self) -> Result<SigHandler> {
        install(
            self.signal,
            self.handler,
            self.restart_syscalls,
            self.alternate_stack,
        )
    }
}
