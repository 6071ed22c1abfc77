//! Stack dumps for a dying test
//!
//! Symbol resolution allocates and takes locks, so from a signal handler these
//! are only fit for the way out: [`dump_and_die`] dumps, then lets the signal
//! kill the process with its default action.

use std::ffi::c_void;
use std::io::{self, Write};

/// Frames written by [`stacktrace`]
pub const MAX_FRAMES: usize = 256;

/// Write up to `max_frames` frames of the calling thread's stack to `out`,
/// innermost first, one per line. Returns the number of frames written.
pub fn stacktrace_to<W: Write>(out: &mut W, max_frames: usize) -> io::Result<usize> {
    let mut ips: Vec<*mut c_void> = Vec::with_capacity(max_frames.min(MAX_FRAMES));
    backtrace::trace(|frame| {
        if ips.len() >= max_frames {
            return false;
        }
        ips.push(frame.ip());
        true
    });

    for (index, &ip) in ips.iter().enumerate() {
        writeln!(out, "#{:<3} {:p} {}", index, ip, describe(ip))?;
    }
    out.flush()?;
    Ok(ips.len())
}

/// Dump the calling thread's stack to stderr. Returns the number of frames.
pub fn stacktrace() -> usize {
    stacktrace_to(&mut io::stderr(), MAX_FRAMES).unwrap_or(0)
}

/// Handler for fatal signals: dump the stack, then die by the same signal.
pub extern "C" fn dump_and_die(signum: libc::c_int) {
    stacktrace();
    unsafe {
        libc::signal(signum, libc::SIG_DFL);
        // Still blocked in here; delivered with the default action on return.
        libc::raise(signum);
    }
}

fn describe(ip: *mut c_void) -> String {
    let mut text = None;
    backtrace::resolve(ip, |symbol| {
        if text.is_some() {
            return;
        }
        let name = match symbol.name() {
            Some(name) => format!("{:#}", name),
            None => "???".to_string(),
        };
        text = Some(match (symbol.filename(), symbol.lineno()) {
            (Some(file), Some(line)) => format!("{} at {}:{}", name, file.display(), line),
            _ => name,
        });
    });
    text.unwrap_or_else(|| "???".to_string())
}
