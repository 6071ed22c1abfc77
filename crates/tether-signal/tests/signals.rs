//! Signal installer and watchdog tests
//!
//! Dispositions, alternate stacks, interval timers and process groups are
//! process-wide, so every test runs its scenario in a forked child and checks
//! the wait status from the parent.

use std::hint::black_box;
use std::io::Read;
use std::os::fd::FromRawFd;
use std::time::{Duration, Instant};

use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use tether_core::EXIT_TIMEOUT;
use tether_signal::{SignalHandlerBinding, group, install, reraise, trace, watchdog};

const OVERFLOW_HANDLED: i32 = 42;

/// Fork, run `child` in the child and return the raw wait status.
fn fork_status(child: impl FnOnce() -> i32) -> i32 {
    unsafe {
        let pid = libc::fork();
        assert!(pid >= 0, "fork failed: {}", std::io::Error::last_os_error());

        if pid == 0 {
            let code = child();
            libc::_exit(code);
        }

        let mut status: i32 = 0;
        libc::waitpid(pid, &mut status, 0);
        status
    }
}

fn exit_code(status: i32) -> i32 {
    assert!(libc::WIFEXITED(status), "child did not exit normally: {:#x}", status);
    libc::WEXITSTATUS(status)
}

extern "C" fn noop(_: libc::c_int) {}

extern "C" fn on_overflow(_: libc::c_int) {
    unsafe { libc::_exit(OVERFLOW_HANDLED) }
}

fn recurse(depth: u64) -> u64 {
    let frame = [depth as u8; 4096];
    if black_box(depth) == u64::MAX {
        return 0;
    }
    recurse(depth + 1) + u64::from(black_box(&frame)[0])
}

/// Read the flags currently attached to `signal` without changing them.
fn current_flags(signal: Signal) -> SaFlags {
    let probe = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    unsafe {
        let previous = sigaction(signal, &probe).expect("sigaction probe");
        sigaction(signal, &previous).expect("sigaction restore");
        previous.flags()
    }
}

/// True once `pid` no longer runs: gone, or a zombie waiting for its new parent.
fn is_dead(pid: libc::pid_t) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .rfind(')')
            .and_then(|close| stat[close + 1..].trim_start().chars().next())
            .is_some_and(|state| state == 'Z' || state == 'X'),
        Err(_) => true,
    }
}

/// Unprivileged uid and gid used where root would bypass RLIMIT_NPROC.
const NOBODY: libc::uid_t = 65534;

/// Give up root in a forked child; RLIMIT_NPROC is not enforced against it.
fn drop_root() -> bool {
    unsafe {
        if libc::geteuid() != 0 {
            return true;
        }
        libc::setgroups(0, std::ptr::null()) == 0
            && libc::setgid(NOBODY) == 0
            && libc::setuid(NOBODY) == 0
    }
}

#[test]
fn install_returns_previous_handler() {
    let code = exit_code(fork_status(|| {
        match install(Signal::SIGUSR1, Some(noop), false, false) {
            Ok(SigHandler::SigDfl) => {}
            _ => return 1,
        }
        match install(Signal::SIGUSR1, None, false, false) {
            Ok(SigHandler::Handler(_)) => {}
            _ => return 2,
        }
        match install(Signal::SIGUSR1, None, false, false) {
            Ok(SigHandler::SigDfl) => 0,
            _ => 3,
        }
    }));
    assert_eq!(code, 0);
}

#[test]
fn install_sets_restart_and_onstack_flags() {
    let code = exit_code(fork_status(|| {
        let binding = SignalHandlerBinding::new(Signal::SIGUSR2, Some(noop))
            .alternate_stack(true)
            .restart_syscalls(true);
        if binding.install().is_err() {
            return 1;
        }
        let flags = current_flags(Signal::SIGUSR2);
        if !flags.contains(SaFlags::SA_RESTART | SaFlags::SA_ONSTACK) {
            return 2;
        }
        if tether_signal::install::alt_stack_len().is_none() {
            return 3;
        }

        // Restoring the default never carries the flags along.
        if install(Signal::SIGUSR2, None, true, true).is_err() {
            return 4;
        }
        let flags = current_flags(Signal::SIGUSR2);
        if flags.intersects(SaFlags::SA_RESTART | SaFlags::SA_ONSTACK) {
            return 5;
        }
        0
    }));
    assert_eq!(code, 0);
}

#[test]
fn alternate_stack_handles_stack_overflow() {
    let code = exit_code(fork_status(|| {
        if install(Signal::SIGSEGV, Some(on_overflow), false, true).is_err() {
            return 1;
        }
        black_box(recurse(0));
        2
    }));
    assert_eq!(
        code, OVERFLOW_HANDLED,
        "SIGSEGV handler should run on the alternate stack after overflow"
    );
}

#[test]
fn alternate_stack_is_allocated_once() {
    let code = exit_code(fork_status(|| {
        if install(Signal::SIGUSR1, Some(noop), false, true).is_err() {
            return 1;
        }
        let first = tether_signal::install::alt_stack_len();
        if install(Signal::SIGUSR2, Some(noop), false, true).is_err() {
            return 2;
        }
        let second = tether_signal::install::alt_stack_len();
        if first.is_some() && first == second { 0 } else { 3 }
    }));
    assert_eq!(code, 0);
}

#[test]
fn watchdog_exits_with_timeout_status_without_group() {
    let started = Instant::now();
    let code = exit_code(fork_status(|| {
        if watchdog::install_handler().is_err() || watchdog::arm(1).is_err() {
            return 1;
        }
        unsafe { libc::sleep(10) };
        3
    }));
    assert_eq!(code, EXIT_TIMEOUT);
    assert!(started.elapsed() < Duration::from_secs(8));
}

#[test]
fn watchdog_kills_the_whole_group() {
    let mut fds = [0; 2];
    assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
    let [read_fd, write_fd] = fds;

    let started = Instant::now();
    let status = fork_status(|| unsafe {
        libc::close(read_fd);
        if group::establish().is_err() {
            return 10;
        }
        if watchdog::install_handler().is_err() || watchdog::arm(1).is_err() {
            return 11;
        }

        let straggler = libc::fork();
        if straggler == 0 {
            // A descendant that would outlive a per-process alarm.
            loop {
                libc::pause();
            }
        }
        libc::write(
            write_fd,
            (&straggler as *const libc::pid_t).cast(),
            std::mem::size_of::<libc::pid_t>(),
        );
        libc::close(write_fd);

        libc::sleep(10);
        12
    });
    unsafe { libc::close(write_fd) };

    let mut straggler: libc::pid_t = 0;
    let read = unsafe {
        libc::read(
            read_fd,
            (&mut straggler as *mut libc::pid_t).cast(),
            std::mem::size_of::<libc::pid_t>(),
        )
    };
    unsafe { libc::close(read_fd) };

    assert_eq!(exit_code(status), EXIT_TIMEOUT);
    assert!(started.elapsed() < Duration::from_secs(8));
    assert_eq!(read as usize, std::mem::size_of::<libc::pid_t>());
    assert!(straggler > 0);

    let deadline = Instant::now() + Duration::from_secs(3);
    while !is_dead(straggler) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(is_dead(straggler), "descendant {} survived the watchdog", straggler);
}

#[test]
fn watchdog_exits_with_timeout_status_after_fork_exhaustion() {
    let started = Instant::now();
    let status = fork_status(|| unsafe {
        if !drop_root() {
            return 10;
        }
        let cap = libc::rlimit {
            rlim_cur: 16,
            rlim_max: 16,
        };
        if libc::setrlimit(libc::RLIMIT_NPROC, &cap) != 0 {
            return 11;
        }
        if group::establish().is_err() {
            return 12;
        }
        if watchdog::install_handler().is_err() || watchdog::arm(1).is_err() {
            return 13;
        }

        // Use up the process table so nothing new can be spawned at expiry.
        for _ in 0..4096 {
            match libc::fork() {
                0 => loop {
                    libc::pause();
                },
                pid if pid < 0 => break,
                _ => {}
            }
        }
        loop {
            libc::pause();
        }
    });

    assert_eq!(exit_code(status), EXIT_TIMEOUT);
    assert!(started.elapsed() < Duration::from_secs(8));
}

#[test]
fn disarmed_watchdog_never_fires() {
    let code = exit_code(fork_status(|| {
        if watchdog::install_handler().is_err() {
            return 1;
        }
        if watchdog::arm(1).is_err() || watchdog::disarm().is_err() {
            return 2;
        }
        unsafe { libc::sleep(2) };
        if watchdog::timed_out() { 3 } else { 0 }
    }));
    assert_eq!(code, 0);
}

#[test]
fn reraise_dies_by_the_same_signal() {
    let status = fork_status(|| {
        if install(Signal::SIGTERM, Some(noop), false, false).is_err() {
            return 1;
        }
        reraise(Signal::SIGTERM)
    });
    assert!(libc::WIFSIGNALED(status), "status {:#x}", status);
    assert_eq!(libc::WTERMSIG(status), libc::SIGTERM);
}

#[test]
fn reraise_of_ignored_signal_returns_shell_status() {
    let code = exit_code(fork_status(|| reraise(Signal::SIGCHLD)));
    assert_eq!(code, 128 + libc::SIGCHLD);
}

#[test]
fn fatal_signal_dumps_the_stack_then_dies() {
    let mut fds = [0; 2];
    assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
    let [read_fd, write_fd] = fds;

    let status = fork_status(|| unsafe {
        libc::close(read_fd);
        if libc::dup2(write_fd, libc::STDERR_FILENO) < 0 {
            return 10;
        }
        libc::close(write_fd);
        let no_core = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        libc::setrlimit(libc::RLIMIT_CORE, &no_core);
        if install(Signal::SIGABRT, Some(trace::dump_and_die), false, false).is_err() {
            return 11;
        }
        libc::raise(libc::SIGABRT);
        12
    });
    unsafe { libc::close(write_fd) };

    let mut dump = String::new();
    let mut reader = unsafe { std::fs::File::from_raw_fd(read_fd) };
    reader.read_to_string(&mut dump).expect("read dump");

    assert!(libc::WIFSIGNALED(status), "status {:#x}", status);
    assert_eq!(libc::WTERMSIG(status), libc::SIGABRT);
    assert!(dump.starts_with("#0"), "dump: {}", dump);
    assert!(dump.contains("dump_and_die"), "dump: {}", dump);
}
