//! Suites the governor hands control to once setup is complete

use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::process::Command;

use log::debug;
use tether_core::{Result, TetherError};

/// How a suite finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuiteOutcome {
    /// Number of failed tests, 0 when everything passed
    Failures(u32),
    /// An external suite was killed by this signal
    Signaled(i32),
    /// Dry run: the suite never ran
    Skipped,
}

impl SuiteOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, SuiteOutcome::Failures(0) | SuiteOutcome::Skipped)
    }
}

impl fmt::Display for SuiteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuiteOutcome::Failures(0) => f.write_str("all tests passed"),
            SuiteOutcome::Failures(n) => write!(f, "{} failed", n),
            SuiteOutcome::Signaled(sig) => write!(f, "killed by signal {}", sig),
            SuiteOutcome::Skipped => f.write_str("skipped"),
        }
    }
}

/// Something that runs tests and reports how many failed
pub trait SuiteRunner {
    fn run(&mut self) -> Result<SuiteOutcome>;
}

/// In-process suites: the closure returns its failure count.
impl<F> SuiteRunner for F
where
    F: FnMut() -> u32,
{
    fn run(&mut self) -> Result<SuiteOutcome> {
        Ok(SuiteOutcome::Failures(self()))
    }
}

/// An external program run as the suite
///
/// The program inherits the governor's process group, limits and standard
/// streams. Its exit code is taken as the failure count.
#[derive(Debug, Clone)]
pub struct CommandSuite {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSuite {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl SuiteRunner for CommandSuite {
    fn run(&mut self) -> Result<SuiteOutcome> {
        debug!("running suite: {} {:?}", self.program, self.args);
        let status = Command::new(&self.program)
            .args(&self.args)
            .status()
            .map_err(|e| TetherError::Suite(format!("failed to run {}: {}", self.program, e)))?;

        if let Some(code) = status.code() {
            return Ok(SuiteOutcome::Failures(code as u32));
        }
        match status.signal() {
            Some(sig) => Ok(SuiteOutcome::Signaled(sig)),
            None => Err(TetherError::Suite(format!(
                "{} ended without an exit status: {}",
                self.program, status
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_is_a_suite() {
        let mut calls = 0;
        let mut suite = || -> u32 {
            calls += 1;
            3
        };
        assert_eq!(suite.run().unwrap(), SuiteOutcome::Failures(3));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_command_exit_code_is_failure_count() {
        let mut suite = CommandSuite::new("sh").args(["-c", "exit 3"]);
        assert_eq!(suite.run().unwrap(), SuiteOutcome::Failures(3));

        let mut suite = CommandSuite::new("true");
        assert!(suite.run().unwrap().passed());
    }

    #[test]
    fn test_command_killed_by_signal() {
        let mut suite = CommandSuite::new("sh").arg("-c").arg("kill -TERM $$");
        assert_eq!(
            suite.run().unwrap(),
            SuiteOutcome::Signaled(libc::SIGTERM)
        );
    }

    #[test]
    fn test_missing_program_is_a_suite_error() {
        let mut suite = CommandSuite::new("/nonexistent/tether-suite");
        let err = suite.run().unwrap_err();
        assert!(matches!(err, TetherError::Suite(_)));
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(SuiteOutcome::Failures(0).to_string(), "all tests passed");
        assert_eq!(SuiteOutcome::Failures(2).to_string(), "2 failed");
        assert!(!SuiteOutcome::Signaled(9).passed());
        assert!(SuiteOutcome::Skipped.passed());
    }
}
