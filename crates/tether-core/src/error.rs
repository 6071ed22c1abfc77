//! Error types for governor operations

use nix::errno::Errno;
use std::io;
use thiserror::Error;

/// Result type for governor operations
pub type Result<T> = std::result::Result<T, TetherError>;

/// Errors that can occur while setting up the governed process
#[derive(Error, Debug)]
pub enum TetherError {
    #[error("invalid number: {text:?}")]
    InvalidNumber { text: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("getrlimit({resource}) failed: {source}")]
    LimitRead {
        resource: &'static str,
        source: Errno,
    },

    #[error("setrlimit({resource}, soft={soft}, hard={hard}) failed: {source}")]
    LimitCommit {
        resource: &'static str,
        soft: u64,
        hard: u64,
        source: Errno,
    },

    #[error("sigaction({signal}) failed: {source}")]
    SignalInstall { signal: String, source: Errno },

    #[error("sigaltstack failed: {0}")]
    AltStack(Errno),

    #[error("setitimer failed: {0}")]
    Timer(Errno),

    #[error("setpgid failed: {0}")]
    ProcessGroup(Errno),

    #[error("Suite error: {0}")]
    Suite(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl TetherError {
    /// True for errors caused by the caller's input rather than the OS.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            TetherError::InvalidNumber { .. } | TetherError::InvalidConfig(_)
        )
    }

    /// True when the OS refused a limit because of missing privilege.
    pub fn is_privilege(&self) -> bool {
        matches!(
            self,
            TetherError::LimitCommit {
                source: Errno::EPERM,
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TetherError::InvalidNumber {
            text: "12abc".to_string(),
        };
        assert_eq!(err.to_string(), "invalid number: \"12abc\"");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err = TetherError::from(io_err);
        assert!(err.to_string().contains("IO error"));
    }

    #[test]
    fn test_limit_commit_display() {
        let err = TetherError::LimitCommit {
            resource: "RLIMIT_NOFILE",
            soft: 64,
            hard: 64,
            source: Errno::EPERM,
        };
        let text = err.to_string();
        assert!(text.contains("RLIMIT_NOFILE"));
        assert!(text.contains("soft=64"));
        assert!(err.is_privilege());
        assert!(!err.is_configuration());
    }

    #[test]
    fn test_configuration_classification() {
        assert!(TetherError::InvalidConfig("x".to_string()).is_configuration());
        assert!(!TetherError::Timer(Errno::EINVAL).is_configuration());
    }
}
