//! Typed error hierarchy for the Outpost host.
//!
//! A single enum covers the execution taxonomy; every variant is caught at
//! the orchestrator or gateway boundary and converted into a well-formed
//! result with `success=false`. Clients see exit codes and text, never
//! stack traces.

use thiserror::Error;

/// Errors raised while executing a command or serving a preview.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("cd: {path}: No such file or directory")]
    Path { path: String },

    #[error("Failed to spawn process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Command timed out after {secs} seconds")]
    Timeout { secs: u64 },

    #[error("No server is listening on port {port}")]
    UpstreamUnreachable { port: u16 },

    #[error("Cannot start a dev server: {0}")]
    GuardRejection(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HostError {
    /// Exit code reported to the client for this failure class.
    pub fn exit_code(&self) -> i32 {
        match self {
            HostError::Timeout { .. } => 124,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_error_reads_like_posix_cd() {
        let err = HostError::Path {
            path: "nope".into(),
        };
        assert_eq!(err.to_string(), "cd: nope: No such file or directory");
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn timeout_uses_shell_timeout_exit_code() {
        let err = HostError::Timeout { secs: 1800 };
        assert_eq!(err.exit_code(), 124);
        assert!(err.to_string().contains("1800"));
    }

    #[test]
    fn upstream_unreachable_names_the_port() {
        let err = HostError::UpstreamUnreachable { port: 5173 };
        assert!(err.to_string().contains("5173"));
    }

    #[test]
    fn spawn_error_is_matchable() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "sh not found");
        let err = HostError::Spawn(io_err);
        match &err {
            HostError::Spawn(e) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
            _ => panic!("Expected Spawn variant"),
        }
    }

    #[test]
    fn all_variants_implement_std_error() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&HostError::Validation("x".into()));
        assert_std_error(&HostError::GuardRejection("y".into()));
    }
}
