//! Network-layer error types.

use thiserror::Error;

/// Result type for network operations.
pub type NetResult<T> = Result<T, NetError>;

/// Errors from prefix probing and privileged reconfiguration.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("no interface with a global IPv6 address found")]
    NoGlobalIpv6,

    #[error("failed to enumerate network interfaces: {0}")]
    Ifaddrs(String),

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("command `{command}` exited with status {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl NetError {
    pub fn command_failed(
        command: impl Into<String>,
        status: i32,
        stderr: impl Into<String>,
    ) -> Self {
        Self::CommandFailed {
            command: command.into(),
            status,
            stderr: stderr.into(),
        }
    }
}
