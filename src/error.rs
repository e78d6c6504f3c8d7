//! Error Types

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by manager operations
#[derive(Debug, Error)]
pub enum Error {
    #[error("server '{0}' already exists")]
    ServerAlreadyExists(String),

    #[error("client '{0}' already exists")]
    ClientAlreadyExists(String),

    #[error("server '{0}' not found")]
    ServerNotFound(String),

    #[error("client '{0}' not found")]
    ClientNotFound(String),

    #[error("connection '{0}' not found")]
    ConnectionNotFound(String),

    #[error("server '{0}' is not running")]
    ServerNotRunning(String),

    #[error("client '{0}' is not connected")]
    ClientNotConnected(String),

    #[error("client '{0}' is already connected or connecting")]
    ClientAlreadyConnected(String),

    #[error("connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    #[error("failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },

    #[error("failed to connect to {addr}: {source}")]
    Connect { addr: String, source: io::Error },

    #[error("failed to resolve {addr}: {source}")]
    Resolve { addr: String, source: io::Error },

    #[error("write failed: {0}")]
    Write(#[source] io::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_instance() {
        let err = Error::ServerNotFound("edge".to_string());
        assert_eq!(err.to_string(), "server 'edge' not found");

        let err = Error::ClientAlreadyConnected("upstream".to_string());
        assert!(err.to_string().contains("upstream"));
    }

    #[test]
    fn test_io_error_converts() {
        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "pipe");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
