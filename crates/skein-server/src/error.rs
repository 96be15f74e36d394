//! Server error types.

use std::io;

use skein_core::{ConfigError, SessionError};
use thiserror::Error;

/// Errors that can occur in the server and client endpoints.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Configuration error (invalid bind address, invalid session settings).
    ///
    /// Fatal: prevents startup. Fix configuration and restart.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport/network error (bind, accept or connect failure).
    ///
    /// May be transient (network issues) or fatal (bind address in use).
    #[error("transport error: {0}")]
    Transport(String),

    /// A session could not be set up or started.
    #[error("session error: {0}")]
    Session(#[from] SessionError),
}

impl From<ConfigError> for ServerError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<io::Error> for ServerError {
    fn from(err: io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
