//! Error types for the session engine.
//!
//! Three layers: transport errors (socket primitives), codec errors
//! (application decode/encode), and session errors (what callers of the
//! public API and the error callback observe).
//!
//! Configuration faults (missing queue, listener or writer at startup,
//! non-positive sizes or periods) are not represented here. They are
//! programmer errors and panic at the call site.

use std::io;

use thiserror::Error;

/// Errors reported by a [`Connection`](crate::connection::Connection).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Read or write did not complete before its timeout or deadline.
    ///
    /// Expected and recoverable: the I/O task treats it as a re-check point.
    #[error("i/o timeout")]
    Timeout,

    /// Peer closed its side of the connection
    #[error("connection closed by peer")]
    Eof,

    /// Local side already released the socket
    #[error("connection closed")]
    Closed,

    /// Peer violated the transport framing
    #[error("transport protocol error: {0}")]
    Protocol(String),

    /// Any other socket failure
    #[error("i/o error: {0}")]
    Io(String),
}

impl TransportError {
    /// Returns true if this is a timeout rather than a failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::Timeout,
            io::ErrorKind::UnexpectedEof => Self::Eof,
            _ => Self::Io(err.to_string()),
        }
    }
}

impl From<tokio::time::error::Elapsed> for TransportError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout
    }
}

/// Errors raised by an application [`Reader`](crate::codec::Reader) or
/// [`Writer`](crate::codec::Writer).
///
/// "Not enough bytes yet" is not an error: readers return `Ok((None, _))`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Bytes cannot be decoded into a package
    #[error("malformed package: {0}")]
    Malformed(String),
}

/// Errors observed through the session API and the error callback.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Session is closing or closed. Ordinary return value, not a fault.
    #[error("session closed")]
    Closed,

    /// Write queue stayed full for the whole timeout. Ordinary backpressure.
    #[error("session write queue blocked")]
    Blocked,

    /// A decoded package is longer than the session's max message length
    #[error("message too long: {len} bytes (max {max})")]
    MsgTooLong {
        /// Length reported by the reader
        len: usize,
        /// Configured limit
        max: usize,
    },

    /// Application codec failure
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Transport failure other than a timeout
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The listener refused the session in `on_open`
    #[error("session rejected: {0}")]
    Rejected(String),
}

impl SessionError {
    /// Returns true if retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Blocked | Self::Transport(TransportError::Timeout))
    }

    /// Returns true for the distinguished over-length decode fault.
    pub fn is_too_long(&self) -> bool {
        matches!(self, Self::MsgTooLong { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_timeouts_map_to_timeout() {
        let err: TransportError = io::Error::new(io::ErrorKind::TimedOut, "slow").into();
        assert!(err.is_timeout());

        let err: TransportError = io::Error::new(io::ErrorKind::WouldBlock, "again").into();
        assert!(err.is_timeout());
    }

    #[test]
    fn other_io_errors_are_failures() {
        let err: TransportError = io::Error::new(io::ErrorKind::ConnectionReset, "reset").into();
        assert!(!err.is_timeout());
        assert!(matches!(err, TransportError::Io(_)));

        let err: TransportError = io::Error::new(io::ErrorKind::UnexpectedEof, "eof").into();
        assert_eq!(err, TransportError::Eof);
    }

    #[test]
    fn backpressure_and_timeouts_are_transient() {
        assert!(SessionError::Blocked.is_transient());
        assert!(SessionError::Transport(TransportError::Timeout).is_transient());

        assert!(!SessionError::Closed.is_transient());
        assert!(!SessionError::MsgTooLong { len: 10, max: 4 }.is_transient());
        assert!(!SessionError::Transport(TransportError::Eof).is_transient());
        assert!(!SessionError::Codec(CodecError::Malformed("x".into())).is_transient());
    }

    #[test]
    fn too_long_is_distinct_from_malformed() {
        assert!(SessionError::MsgTooLong { len: 10, max: 4 }.is_too_long());
        assert!(!SessionError::Codec(CodecError::Malformed("bad".into())).is_too_long());
    }

    #[test]
    fn display_messages() {
        assert_eq!(SessionError::Closed.to_string(), "session closed");
        assert_eq!(
            SessionError::MsgTooLong { len: 2048, max: 1024 }.to_string(),
            "message too long: 2048 bytes (max 1024)"
        );
    }
}
