//! Frame parsing errors.

use thiserror::Error;

/// Result alias for frame operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Structural errors raised while encoding or decoding frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer is shorter than the fixed header
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Minimum number of bytes required
        expected: usize,
        /// Bytes actually available
        actual: usize,
    },

    /// Payload is shorter than the header claims
    #[error("frame truncated: header claims {expected} payload bytes, got {actual}")]
    FrameTruncated {
        /// Payload size announced in the header
        expected: usize,
        /// Payload bytes actually available
        actual: usize,
    },

    /// Magic number mismatch (not a skein frame)
    #[error("invalid magic number")]
    InvalidMagic,

    /// Header version is not supported by this build
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Opcode byte does not name a known frame kind
    #[error("unknown opcode: {0:#04x}")]
    UnknownOpcode(u8),

    /// Payload exceeds the protocol limit
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Offending payload size
        size: usize,
        /// Protocol limit
        max: usize,
    },
}
