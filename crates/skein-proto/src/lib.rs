//! Skein wire frame.
//!
//! The message-framed transport carries one application message per frame.
//! A frame is an 8-byte big-endian header followed by the payload bytes:
//!
//! ```text
//! ┌───────────┬─────────┬────────┬──────────────────┬─────────────┐
//! │ magic (2) │ ver (1) │ op (1) │ payload_size (4) │ payload ... │
//! └───────────┴─────────┴────────┴──────────────────┴─────────────┘
//! ```
//!
//! Control opcodes (`Ping`, `Pong`, `Close`) are consumed by the transport;
//! only `Data` frames reach a session.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod errors;
mod frame;
mod header;
mod opcode;

pub use errors::{ProtocolError, Result};
pub use frame::Frame;
pub use header::FrameHeader;
pub use opcode::Opcode;
