//! Test harness for skein sessions.
//!
//! In-memory and simulated connections for exercising sessions without
//! real sockets:
//!
//! - [`scripted`]: stream, datagram and framed connections the test feeds by
//!   hand, with recorded output
//! - [`codecs`]: a length-prefix codec and a fixed-message codec
//! - [`recorder`]: an [`EventListener`](skein_core::EventListener) that records
//!   every callback
//! - [`sim`]: turmoil hosts running the production stream connection

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codecs;
pub mod recorder;
pub mod scripted;
pub mod sim;

pub use codecs::{ExactCodec, LengthPrefixCodec};
pub use recorder::{RecordingListener, wait_until};
pub use scripted::{LOCAL_ADDR, REMOTE_ADDR, ScriptedDatagram, ScriptedFramed, ScriptedStream};
