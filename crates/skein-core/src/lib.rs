//! Skein session engine.
//!
//! One lifecycle abstraction over byte-stream, datagram and message-framed
//! connections. Each connection is owned by a [`Session`] that decouples
//! transport I/O from application dispatch:
//!
//! ```text
//! transport bytes ─► I/O task (decode) ─► read queue ─► dispatch task ─► listener
//! write_pkg ─► write queue ─► dispatch task ─► Writer ─► transport
//! ```
//!
//! The application injects its codec ([`Reader`] / [`Writer`]) and its
//! [`EventListener`]; the concrete sockets are injected as a [`Transport`].
//! Both queues are bounded, so a slow consumer produces backpressure
//! ([`SessionError::Blocked`]) instead of unbounded buffering.
//!
//! # Components
//!
//! - [`Session`]: per-connection runtime and shutdown protocol
//! - [`Transport`]: tagged connection (stream, datagram, framed)
//! - [`AttributeStore`]: session-scoped key/value store
//! - [`TimerWheel`]: shared coarse timer facility
//! - [`SessionConfig`]: typed settings applied to new sessions

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod attributes;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod listener;
pub mod session;
pub mod timer;

pub use attributes::AttributeStore;
pub use codec::{Incoming, Outgoing, Reader, UdpContext, Writer};
pub use config::{ConfigError, SessionConfig};
pub use connection::{
    Connection, DatagramConnection, FramedConnection, IoTimeouts, StatsSnapshot, StreamConnection,
    Transport, TransportKind, next_connection_id,
};
pub use error::{CodecError, SessionError, TransportError};
pub use listener::EventListener;
pub use session::{EndpointRole, Session, SessionState};
pub use timer::{Sleep, TickWheel, TimerWheel};
