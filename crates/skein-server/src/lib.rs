//! Skein production endpoints.
//!
//! Tokio implementations of the connection capabilities in [`skein_core`],
//! plus the glue that turns sockets into running sessions.
//!
//! # Components
//!
//! - [`Server`]: binds a TCP, framed TCP or UDP endpoint and creates a
//!   session per connection
//! - [`connect`]: dials out and returns a client-role session
//! - [`StreamConn`], [`FramedConn`], [`UdpConn`]: connection implementations
//! - [`echo`]: the echo service behind the `skein-echo` binary

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod config;
pub mod echo;
mod error;
mod server;
mod transport;

pub use client::connect;
pub use config::ServerRuntimeConfig;
pub use error::ServerError;
pub use server::Server;
pub use transport::{FramedConn, StreamConn, UdpConn, tune_tcp};
