//! Application codec capabilities and the items that flow through the
//! session queues.

use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    error::{CodecError, SessionError},
    session::Session,
};

/// Decoded package paired with the address of the peer that sent it.
///
/// Produced only by datagram sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpContext<P> {
    /// Decoded package
    pub package: P,
    /// Sender address
    pub peer: SocketAddr,
}

/// Item on the read queue, handed to [`EventListener::on_message`].
///
/// [`EventListener::on_message`]: crate::listener::EventListener::on_message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming<P> {
    /// Package decoded from a stream or framed transport
    Package(P),
    /// Package decoded from a datagram, with its sender
    Datagram(UdpContext<P>),
    /// Raw frame from a framed transport with no reader configured
    Frame(Bytes),
}

impl<P> Incoming<P> {
    /// Decoded package, if this item carries one.
    pub fn package(&self) -> Option<&P> {
        match self {
            Self::Package(pkg) => Some(pkg),
            Self::Datagram(ctx) => Some(&ctx.package),
            Self::Frame(_) => None,
        }
    }

    /// Sender address for datagram items.
    pub fn peer(&self) -> Option<SocketAddr> {
        match self {
            Self::Datagram(ctx) => Some(ctx.peer),
            Self::Package(_) | Self::Frame(_) => None,
        }
    }
}

/// Item on the write queue, handed to [`Writer::write`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing<P> {
    /// Package for the connected peer
    Package(P),
    /// Package for a specific datagram peer
    Datagram(UdpContext<P>),
}

impl<P> From<P> for Outgoing<P> {
    fn from(pkg: P) -> Self {
        Self::Package(pkg)
    }
}

impl<P> Outgoing<P> {
    /// The package, regardless of addressing.
    pub fn into_package(self) -> P {
        match self {
            Self::Package(pkg) => pkg,
            Self::Datagram(ctx) => ctx.package,
        }
    }
}

/// Decoder capability.
///
/// Called by the I/O task with the bytes buffered so far.
pub trait Reader<P: Send + 'static>: Send + Sync + 'static {
    /// Decode one package from the front of `data`.
    ///
    /// Returns the package and the number of bytes it occupies. `Ok((None,
    /// len))` means more bytes are needed; a reader that has already parsed
    /// a length prefix should report the declared length in `len` so
    /// oversized messages are rejected before their body arrives.
    ///
    /// # Errors
    ///
    /// - `CodecError::Malformed` if `data` can never decode
    fn read(&self, session: &Session<P>, data: &[u8]) -> Result<(Option<P>, usize), CodecError>;
}

/// Encoder capability.
///
/// Called by the dispatch task for each write-queue item. Implementations
/// encode the package and hand the bytes to [`Session::write_bytes`] or
/// [`Session::write_bytes_to`].
#[async_trait]
pub trait Writer<P: Send + 'static>: Send + Sync + 'static {
    /// Encode and send one package.
    ///
    /// # Errors
    ///
    /// Any error puts the session into write-failure state and starts
    /// shutdown.
    async fn write(&self, session: &Session<P>, pkg: Outgoing<P>) -> Result<(), SessionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_accessors() {
        let peer: SocketAddr = "127.0.0.1:9000".parse().expect("addr");

        let plain = Incoming::Package(7u32);
        assert_eq!(plain.package(), Some(&7));
        assert_eq!(plain.peer(), None);

        let datagram = Incoming::Datagram(UdpContext { package: 8u32, peer });
        assert_eq!(datagram.package(), Some(&8));
        assert_eq!(datagram.peer(), Some(peer));

        let frame: Incoming<u32> = Incoming::Frame(Bytes::from_static(b"raw"));
        assert_eq!(frame.package(), None);
    }

    #[test]
    fn bare_package_converts_to_outgoing() {
        let out: Outgoing<&str> = "hello".into();
        assert_eq!(out, Outgoing::Package("hello"));
        assert_eq!(out.into_package(), "hello");
    }
}
