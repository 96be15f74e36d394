//! Codecs used by the scenario and property tests.

use async_trait::async_trait;
use bytes::Bytes;
use skein_core::{CodecError, Outgoing, Reader, Session, SessionError, Writer};

/// Bytes taken by the length prefix.
pub const PREFIX_LEN: usize = 4;

/// Big-endian `u32` length prefix followed by the payload.
///
/// Reports the declared length as soon as the prefix is buffered, so an
/// oversized message is refused before its body arrives.
#[derive(Debug, Default)]
pub struct LengthPrefixCodec;

impl LengthPrefixCodec {
    /// Prefix `payload` with its length.
    pub fn encode(payload: &[u8]) -> Vec<u8> {
        let mut wire = Vec::with_capacity(PREFIX_LEN + payload.len());
        wire.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        wire.extend_from_slice(payload);
        wire
    }
}

impl Reader<Bytes> for LengthPrefixCodec {
    fn read(&self, _session: &Session<Bytes>, data: &[u8]) -> Result<(Option<Bytes>, usize), CodecError> {
        if data.len() < PREFIX_LEN {
            return Ok((None, 0));
        }

        let mut prefix = [0u8; PREFIX_LEN];
        prefix.copy_from_slice(&data[..PREFIX_LEN]);
        let total = PREFIX_LEN + u32::from_be_bytes(prefix) as usize;
        if data.len() < total {
            return Ok((None, total));
        }

        Ok((Some(Bytes::copy_from_slice(&data[PREFIX_LEN..total])), total))
    }
}

#[async_trait]
impl Writer<Bytes> for LengthPrefixCodec {
    async fn write(&self, session: &Session<Bytes>, pkg: Outgoing<Bytes>) -> Result<(), SessionError> {
        match pkg {
            Outgoing::Package(payload) => {
                let prefix = (payload.len() as u32).to_be_bytes();
                session.write_bytes_array(&[&prefix[..], &payload[..]]).await?
            },
            Outgoing::Datagram(ctx) => session.write_bytes_to(&Self::encode(&ctx.package), ctx.peer).await?,
        };
        Ok(())
    }
}

/// Accepts exactly one fixed message, repeatedly.
#[derive(Debug)]
pub struct ExactCodec {
    expected: Bytes,
}

impl ExactCodec {
    /// Codec that only understands `expected`.
    pub fn new(expected: impl Into<Bytes>) -> Self {
        Self { expected: expected.into() }
    }
}

impl Reader<Bytes> for ExactCodec {
    fn read(&self, _session: &Session<Bytes>, data: &[u8]) -> Result<(Option<Bytes>, usize), CodecError> {
        let want = self.expected.len();
        if data.starts_with(&self.expected) {
            return Ok((Some(self.expected.clone()), want));
        }
        if self.expected.starts_with(data) {
            return Ok((None, want));
        }
        Err(CodecError::Malformed(format!("expected {:?}", self.expected)))
    }
}

#[async_trait]
impl Writer<Bytes> for ExactCodec {
    async fn write(&self, session: &Session<Bytes>, pkg: Outgoing<Bytes>) -> Result<(), SessionError> {
        match pkg {
            Outgoing::Package(bytes) => session.write_bytes(&bytes).await?,
            Outgoing::Datagram(ctx) => session.write_bytes_to(&ctx.package, ctx.peer).await?,
        };
        Ok(())
    }
}
