//! Frame type combining header and payload.

use bytes::{BufMut, Bytes};

use crate::{
    FrameHeader, Opcode,
    errors::{ProtocolError, Result},
};

/// Complete protocol frame (transport layer)
///
/// Layout on the wire: `[FrameHeader: 8 bytes] + [payload: variable bytes]`
///
/// # Invariants
///
/// - Size Consistency: `payload.len()` MUST match `header.payload_size()`.
///   Enforced by [`Frame::new`] and verified by [`Frame::decode`].
/// - Size Limit: `payload.len()` MUST NOT exceed
///   [`FrameHeader::MAX_PAYLOAD_SIZE`]. Violations are rejected during
///   encoding and decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame header
    pub header: FrameHeader,

    /// Raw payload bytes
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame with automatic `payload_size` calculation.
    ///
    /// Does not validate the size limit; oversized frames are rejected by
    /// [`Frame::encode`].
    #[must_use]
    pub fn new(mut header: FrameHeader, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();

        // Lengths above u32::MAX saturate so encode() still rejects them.
        let payload_len = u32::try_from(payload.len()).unwrap_or(u32::MAX);
        header.payload_size = payload_len.to_be_bytes();

        Self { header, payload }
    }

    /// Data frame carrying an application message.
    #[must_use]
    pub fn data(payload: impl Into<Bytes>) -> Self {
        Self::new(FrameHeader::new(Opcode::Data), payload)
    }

    /// Empty control frame.
    #[must_use]
    pub fn control(opcode: Opcode) -> Self {
        Self::new(FrameHeader::new(opcode), Bytes::new())
    }

    /// Frame kind.
    #[must_use]
    pub fn opcode(&self) -> Opcode {
        self.header.opcode()
    }

    /// Total encoded size (header plus payload).
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        FrameHeader::SIZE + self.payload.len()
    }

    /// Encode frame into buffer.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if payload exceeds `MAX_PAYLOAD_SIZE`
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        if self.payload.len() > FrameHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.payload.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        debug_assert_eq!(self.payload.len(), self.header.payload_size() as usize);

        dst.put_slice(&self.header.to_bytes());
        dst.put_slice(&self.payload);

        Ok(())
    }

    /// Encode into a freshly allocated buffer.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode(&mut buf)?;
        Ok(buf)
    }

    /// Decode one frame from the front of `bytes`.
    ///
    /// Trailing bytes beyond the frame are ignored; use
    /// [`Frame::encoded_len`] on the result to know how much was consumed.
    ///
    /// # Errors
    ///
    /// - Any header error from [`FrameHeader::from_bytes`]
    /// - `ProtocolError::FrameTruncated` if fewer payload bytes are present
    ///   than the header claims
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = FrameHeader::from_bytes(bytes)?;

        let payload_size = header.payload_size() as usize;
        let total_size = FrameHeader::SIZE + payload_size;

        let Some(payload) = bytes.get(FrameHeader::SIZE..total_size) else {
            return Err(ProtocolError::FrameTruncated {
                expected: payload_size,
                actual: bytes.len().saturating_sub(FrameHeader::SIZE),
            });
        };

        Ok(Self { header: *header, payload: Bytes::copy_from_slice(payload) })
    }
}
