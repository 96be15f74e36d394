//! Frame header with zero-copy parsing.
//!
//! The `FrameHeader` is a fixed 8-byte structure serialized as raw binary
//! (Big Endian). The framed transport reads exactly `SIZE` bytes, validates
//! them, and then knows how many payload bytes follow.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    Opcode,
    errors::{ProtocolError, Result},
};

/// Fixed 8-byte frame header (Big Endian network byte order)
///
/// Fields are stored as raw byte arrays to avoid alignment issues. The
/// `#[repr(C, packed)]` layout with zerocopy traits lets the struct be cast
/// directly from untrusted network bytes; every 8-byte pattern is a valid
/// value, and semantic checks happen in [`FrameHeader::from_bytes`].
#[repr(C, packed)]
#[derive(Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct FrameHeader {
    magic: [u8; 2],                   // 0x534B ("SK" in ASCII)
    version: u8,                      // 0x01
    opcode: u8,                       // Opcode byte
    pub(crate) payload_size: [u8; 4], // u32 payload length
}

impl FrameHeader {
    /// Size of the serialized header (8 bytes)
    pub const SIZE: usize = 8;

    /// Magic number: "SK" in ASCII (0x534B)
    pub const MAGIC: u16 = 0x534B;

    /// Current protocol version
    pub const VERSION: u8 = 0x01;

    /// Maximum payload size (16 MB)
    pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

    /// Create a new header with the specified opcode and an empty payload.
    #[must_use]
    pub fn new(opcode: Opcode) -> Self {
        Self {
            magic: Self::MAGIC.to_be_bytes(),
            version: Self::VERSION,
            opcode: opcode.to_u8(),
            payload_size: [0; 4],
        }
    }

    /// Parse header from network bytes (zero-copy).
    ///
    /// Trailing bytes after the header are ignored.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooShort` if buffer is shorter than 8 bytes
    /// - `ProtocolError::InvalidMagic` if magic number is invalid
    /// - `ProtocolError::UnsupportedVersion` if the version byte is unknown
    /// - `ProtocolError::UnknownOpcode` if the opcode byte is unknown
    /// - `ProtocolError::PayloadTooLarge` if payload size exceeds maximum
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let header = Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::FrameTooShort {
                expected: Self::SIZE,
                actual: bytes.len(),
            })?
            .0;

        if u16::from_be_bytes(header.magic) != Self::MAGIC {
            return Err(ProtocolError::InvalidMagic);
        }

        if header.version != Self::VERSION {
            return Err(ProtocolError::UnsupportedVersion(header.version));
        }

        if Opcode::from_u8(header.opcode).is_none() {
            return Err(ProtocolError::UnknownOpcode(header.opcode));
        }

        let payload_size = u32::from_be_bytes(header.payload_size);
        if payload_size > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_size as usize,
                max: Self::MAX_PAYLOAD_SIZE as usize,
            });
        }

        Ok(header)
    }

    /// Serialize header to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(IntoBytes::as_bytes(self));
        arr
    }

    /// Protocol version byte (currently 0x01).
    #[must_use]
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Opcode as enum.
    ///
    /// Headers obtained through [`FrameHeader::from_bytes`] or
    /// [`FrameHeader::new`] always carry a known opcode; the fallback to
    /// `Data` only exists for headers built by hand in tests.
    #[must_use]
    pub fn opcode(&self) -> Opcode {
        Opcode::from_u8(self.opcode).unwrap_or(Opcode::Data)
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn payload_size(&self) -> u32 {
        u32::from_be_bytes(self.payload_size)
    }
}

impl std::fmt::Debug for FrameHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameHeader")
            .field("version", &self.version)
            .field("opcode", &self.opcode())
            .field("payload_size", &self.payload_size())
            .finish()
    }
}
