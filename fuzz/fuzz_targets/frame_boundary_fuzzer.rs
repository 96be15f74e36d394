//! Fuzz target for frame header boundary conditions
//!
//! # Strategy
//!
//! - Magic bytes: Valid, off-by-one, all-zeros, all-ones, random
//! - Payload size: Zero, small, at-max, just-over-max, way-over-max, u32::MAX
//! - Version: Valid (0x01), zero, max, random
//! - Opcode: every byte value
//! - Body: shorter than, equal to, or longer than the declared size
//!
//! # Invariants
//!
//! - `payload_size > MAX_PAYLOAD_SIZE` MUST NOT decode
//! - Invalid magic bytes MUST return `ProtocolError::InvalidMagic`
//! - A body shorter than the declared size MUST return
//!   `ProtocolError::FrameTruncated`
//! - All decode errors MUST be structured (never panic)
//! - Encoded size MUST equal 8 + payload_size

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use skein_proto::{Frame, FrameHeader, Opcode, ProtocolError};

const MAGIC: [u8; 2] = FrameHeader::MAGIC.to_be_bytes();

#[derive(Debug, Clone, Arbitrary)]
struct BoundaryFrame {
    magic: MagicBytes,
    version: VersionBytes,
    opcode: u8,
    payload_size: PayloadSize,
    body: BodyLength,
}

#[derive(Debug, Clone, Arbitrary)]
enum MagicBytes {
    Valid,
    OffByOne(u8),
    AllZeros,
    AllOnes,
    Random([u8; 2]),
}

#[derive(Debug, Clone, Arbitrary)]
enum VersionBytes {
    Valid,
    Zero,
    Max,
    Random(u8),
}

#[derive(Debug, Clone, Arbitrary)]
enum PayloadSize {
    Zero,
    Small(u8),
    AtMaxBoundary,
    JustOverMax,
    WayOverMax,
    MaxU32,
    Random(u32),
}

#[derive(Debug, Clone, Arbitrary)]
enum BodyLength {
    Exact,
    Short(u8),
    Long(u8),
}

fuzz_target!(|boundary: BoundaryFrame| {
    let payload_size_value = match boundary.payload_size {
        PayloadSize::Zero => 0,
        PayloadSize::Small(s) => u32::from(s),
        PayloadSize::AtMaxBoundary => FrameHeader::MAX_PAYLOAD_SIZE,
        PayloadSize::JustOverMax => FrameHeader::MAX_PAYLOAD_SIZE.saturating_add(1),
        PayloadSize::WayOverMax => FrameHeader::MAX_PAYLOAD_SIZE.saturating_add(1_000_000),
        PayloadSize::MaxU32 => u32::MAX,
        PayloadSize::Random(r) => r,
    };

    // Cap the allocation; large declared sizes are exercised through
    // truncation instead.
    let declared = payload_size_value.min(100_000) as usize;
    let body_len = match boundary.body {
        BodyLength::Exact => declared,
        BodyLength::Short(cut) => declared.saturating_sub(usize::from(cut) + 1),
        BodyLength::Long(extra) => declared + usize::from(extra),
    };
    let mut buffer = vec![0xAAu8; FrameHeader::SIZE + body_len];

    match boundary.magic {
        MagicBytes::Valid => buffer[0..2].copy_from_slice(&MAGIC),
        MagicBytes::OffByOne(offset) => {
            buffer[0..2].copy_from_slice(&MAGIC);
            let idx = (offset % 2) as usize;
            buffer[idx] = buffer[idx].wrapping_add(1);
        },
        MagicBytes::AllZeros => buffer[0..2].fill(0),
        MagicBytes::AllOnes => buffer[0..2].fill(0xFF),
        MagicBytes::Random(bytes) => buffer[0..2].copy_from_slice(&bytes),
    }

    buffer[2] = match boundary.version {
        VersionBytes::Valid => FrameHeader::VERSION,
        VersionBytes::Zero => 0,
        VersionBytes::Max => u8::MAX,
        VersionBytes::Random(v) => v,
    };
    buffer[3] = boundary.opcode;
    buffer[4..8].copy_from_slice(&payload_size_value.to_be_bytes());

    match Frame::decode(&buffer) {
        Ok(frame) => {
            assert_eq!(buffer[0..2], MAGIC);
            assert_eq!(buffer[2], FrameHeader::VERSION);
            assert!(payload_size_value <= FrameHeader::MAX_PAYLOAD_SIZE);
            assert_eq!(frame.payload.len(), payload_size_value as usize);
            assert_eq!(frame.encoded_len(), FrameHeader::SIZE + frame.payload.len());
        },
        Err(ProtocolError::InvalidMagic) => assert_ne!(buffer[0..2], MAGIC),
        Err(ProtocolError::FrameTruncated { expected, actual }) => assert!(actual < expected),
        Err(_) => {},
    }

    if let Some(opcode) = Opcode::from_u8(boundary.opcode) {
        let small_payload = vec![0x55; declared.min(1000)];
        let frame = Frame::new(FrameHeader::new(opcode), small_payload);

        let mut encoded = Vec::new();
        if frame.encode(&mut encoded).is_err() {
            return;
        }
        assert_eq!(encoded.len(), FrameHeader::SIZE + frame.payload.len());

        let decoded = Frame::decode(&encoded).expect("encoded frame must decode");
        assert_eq!(decoded, frame);
    }
});
