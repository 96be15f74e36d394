/// Frame kinds understood by the framed transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Application message
    Data = 0x01,
    /// Keepalive request
    Ping = 0x02,
    /// Keepalive response
    Pong = 0x03,
    /// Orderly end of stream
    Close = 0x04,
}

impl Opcode {
    /// Raw opcode byte.
    #[must_use]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Parse a raw opcode byte. `None` if unrecognized.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Data),
            0x02 => Some(Self::Ping),
            0x03 => Some(Self::Pong),
            0x04 => Some(Self::Close),
            _ => None,
        }
    }

    /// Control frames are handled by the transport and never delivered.
    #[must_use]
    pub fn is_control(self) -> bool {
        !matches!(self, Self::Data)
    }
}
