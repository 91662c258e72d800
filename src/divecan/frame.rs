//! The unit of bus traffic.

use core::fmt;

use super::ids::ID_MASK;

/// Classic CAN payload limit.
pub const MAX_PAYLOAD: usize = 8;

/// One extended-id frame, inbound or outbound.  Bytes past `len` are zero.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct BusFrame {
    pub id: u32,
    pub len: u8,
    pub data: [u8; MAX_PAYLOAD],
}

impl BusFrame {
    /// Build from a payload of at most 8 bytes; anything longer is cut.
    pub fn new(id: u32, payload: &[u8]) -> Self {
        let len = payload.len().min(MAX_PAYLOAD);
        let mut data = [0u8; MAX_PAYLOAD];
        data[..len].copy_from_slice(&payload[..len]);
        Self {
            id,
            len: len as u8,
            data,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..usize::from(self.len).min(MAX_PAYLOAD)]
    }

    /// Message class bits.
    pub fn class(&self) -> u32 {
        self.id & ID_MASK
    }

    /// Sender device type (low nibble).
    pub fn source(&self) -> u8 {
        (self.id & 0xF) as u8
    }

    /// Byte `i` of the payload, or 0 past its end.
    pub fn byte(&self, i: usize) -> u8 {
        self.payload().get(i).copied().unwrap_or(0)
    }
}

impl fmt::Debug for BusFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X} [{}]", self.id, self.len)?;
        for b in self.payload() {
            write!(f, " {b:02X}")?;
        }
        Ok(())
    }
}
