//! CRC-16/CCITT-FALSE (poly 0x1021, init 0xFFFF, no reflection).
//!
//! Shared by the link framing and the persisted record slots.

const POLY: u16 = 0x1021;
const INIT: u16 = 0xFFFF;

/// Incremental CRC state, for checksums that span several buffers.
#[derive(Debug, Clone, Copy)]
pub struct Crc16 {
    value: u16,
}

impl Crc16 {
    pub const fn new() -> Self {
        Self { value: INIT }
    }

    pub fn update(&mut self, data: &[u8]) {
        for &byte in data {
            self.value ^= (byte as u16) << 8;
            for _ in 0..8 {
                self.value = if self.value & 0x8000 != 0 {
                    (self.value << 1) ^ POLY
                } else {
                    self.value << 1
                };
            }
        }
    }

    pub const fn finish(self) -> u16 {
        self.value
    }
}

impl Default for Crc16 {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot checksum over a single buffer.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = Crc16::new();
    crc.update(data);
    crc.finish()
}
