//! Sync-prefixed, CRC-protected frame codec.
//!
//! Wire format:
//! ```text
//! ┌──────┬──────┬──────┬────────┬─────────────────┬───────────┐
//! │ 0xAA │ 0x55 │ type │ length │ payload[length] │ crc16 LE  │
//! └──────┴──────┴──────┴────────┴─────────────────┴───────────┘
//! ```
//!
//! The CRC (CCITT-FALSE) covers `type`, `length` and the payload.
//!
//! The decoder pulls bytes one at a time, so a single read may deliver
//! part of a frame or several frames back to back.  When a candidate
//! frame fails (bad CRC, oversize length) every byte after its first
//! sync byte is replayed through the scanner, so a valid frame hiding
//! inside the garbage is still found.

use heapless::{Deque, Vec};

use crate::crc::Crc16;
use crate::error::LinkError;

pub const SYNC_1: u8 = 0xAA;
pub const SYNC_2: u8 = 0x55;

/// Largest payload a frame may carry.
pub const MAX_PAYLOAD: usize = 232;
/// Sync pair, type and length.
pub const HEADER_LEN: usize = 4;
pub const CRC_LEN: usize = 2;
pub const MAX_FRAME_LEN: usize = HEADER_LEN + MAX_PAYLOAD + CRC_LEN;

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub msg_type: u8,
    pub payload: Vec<u8, MAX_PAYLOAD>,
}

impl Frame {
    pub fn new(msg_type: u8, payload: &[u8]) -> Result<Self, LinkError> {
        let payload = Vec::from_slice(payload).map_err(|()| LinkError::Oversize)?;
        Ok(Self { msg_type, payload })
    }

    /// Serialise to wire bytes.
    pub fn to_bytes(&self) -> Vec<u8, MAX_FRAME_LEN> {
        let mut out = [0u8; MAX_FRAME_LEN];
        // The payload is bounded by MAX_PAYLOAD, so the buffer always fits.
        let n = encode_frame(self.msg_type, &self.payload, &mut out).unwrap_or(0);
        Vec::from_slice(&out[..n]).unwrap_or_default()
    }
}

fn frame_crc(msg_type: u8, payload: &[u8]) -> u16 {
    let mut crc = Crc16::new();
    crc.update(&[msg_type, payload.len() as u8]);
    crc.update(payload);
    crc.finish()
}

/// Encode a frame into `out`.  Returns the number of bytes written.
pub fn encode_frame(msg_type: u8, payload: &[u8], out: &mut [u8]) -> Result<usize, LinkError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(LinkError::Oversize);
    }
    let total = HEADER_LEN + payload.len() + CRC_LEN;
    if out.len() < total {
        return Err(LinkError::Oversize);
    }
    out[0] = SYNC_1;
    out[1] = SYNC_2;
    out[2] = msg_type;
    out[3] = payload.len() as u8;
    out[HEADER_LEN..HEADER_LEN + payload.len()].copy_from_slice(payload);
    let crc = frame_crc(msg_type, payload).to_le_bytes();
    out[total - CRC_LEN..total].copy_from_slice(&crc);
    Ok(total)
}

/// Decoder state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    Sync1,
    Sync2,
    Type,
    Length { msg_type: u8 },
    Payload { msg_type: u8, len: usize },
    Crc { msg_type: u8, lo: Option<u8> },
}

/// Streaming frame decoder.
pub struct FrameDecoder {
    state: DecoderState,
    payload: Vec<u8, MAX_PAYLOAD>,
    /// Raw bytes of the current candidate frame, sync bytes included.
    candidate: Vec<u8, MAX_FRAME_LEN>,
    /// Bytes waiting to be rescanned after a failed candidate.
    replay: Deque<u8, MAX_FRAME_LEN>,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::Sync1,
            payload: Vec::new(),
            candidate: Vec::new(),
            replay: Deque::new(),
        }
    }

    /// Pull bytes from `next_byte` until a frame completes, a candidate
    /// fails, or the source runs dry.
    ///
    /// Replayed bytes are consumed before new input.  Never blocks.
    pub fn poll(
        &mut self,
        mut next_byte: impl FnMut() -> Option<u8>,
    ) -> Option<Result<Frame, LinkError>> {
        loop {
            let byte = match self.replay.pop_front() {
                Some(b) => b,
                None => next_byte()?,
            };
            if let Some(result) = self.step(byte) {
                return Some(result);
            }
        }
    }

    /// Convenience for a contiguous buffer; returns every result in order.
    pub fn feed_slice(&mut self, data: &[u8]) -> std::vec::Vec<Result<Frame, LinkError>> {
        let mut bytes = data.iter().copied();
        let mut out = std::vec::Vec::new();
        while let Some(r) = self.poll(|| bytes.next()) {
            out.push(r);
        }
        out
    }

    /// Drop any partial frame and pending replay bytes.
    pub fn reset(&mut self) {
        self.state = DecoderState::Sync1;
        self.payload.clear();
        self.candidate.clear();
        self.replay.clear();
    }

    fn step(&mut self, byte: u8) -> Option<Result<Frame, LinkError>> {
        match self.state {
            DecoderState::Sync1 => {
                if byte == SYNC_1 {
                    self.candidate.clear();
                    let _ = self.candidate.push(byte);
                    self.state = DecoderState::Sync2;
                }
            }
            DecoderState::Sync2 => {
                if byte == SYNC_2 {
                    let _ = self.candidate.push(byte);
                    self.state = DecoderState::Type;
                } else if byte == SYNC_1 {
                    // AA AA 55: the second AA starts the frame.
                    self.candidate.clear();
                    let _ = self.candidate.push(byte);
                } else {
                    self.candidate.clear();
                    self.state = DecoderState::Sync1;
                }
            }
            DecoderState::Type => {
                let _ = self.candidate.push(byte);
                self.state = DecoderState::Length { msg_type: byte };
            }
            DecoderState::Length { msg_type } => {
                let _ = self.candidate.push(byte);
                let len = usize::from(byte);
                if len > MAX_PAYLOAD {
                    self.resync();
                    return Some(Err(LinkError::Oversize));
                }
                self.payload.clear();
                self.state = if len == 0 {
                    DecoderState::Crc { msg_type, lo: None }
                } else {
                    DecoderState::Payload { msg_type, len }
                };
            }
            DecoderState::Payload { msg_type, len } => {
                let _ = self.candidate.push(byte);
                let _ = self.payload.push(byte);
                if self.payload.len() == len {
                    self.state = DecoderState::Crc { msg_type, lo: None };
                }
            }
            DecoderState::Crc { msg_type, lo: None } => {
                let _ = self.candidate.push(byte);
                self.state = DecoderState::Crc {
                    msg_type,
                    lo: Some(byte),
                };
            }
            DecoderState::Crc {
                msg_type,
                lo: Some(lo),
            } => {
                let _ = self.candidate.push(byte);
                let received = u16::from_le_bytes([lo, byte]);
                if received != frame_crc(msg_type, &self.payload) {
                    self.resync();
                    return Some(Err(LinkError::BadCrc));
                }
                let frame = Frame {
                    msg_type,
                    payload: self.payload.clone(),
                };
                self.candidate.clear();
                self.payload.clear();
                self.state = DecoderState::Sync1;
                return Some(Ok(frame));
            }
        }
        None
    }

    /// Abandon the candidate and queue everything after its first sync
    /// byte for rescanning, ahead of any bytes still pending.
    fn resync(&mut self) {
        for &b in self.candidate.iter().skip(1).rev() {
            // Candidate bytes came off the replay queue or the source, so
            // the queue has room for them.
            let _ = self.replay.push_front(b);
        }
        self.candidate.clear();
        self.payload.clear();
        self.state = DecoderState::Sync1;
    }
}
