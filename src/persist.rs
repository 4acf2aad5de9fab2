//! Atomic-by-replacement record storage on top of [`StoragePort`].
//!
//! Every record lives in two slots inside its own namespace plus a small
//! commit pointer:
//!
//! ```text
//!   slot_a / slot_b : magic u16 | seq u32 | len u16 | postcard payload | crc16
//!   commit          : slot u8   | seq u32 | crc16
//! ```
//!
//! A save writes the whole blob into the slot that is *not* current, then
//! rewrites the commit pointer.  Power loss before the pointer lands
//! leaves the previous commit pointing at the previous record.
//!
//! All integers little-endian; CRC is CRC-16/CCITT-FALSE over everything
//! before it.

use log::{info, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::app::ports::{StorageError, StoragePort};
use crate::crc::crc16;
use crate::error::PersistError;

/// Blob marker.
pub const RECORD_MAGIC: u16 = 0xC3EA;

/// Largest postcard payload a record may carry.
pub const MAX_RECORD_PAYLOAD: usize = 128;

const HEADER_LEN: usize = 8;
const CRC_LEN: usize = 2;
const MAX_BLOB_LEN: usize = HEADER_LEN + MAX_RECORD_PAYLOAD + CRC_LEN;
const COMMIT_LEN: usize = 7;

const COMMIT_KEY: &str = "commit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    A = 0,
    B = 1,
}

impl Slot {
    const fn key(self) -> &'static str {
        match self {
            Self::A => "slot_a",
            Self::B => "slot_b",
        }
    }

    const fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::A),
            1 => Some(Self::B),
            _ => None,
        }
    }
}

/// Double-buffered record in one storage namespace.
#[derive(Debug)]
pub struct RecordStore {
    namespace: &'static str,
    /// Sequence number of the last committed record.
    seq: u32,
    /// Slot holding the last committed record.
    current: Option<Slot>,
}

impl RecordStore {
    pub const fn new(namespace: &'static str) -> Self {
        Self {
            namespace,
            seq: 0,
            current: None,
        }
    }

    pub fn namespace(&self) -> &'static str {
        self.namespace
    }

    /// Load the committed record.
    ///
    /// Returns `Ok(None)` when nothing was ever committed.  A corrupt or
    /// mismatched committed slot falls back to the other slot when that
    /// one holds an older valid record.
    pub fn load<T: DeserializeOwned>(
        &mut self,
        storage: &impl StoragePort,
    ) -> Result<Option<T>, PersistError> {
        let commit = match self.read_commit(storage)? {
            CommitRead::Missing => {
                info!("persist[{}]: no committed record", self.namespace);
                return Ok(None);
            }
            CommitRead::Valid(slot, seq) => Some((slot, seq)),
            CommitRead::Corrupt => {
                warn!("persist[{}]: commit pointer corrupt", self.namespace);
                None
            }
        };

        let mut buf_a = [0u8; MAX_BLOB_LEN];
        let mut buf_b = [0u8; MAX_BLOB_LEN];
        let a = self.read_slot(storage, Slot::A, &mut buf_a)?;
        let b = self.read_slot(storage, Slot::B, &mut buf_b)?;
        let slot_record = |slot: Slot| match slot {
            Slot::A => a,
            Slot::B => b,
        };

        let chosen = match commit {
            Some((slot, seq)) => match slot_record(slot) {
                Some((s, payload)) if s == seq => Some((slot, s, payload)),
                _ => {
                    warn!(
                        "persist[{}]: committed {} invalid, trying fallback",
                        self.namespace,
                        slot.key()
                    );
                    slot_record(slot.other())
                        .filter(|(s, _)| *s < seq)
                        .map(|(s, p)| (slot.other(), s, p))
                }
            },
            // The pointer was being rewritten; both slots were complete
            // before it was touched, so the newest valid one is the latest.
            None => [Slot::A, Slot::B]
                .into_iter()
                .filter_map(|slot| slot_record(slot).map(|(s, p)| (slot, s, p)))
                .max_by_key(|(_, s, _)| *s),
        };

        let Some((slot, seq, payload)) = chosen else {
            warn!("persist[{}]: no valid record found", self.namespace);
            return Ok(None);
        };
        let value = postcard::from_bytes(payload).map_err(|_| PersistError::Decode)?;
        self.seq = seq;
        self.current = Some(slot);
        info!("persist[{}]: loaded seq {} from {}", self.namespace, seq, slot.key());
        Ok(Some(value))
    }

    /// Write `value` to the inactive slot and commit it.
    pub fn save<T: Serialize>(
        &mut self,
        storage: &mut impl StoragePort,
        value: &T,
    ) -> Result<(), PersistError> {
        let mut blob = [0u8; MAX_BLOB_LEN];
        let payload_len = postcard::to_slice(value, &mut blob[HEADER_LEN..HEADER_LEN + MAX_RECORD_PAYLOAD])
            .map_err(|_| PersistError::Encode)?
            .len();

        let seq = self.seq.wrapping_add(1);
        blob[0..2].copy_from_slice(&RECORD_MAGIC.to_le_bytes());
        blob[2..6].copy_from_slice(&seq.to_le_bytes());
        blob[6..8].copy_from_slice(&(payload_len as u16).to_le_bytes());
        let crc_at = HEADER_LEN + payload_len;
        let crc = crc16(&blob[..crc_at]);
        blob[crc_at..crc_at + CRC_LEN].copy_from_slice(&crc.to_le_bytes());

        let target = self.current.map_or(Slot::A, Slot::other);
        storage.write(self.namespace, target.key(), &blob[..crc_at + CRC_LEN])?;

        let mut commit = [0u8; COMMIT_LEN];
        commit[0] = target as u8;
        commit[1..5].copy_from_slice(&seq.to_le_bytes());
        let crc = crc16(&commit[..5]);
        commit[5..7].copy_from_slice(&crc.to_le_bytes());
        storage.write(self.namespace, COMMIT_KEY, &commit)?;

        self.seq = seq;
        self.current = Some(target);
        info!("persist[{}]: committed seq {} to {}", self.namespace, seq, target.key());
        Ok(())
    }

    fn read_commit(&self, storage: &impl StoragePort) -> Result<CommitRead, PersistError> {
        let mut buf = [0u8; COMMIT_LEN];
        let len = match storage.read(self.namespace, COMMIT_KEY, &mut buf) {
            Ok(len) => len,
            Err(StorageError::NotFound) => return Ok(CommitRead::Missing),
            Err(e) => return Err(e.into()),
        };
        if len != COMMIT_LEN || crc16(&buf[..5]) != u16::from_le_bytes([buf[5], buf[6]]) {
            return Ok(CommitRead::Corrupt);
        }
        let Some(slot) = Slot::from_code(buf[0]) else {
            return Ok(CommitRead::Corrupt);
        };
        let seq = u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]);
        Ok(CommitRead::Valid(slot, seq))
    }

    /// Read and validate one slot.  Returns `(seq, payload)` when intact.
    fn read_slot<'b>(
        &self,
        storage: &impl StoragePort,
        slot: Slot,
        buf: &'b mut [u8; MAX_BLOB_LEN],
    ) -> Result<Option<(u32, &'b [u8])>, PersistError> {
        let len = match storage.read(self.namespace, slot.key(), buf) {
            Ok(len) => len,
            Err(StorageError::NotFound) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let buf: &'b [u8] = buf;
        Ok(parse_record(&buf[..len]))
    }
}

enum CommitRead {
    Missing,
    Corrupt,
    Valid(Slot, u32),
}

fn parse_record(blob: &[u8]) -> Option<(u32, &[u8])> {
    if blob.len() < HEADER_LEN + CRC_LEN {
        return None;
    }
    if u16::from_le_bytes([blob[0], blob[1]]) != RECORD_MAGIC {
        return None;
    }
    let seq = u32::from_le_bytes([blob[2], blob[3], blob[4], blob[5]]);
    let len = usize::from(u16::from_le_bytes([blob[6], blob[7]]));
    if len > MAX_RECORD_PAYLOAD || blob.len() != HEADER_LEN + len + CRC_LEN {
        return None;
    }
    let crc_at = HEADER_LEN + len;
    if crc16(&blob[..crc_at]) != u16::from_le_bytes([blob[crc_at], blob[crc_at + 1]]) {
        return None;
    }
    Some((seq, &blob[HEADER_LEN..crc_at]))
}

impl From<StorageError> for PersistError {
    fn from(_: StorageError) -> Self {
        Self::Io
    }
}
