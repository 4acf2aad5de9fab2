//! Firmware update over the hub link.
//!
//! Flow: OtaBegin → N × OtaChunk → OtaComplete{sha256} → reboot
//!
//! Chunks are written straight into a staging [`FirmwarePort`] while a
//! SHA-256 runs over the received bytes.  Nothing becomes bootable until
//! the digest matches and the port commits.  Any failure inside an active
//! session aborts the staging area; the hub restarts from OtaBegin.

use core::fmt;

use hmac_sha256::Hash;
use log::{info, warn};

use crate::app::ports::{FirmwareError, FirmwarePort};
use crate::config::SystemConfig;
use crate::error::RejectReason;

const MAX_FIRMWARE_SIZE: u32 = 4 * 1024 * 1024; // 4 MB

// ── Error type ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaError {
    AlreadyInProgress,
    InvalidSize,
    NotActive,
    /// Chunk sequence number skipped or went backwards.
    SequenceGap { expected: u16, got: u16 },
    /// Chunk offset disagrees with the bytes received so far.
    OffsetMismatch,
    /// Chunk would run past the announced image size.
    Overflow,
    IncompleteTransfer,
    ChecksumMismatch,
    ChunkTimeout,
    SessionTimeout,
    Staging(FirmwareError),
}

impl OtaError {
    /// Wire reason for the `Rejected` response.
    pub fn reject_reason(self) -> RejectReason {
        match self {
            Self::AlreadyInProgress => RejectReason::OtaBusy,
            Self::InvalidSize | Self::Overflow => RejectReason::OutOfRange,
            Self::NotActive => RejectReason::OtaNotActive,
            Self::SequenceGap { .. }
            | Self::OffsetMismatch
            | Self::IncompleteTransfer
            | Self::ChunkTimeout
            | Self::SessionTimeout => RejectReason::OtaSequence,
            Self::ChecksumMismatch => RejectReason::OtaChecksum,
            Self::Staging(_) => RejectReason::Storage,
        }
    }

    /// Errors that end an active session (as opposed to refusing a
    /// request without touching it).
    pub fn aborts_session(self) -> bool {
        !matches!(self, Self::AlreadyInProgress | Self::NotActive | Self::InvalidSize)
    }
}

impl fmt::Display for OtaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyInProgress => write!(f, "OTA session already in progress"),
            Self::InvalidSize => write!(f, "image size out of range (max 4 MB)"),
            Self::NotActive => write!(f, "no OTA session active"),
            Self::SequenceGap { expected, got } => {
                write!(f, "chunk sequence gap (expected {expected}, got {got})")
            }
            Self::OffsetMismatch => write!(f, "chunk offset does not match bytes received"),
            Self::Overflow => write!(f, "chunk would exceed declared image size"),
            Self::IncompleteTransfer => write!(f, "complete received before all bytes"),
            Self::ChecksumMismatch => write!(f, "SHA-256 mismatch"),
            Self::ChunkTimeout => write!(f, "no chunk within timeout"),
            Self::SessionTimeout => write!(f, "session exceeded time limit"),
            Self::Staging(e) => write!(f, "staging: {e}"),
        }
    }
}

// ── State machine ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaState {
    Idle,
    Receiving {
        image_size: u32,
        received: u32,
        next_seq: u16,
        started_ms: u64,
        last_chunk_ms: u64,
    },
    /// Image verified and committed; waiting for the reboot.
    Committed,
}

/// Acknowledgement data for a chunk, carried in `OtaProgress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtaProgress {
    pub next_seq: u16,
    pub bytes_received: u32,
}

pub struct OtaSession {
    state: OtaState,
    hasher: Hash,
}

impl Default for OtaSession {
    fn default() -> Self {
        Self::new()
    }
}

impl OtaSession {
    pub fn new() -> Self {
        Self {
            state: OtaState::Idle,
            hasher: Hash::new(),
        }
    }

    pub fn state(&self) -> OtaState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, OtaState::Receiving { .. })
    }

    /// A verified image is staged and the device should reboot into it.
    pub fn reboot_pending(&self) -> bool {
        self.state == OtaState::Committed
    }

    /// Open a session and prepare the staging area.
    pub fn begin(
        &mut self,
        image_size: u32,
        fw: &mut impl FirmwarePort,
        now_ms: u64,
    ) -> Result<(), OtaError> {
        match self.state {
            OtaState::Receiving { .. } | OtaState::Committed => {
                return Err(OtaError::AlreadyInProgress);
            }
            OtaState::Idle => {}
        }
        if image_size == 0 || image_size > MAX_FIRMWARE_SIZE {
            return Err(OtaError::InvalidSize);
        }
        fw.begin(image_size).map_err(|e| {
            warn!("OTA: staging begin failed: {}", e);
            OtaError::Staging(e)
        })?;

        self.hasher = Hash::new();
        self.state = OtaState::Receiving {
            image_size,
            received: 0,
            next_seq: 0,
            started_ms: now_ms,
            last_chunk_ms: now_ms,
        };
        info!("OTA: begin ({} bytes)", image_size);
        Ok(())
    }

    /// Stage one chunk.
    ///
    /// A retransmission of the chunk just accepted is acknowledged again
    /// without touching the staged image or the digest.
    pub fn chunk(
        &mut self,
        seq: u16,
        offset: u32,
        data: &[u8],
        fw: &mut impl FirmwarePort,
        now_ms: u64,
    ) -> Result<OtaProgress, OtaError> {
        let OtaState::Receiving {
            image_size,
            received,
            next_seq,
            started_ms,
            ..
        } = self.state
        else {
            return Err(OtaError::NotActive);
        };

        let len = data.len() as u32;
        let progress = OtaProgress {
            next_seq,
            bytes_received: received,
        };

        if next_seq != 0 && seq == next_seq.wrapping_sub(1) && offset.checked_add(len) == Some(received) {
            info!("OTA: duplicate chunk {} ignored", seq);
            self.touch(now_ms);
            return Ok(progress);
        }

        let result = if seq != next_seq {
            Err(OtaError::SequenceGap {
                expected: next_seq,
                got: seq,
            })
        } else if offset != received {
            Err(OtaError::OffsetMismatch)
        } else if received.checked_add(len).is_none_or(|end| end > image_size) {
            Err(OtaError::Overflow)
        } else {
            fw.write(offset, data).map_err(OtaError::Staging)
        };
        if let Err(e) = result {
            self.fail(e, fw);
            return Err(e);
        }

        self.hasher.update(data);
        let received = received + len;
        let next_seq = next_seq.wrapping_add(1);
        self.state = OtaState::Receiving {
            image_size,
            received,
            next_seq,
            started_ms,
            last_chunk_ms: now_ms,
        };
        Ok(OtaProgress {
            next_seq,
            bytes_received: received,
        })
    }

    /// Verify the digest and commit the staged image.
    pub fn complete(
        &mut self,
        sha256: &[u8; 32],
        fw: &mut impl FirmwarePort,
    ) -> Result<(), OtaError> {
        let OtaState::Receiving {
            image_size,
            received,
            ..
        } = self.state
        else {
            return Err(OtaError::NotActive);
        };

        if received != image_size {
            self.fail(OtaError::IncompleteTransfer, fw);
            return Err(OtaError::IncompleteTransfer);
        }

        let digest = core::mem::replace(&mut self.hasher, Hash::new()).finalize();
        if &digest != sha256 {
            self.fail(OtaError::ChecksumMismatch, fw);
            return Err(OtaError::ChecksumMismatch);
        }

        if let Err(e) = fw.commit() {
            self.fail(OtaError::Staging(e), fw);
            return Err(OtaError::Staging(e));
        }

        self.state = OtaState::Committed;
        info!("OTA: image verified and committed ({} bytes)", received);
        Ok(())
    }

    /// Hub-requested abort.
    pub fn abort(&mut self, fw: &mut impl FirmwarePort) -> Result<(), OtaError> {
        if !self.is_active() {
            return Err(OtaError::NotActive);
        }
        fw.abort();
        self.reset();
        warn!("OTA: aborted by hub");
        Ok(())
    }

    /// Enforce the chunk and session timeouts.  Returns the error that
    /// ended the session, if any.
    pub fn check_timeouts(
        &mut self,
        now_ms: u64,
        cfg: &SystemConfig,
        fw: &mut impl FirmwarePort,
    ) -> Option<OtaError> {
        let OtaState::Receiving {
            started_ms,
            last_chunk_ms,
            ..
        } = self.state
        else {
            return None;
        };

        let err = if now_ms.saturating_sub(started_ms) > u64::from(cfg.ota_session_timeout_ms) {
            OtaError::SessionTimeout
        } else if now_ms.saturating_sub(last_chunk_ms) > u64::from(cfg.ota_chunk_timeout_ms) {
            OtaError::ChunkTimeout
        } else {
            return None;
        };
        self.fail(err, fw);
        Some(err)
    }

    fn touch(&mut self, now_ms: u64) {
        if let OtaState::Receiving { last_chunk_ms, .. } = &mut self.state {
            *last_chunk_ms = now_ms;
        }
    }

    fn fail(&mut self, err: OtaError, fw: &mut impl FirmwarePort) {
        warn!("OTA: failed: {}", err);
        fw.abort();
        self.reset();
    }

    fn reset(&mut self) {
        self.state = OtaState::Idle;
        self.hasher = Hash::new();
    }
}

// ── Reboot and boot validation ────────────────────────────────

/// Soft-reset into the newly committed firmware.
#[cfg(target_os = "espidf")]
pub fn reboot() -> ! {
    info!("OTA: rebooting into new firmware");
    esp_ota::restart();
}

/// Check OTA image state on startup and mark this firmware as valid.
///
/// Without this, the bootloader reverts to the previous firmware after
/// the new image fails to confirm itself.
#[cfg(target_os = "espidf")]
pub fn check_rollback() {
    match esp_ota::mark_app_valid() {
        Ok(()) => info!("OTA: firmware marked valid (rollback cancelled)"),
        Err(e) => warn!("OTA: mark_app_valid failed: {:?}", e),
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn check_rollback() {
    log::info!("OTA rollback check (simulation): skipped");
}

// ── Tests ─────────────────────────────────────────────────────
