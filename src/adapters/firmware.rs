//! Firmware staging adapters for [`FirmwarePort`].
//!
//! - [`EspOtaFirmware`] (espidf): streams into the inactive OTA partition
//!   through `esp-ota`.  The partition API is append-only, so chunks must
//!   arrive in order; the OTA session guarantees that.
//! - [`MemoryFirmware`] (host): stages into a `Vec` for simulation and tests.

use log::{info, warn};

use crate::app::ports::{FirmwareError, FirmwarePort};

// ── ESP-IDF ───────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
pub struct EspOtaFirmware {
    update: Option<esp_ota::OtaUpdate>,
    expected: u32,
    written: u32,
}

#[cfg(target_os = "espidf")]
impl Default for EspOtaFirmware {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "espidf")]
impl EspOtaFirmware {
    pub fn new() -> Self {
        Self {
            update: None,
            expected: 0,
            written: 0,
        }
    }
}

#[cfg(target_os = "espidf")]
impl FirmwarePort for EspOtaFirmware {
    fn begin(&mut self, image_size: u32) -> Result<(), FirmwareError> {
        // Dropping a previous handle aborts it.
        self.update = None;
        let update = esp_ota::OtaUpdate::begin().map_err(|e| {
            warn!("OTA: esp-ota begin failed: {:?}", e);
            FirmwareError::NoPartition
        })?;
        self.update = Some(update);
        self.expected = image_size;
        self.written = 0;
        info!("OTA: staging {} bytes", image_size);
        Ok(())
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), FirmwareError> {
        let update = self.update.as_mut().ok_or(FirmwareError::Write)?;
        if offset != self.written {
            warn!("OTA: out-of-order write at {} (expected {})", offset, self.written);
            return Err(FirmwareError::Write);
        }
        let len = u32::try_from(data.len()).map_err(|_| FirmwareError::TooLarge)?;
        if self.written.saturating_add(len) > self.expected {
            return Err(FirmwareError::TooLarge);
        }
        update.write(data).map_err(|e| {
            warn!("OTA: esp-ota write failed: {:?}", e);
            FirmwareError::Write
        })?;
        self.written += len;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), FirmwareError> {
        let update = self.update.take().ok_or(FirmwareError::Commit)?;
        let mut completed = update.finalize().map_err(|e| {
            warn!("OTA: esp-ota finalize failed: {:?}", e);
            FirmwareError::Commit
        })?;
        completed.set_as_boot_partition().map_err(|e| {
            warn!("OTA: esp-ota set_as_boot_partition failed: {:?}", e);
            FirmwareError::Commit
        })?;
        info!("OTA: {} bytes committed as next boot image", self.written);
        Ok(())
    }

    fn abort(&mut self) {
        if self.update.take().is_some() {
            info!("OTA: staged image discarded");
        }
        self.written = 0;
    }
}

// ── Host simulation ───────────────────────────────────────────

/// In-memory staging area.
#[derive(Debug, Default)]
pub struct MemoryFirmware {
    image: Vec<u8>,
    staging: bool,
    committed: Option<Vec<u8>>,
    /// Inject a write failure on the next chunk.
    pub fail_next_write: bool,
}

impl MemoryFirmware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_staging(&self) -> bool {
        self.staging
    }

    /// The image handed to the bootloader, if any.
    pub fn committed(&self) -> Option<&[u8]> {
        self.committed.as_deref()
    }
}

impl FirmwarePort for MemoryFirmware {
    fn begin(&mut self, image_size: u32) -> Result<(), FirmwareError> {
        let size = usize::try_from(image_size).map_err(|_| FirmwareError::TooLarge)?;
        self.image = vec![0; size];
        self.staging = true;
        Ok(())
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), FirmwareError> {
        if !self.staging || core::mem::take(&mut self.fail_next_write) {
            return Err(FirmwareError::Write);
        }
        let start = usize::try_from(offset).map_err(|_| FirmwareError::TooLarge)?;
        let end = start.checked_add(data.len()).ok_or(FirmwareError::TooLarge)?;
        self.image
            .get_mut(start..end)
            .ok_or(FirmwareError::TooLarge)?
            .copy_from_slice(data);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), FirmwareError> {
        if !self.staging {
            return Err(FirmwareError::Commit);
        }
        self.staging = false;
        self.committed = Some(core::mem::take(&mut self.image));
        Ok(())
    }

    fn abort(&mut self) {
        self.staging = false;
        self.image.clear();
    }
}
