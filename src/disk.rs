//! Disk handle binding the filesystem-facing calls to one SD transport.
//!
//! The handle owns the drive status. Only `initialize` writes it; reads and
//! writes are refused until it is clear. All calls block until the transport
//! has answered, failed, or the write poll budget ran out.

use embedded_hal::delay::DelayNs;
use log::{info, warn};
use sdcard::Transport;

use crate::{
    config::DiskConfig, error::DiskError, status::DiskStatus, DRIVE_INDEX, MAX_SECTORS_PER_CALL,
    SECTOR_SIZE,
};

mod read;
mod write;

/// Delay that returns immediately; write polls run back to back.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoDelay;

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

pub struct SdDisk<T, D = NoDelay> {
    transport: T,
    delay: D,
    config: DiskConfig,
    status: DiskStatus,
    staging: [u8; SECTOR_SIZE],
}

impl<T> SdDisk<T, NoDelay>
where
    T: Transport,
{
    pub fn new(transport: T, config: DiskConfig) -> Self {
        Self::with_delay(transport, NoDelay, config)
    }
}

impl<T, D> SdDisk<T, D>
where
    T: Transport,
    D: DelayNs,
{
    pub fn with_delay(transport: T, delay: D, config: DiskConfig) -> Self {
        Self {
            transport,
            delay,
            config,
            status: DiskStatus::NOT_INITIALIZED,
            staging: [0; SECTOR_SIZE],
        }
    }

    pub fn config(&self) -> &DiskConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_parts(self) -> (T, D) {
        (self.transport, self.delay)
    }

    pub fn status(&self, drive: u8) -> DiskStatus {
        if drive != DRIVE_INDEX {
            return DiskStatus::NOT_INITIALIZED;
        }
        self.status
    }

    /// Run transport bring-up. Every call re-initializes the card and
    /// re-applies the read divider.
    pub fn initialize(&mut self, drive: u8) -> DiskStatus {
        if drive != DRIVE_INDEX {
            return DiskStatus::NOT_INITIALIZED;
        }

        match self.transport.init(self.config.bus_width) {
            Ok(()) => {
                self.transport.set_clock_divider(self.config.read_divider);
                self.status.remove(DiskStatus::NOT_INITIALIZED);
                info!(
                    "diskio: init_ok width={:?} status=0x{:02x}",
                    self.config.bus_width,
                    self.status.bits()
                );
            }
            Err(err) => {
                self.status = DiskStatus::NOT_INITIALIZED;
                warn!(
                    "diskio: init_error width={:?} err={:?}",
                    self.config.bus_width, err
                );
            }
        }
        self.status
    }

    fn check_drive(drive: u8) -> Result<(), DiskError<T::Error>> {
        if drive != DRIVE_INDEX {
            return Err(DiskError::UnsupportedDrive(drive));
        }
        Ok(())
    }

    fn check_ready(&self, op: &str) -> Result<(), DiskError<T::Error>> {
        if !self.status.is_ready() {
            warn!(
                "diskio: {} refused status=0x{:02x}",
                op,
                self.status.bits()
            );
            return Err(DiskError::NotInitialized);
        }
        Ok(())
    }
}

/// Validate a sector run against its buffer and return the byte length it
/// covers.
fn checked_run<E>(buf_len: usize, lba: u32, count: u32) -> Result<usize, DiskError<E>> {
    if count == 0 || count > MAX_SECTORS_PER_CALL {
        return Err(DiskError::InvalidCount(count));
    }
    if lba.checked_add(count - 1).is_none() {
        return Err(DiskError::AddressOverflow { lba, count });
    }
    let needed = count as usize * SECTOR_SIZE;
    if buf_len < needed {
        return Err(DiskError::BufferTooSmall {
            needed,
            actual: buf_len,
        });
    }
    Ok(needed)
}
