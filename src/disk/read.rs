use embedded_hal::delay::DelayNs;
use log::warn;
use sdcard::Transport;

use super::{checked_run, SdDisk};
use crate::{error::DiskError, SECTOR_SIZE};

impl<T, D> SdDisk<T, D>
where
    T: Transport,
    D: DelayNs,
{
    /// Read `count` sectors starting at `lba` into `dest`, one sector at a
    /// time through the staging buffer.
    ///
    /// On a transport error the sectors before the failing one are already
    /// in `dest`; the failing sector and everything after it are untouched.
    pub fn read(
        &mut self,
        drive: u8,
        dest: &mut [u8],
        lba: u32,
        count: u32,
    ) -> Result<(), DiskError<T::Error>> {
        Self::check_drive(drive)?;
        // Re-applied on every read; a write in between runs on its own divider.
        self.transport.set_clock_divider(self.config.read_divider);
        self.check_ready("read")?;
        let len = checked_run(dest.len(), lba, count)?;

        for (offset, sector) in dest[..len].chunks_exact_mut(SECTOR_SIZE).enumerate() {
            let sector_lba = lba + offset as u32;
            if let Err(source) = self
                .transport
                .read_blocks(&mut self.staging, sector_lba, 1)
            {
                warn!(
                    "diskio: read_error lba={} sector={}/{} err={:?}",
                    sector_lba, offset, count, source
                );
                return Err(DiskError::TransportRead {
                    lba: sector_lba,
                    source,
                });
            }
            sector.copy_from_slice(&self.staging);
        }
        Ok(())
    }
}
