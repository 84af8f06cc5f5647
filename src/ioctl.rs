use embedded_hal::delay::DelayNs;
use log::debug;
use sdcard::Transport;

use crate::{disk::SdDisk, error::DiskError, SECTOR_SIZE};

/// Control requests from the filesystem layer, keyed by their FatFs codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoctlCommand {
    Sync,
    GetSectorCount,
    GetSectorSize,
    GetBlockSize,
    Other(u8),
}

impl IoctlCommand {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Sync,
            1 => Self::GetSectorCount,
            2 => Self::GetSectorSize,
            3 => Self::GetBlockSize,
            other => Self::Other(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Sync => 0,
            Self::GetSectorCount => 1,
            Self::GetSectorSize => 2,
            Self::GetBlockSize => 3,
            Self::Other(code) => code,
        }
    }
}

impl<T, D> SdDisk<T, D>
where
    T: Transport,
    D: DelayNs,
{
    /// Answer a control request. Values are written in native byte order:
    /// sector count as `u32`, sector size as `u16`.
    ///
    /// The drive index is not checked here.
    pub fn ioctl(
        &mut self,
        _drive: u8,
        command: IoctlCommand,
        buf: &mut [u8],
    ) -> Result<(), DiskError<T::Error>> {
        match command {
            IoctlCommand::Sync => Ok(()),
            IoctlCommand::GetSectorCount => {
                // Capacity is not tracked; report zero and fail.
                put_value(buf, &0u32.to_ne_bytes())?;
                Err(DiskError::UnsupportedCommand(command))
            }
            IoctlCommand::GetSectorSize => put_value(buf, &(SECTOR_SIZE as u16).to_ne_bytes()),
            IoctlCommand::GetBlockSize | IoctlCommand::Other(_) => {
                debug!("diskio: ioctl_unsupported code={}", command.code());
                Err(DiskError::UnsupportedCommand(command))
            }
        }
    }
}

fn put_value<E>(buf: &mut [u8], bytes: &[u8]) -> Result<(), DiskError<E>> {
    let actual = buf.len();
    let Some(slot) = buf.get_mut(..bytes.len()) else {
        return Err(DiskError::BufferTooSmall {
            needed: bytes.len(),
            actual,
        });
    };
    slot.copy_from_slice(bytes);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip_known_commands() {
        for code in 0..=3u8 {
            assert_eq!(IoctlCommand::from_code(code).code(), code);
        }
        assert_eq!(IoctlCommand::from_code(4), IoctlCommand::Other(4));
    }

    #[test]
    fn short_buffer_is_left_alone() {
        let mut buf = [0xAAu8; 1];
        assert_eq!(
            put_value::<()>(&mut buf, &512u16.to_ne_bytes()),
            Err(DiskError::BufferTooSmall {
                needed: 2,
                actual: 1
            })
        );
        assert_eq!(buf, [0xAA]);
    }
}
