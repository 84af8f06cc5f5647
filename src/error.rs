use crate::ioctl::IoctlCommand;

/// Why a disk operation failed. `E` is the transport's own error type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiskError<E> {
    /// Only drive 0 exists.
    UnsupportedDrive(u8),
    /// The drive status is not clear; `initialize` has not succeeded.
    NotInitialized,
    /// Sector count outside `1..=MAX_SECTORS_PER_CALL`.
    InvalidCount(u32),
    BufferTooSmall {
        needed: usize,
        actual: usize,
    },
    /// The sector run runs past the end of the address space.
    AddressOverflow {
        lba: u32,
        count: u32,
    },
    /// Reading sector `lba` failed; earlier sectors of the run were copied.
    TransportRead {
        lba: u32,
        source: E,
    },
    /// The transport refused to start the write.
    WriteIssue(E),
    /// The write did not report completion within the poll budget.
    WriteTimeout {
        polls: u16,
    },
    /// The write completed with an error.
    WriteCompletion(E),
    UnsupportedCommand(IoctlCommand),
}

impl<E> DiskError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::WriteTimeout { .. })
    }
}

/// Binary result code handed to filesystem layers that only know OK/ERROR.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum DiskResult {
    Ok = 0,
    Error = 1,
}

impl DiskResult {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl<E> From<&Result<(), DiskError<E>>> for DiskResult {
    fn from(value: &Result<(), DiskError<E>>) -> Self {
        match value {
            Ok(()) => Self::Ok,
            Err(_) => Self::Error,
        }
    }
}

impl<E> From<Result<(), DiskError<E>>> for DiskResult {
    fn from(value: Result<(), DiskError<E>>) -> Self {
        Self::from(&value)
    }
}
