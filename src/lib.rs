#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod disk;
pub mod error;
pub mod ioctl;
pub mod status;
pub mod time;

pub use config::{CompletionCheck, DiskConfig, WritePolicy};
pub use disk::{NoDelay, SdDisk};
pub use error::{DiskError, DiskResult};
pub use ioctl::IoctlCommand;
pub use sdcard::{BusWidth, ClockDivider, Transport};
pub use status::DiskStatus;
pub use time::{current_timestamp, EpochClock, FatTimestamp, TimeSource};

/// Bytes per sector; the only sector size the adapter serves.
pub const SECTOR_SIZE: usize = sdcard::SD_SECTOR_SIZE;
/// Largest sector run accepted by a single read or write.
pub const MAX_SECTORS_PER_CALL: u32 = 128;
/// The single physical drive this adapter exposes.
pub const DRIVE_INDEX: u8 = 0;
