#![cfg_attr(not(test), no_std)]

#[cfg(all(feature = "sim", not(test)))]
extern crate std;

pub mod spi;
pub mod transport;

#[cfg(feature = "esp32")]
pub mod esp32;
#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use spi::{CardInfo, SdCardVersion, SdSpiError, SpiClock, SpiTransport};
pub use transport::{BusWidth, ClockDivider, Transport};

pub const SD_SECTOR_SIZE: usize = 512;
