//! Block-level contract between the disk adapter and an SD card link.
//!
//! A transport owns the wire (SDIO or SPI), its clocking and the card state.
//! Reads are synchronous; writes are issued and then polled for completion.

use core::task::Poll;

/// Number of data lines used to talk to the card.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BusWidth {
    /// Single data line; the only width an SPI link has.
    #[default]
    OneBit,
    FourBit,
}

/// Transport clock divider level. Larger values mean a slower bus clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockDivider(pub u16);

impl ClockDivider {
    pub const fn new(level: u16) -> Self {
        Self(level)
    }

    pub const fn level(self) -> u16 {
        self.0
    }
}

pub trait Transport {
    type Error: core::fmt::Debug;

    /// Bring the card up using the given bus width.
    fn init(&mut self, width: BusWidth) -> Result<(), Self::Error>;

    fn set_clock_divider(&mut self, divider: ClockDivider);

    /// Read `count` consecutive sectors starting at `lba` into `buf`.
    ///
    /// `buf` holds at least `count * SD_SECTOR_SIZE` bytes.
    fn read_blocks(&mut self, buf: &mut [u8], lba: u32, count: u32) -> Result<(), Self::Error>;

    /// Start writing `count` consecutive sectors at `lba`.
    ///
    /// Returning `Ok` only means the card accepted the request; completion is
    /// observed through [`Transport::write_complete`].
    fn write_blocks_async(&mut self, buf: &[u8], lba: u32, count: u32)
        -> Result<(), Self::Error>;

    /// Poll the write started by the last [`Transport::write_blocks_async`].
    ///
    /// `Ready` carries the card's final result. With no write in flight the
    /// transport reports `Ready(Ok(()))`.
    fn write_complete(&mut self) -> Poll<Result<(), Self::Error>>;
}

impl<T> Transport for &mut T
where
    T: Transport + ?Sized,
{
    type Error = T::Error;

    fn init(&mut self, width: BusWidth) -> Result<(), Self::Error> {
        (**self).init(width)
    }

    fn set_clock_divider(&mut self, divider: ClockDivider) {
        (**self).set_clock_divider(divider)
    }

    fn read_blocks(&mut self, buf: &mut [u8], lba: u32, count: u32) -> Result<(), Self::Error> {
        (**self).read_blocks(buf, lba, count)
    }

    fn write_blocks_async(
        &mut self,
        buf: &[u8],
        lba: u32,
        count: u32,
    ) -> Result<(), Self::Error> {
        (**self).write_blocks_async(buf, lba, count)
    }

    fn write_complete(&mut self) -> Poll<Result<(), Self::Error>> {
        (**self).write_complete()
    }
}
