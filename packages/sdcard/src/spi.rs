//! SD card in SPI mode on top of `embedded-hal` 1.0 traits.
//!
//! The bus clock is owned by the board, so rate changes are routed through a
//! hook closure instead of a HAL-specific config type.

use embedded_hal::{
    delay::DelayNs,
    digital::{ErrorKind as PinErrorKind, OutputPin},
    spi::{ErrorKind as SpiErrorKind, SpiBus},
};

use crate::transport::{BusWidth, ClockDivider};

mod helpers;
mod init;
mod io;
#[cfg(test)]
mod tests;

pub use helpers::R1Status;

const SD_CMD0: u8 = 0;
const SD_CMD8: u8 = 8;
const SD_CMD9: u8 = 9;
const SD_CMD16: u8 = 16;
const SD_CMD17: u8 = 17;
const SD_CMD24: u8 = 24;
const SD_CMD25: u8 = 25;
const SD_CMD55: u8 = 55;
const SD_ACMD41: u8 = 41;
const SD_CMD58: u8 = 58;

const TOKEN_START_BLOCK: u8 = 0xFE;
const TOKEN_START_MULTI_WRITE: u8 = 0xFC;
const TOKEN_STOP_TRAN: u8 = 0xFD;
const DATA_RESPONSE_ACCEPTED: u8 = 0x05;

const CMD0_ATTEMPTS: usize = 16;
const ACMD41_ATTEMPTS: usize = 200;
const R1_POLLS: usize = 16;
const DATA_TOKEN_POLLS: usize = 50_000;
const BUSY_POLLS: usize = 200_000;
/// Busy bytes clocked by one `write_complete` poll. About 42 ms at the
/// default write divider, so ten polls cover the 250 ms write timeout.
pub const WRITE_POLL_SLICE: usize = 4096;

/// Bus rate requested from the board.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpiClock {
    /// Identification rate (≤ 400 kHz) used until the card leaves idle.
    Init,
    /// Full data rate used for the rest of bring-up.
    Data,
    /// Rate selected by the disk layer for the next transfers.
    Divided(ClockDivider),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SdCardVersion {
    V1,
    V2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CardInfo {
    pub version: SdCardVersion,
    pub high_capacity: bool,
    pub capacity_bytes: u64,
}

impl CardInfo {
    pub fn sector_count(&self) -> u64 {
        self.capacity_bytes / crate::SD_SECTOR_SIZE as u64
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SdSpiError {
    Bus(SpiErrorKind),
    ChipSelect(PinErrorKind),
    UnsupportedBusWidth(BusWidth),
    Cmd0Failed(u8),
    Cmd8Unexpected(u8),
    Cmd8EchoMismatch([u8; 4]),
    Acmd41Timeout(u8),
    Cmd58Unexpected(u8),
    Cmd9Unexpected(u8),
    Cmd16Unexpected(u8),
    Cmd17Unexpected(u8),
    Cmd24Unexpected(u8),
    Cmd25Unexpected(u8),
    NoResponse(u8),
    DataTokenTimeout(u8),
    DataTokenUnexpected(u8, u8),
    WriteDataRejected(u8),
    WriteBusyTimeout,
    WriteInProgress,
    NotInitialized,
    CapacityDecodeFailed,
    AddressOverflow,
    BufferTooSmall { needed: usize, actual: usize },
}

fn bus_error<E: embedded_hal::spi::Error>(err: E) -> SdSpiError {
    SdSpiError::Bus(err.kind())
}

fn pin_error<E: embedded_hal::digital::Error>(err: E) -> SdSpiError {
    SdSpiError::ChipSelect(err.kind())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct PendingWrite {
    lba: u32,
    count: u32,
}

pub struct SpiTransport<SPI, CS, D, C> {
    spi: SPI,
    cs: CS,
    delay: D,
    clock: C,
    card: Option<CardInfo>,
    pending_write: Option<PendingWrite>,
    busy_slice: usize,
}

impl<SPI, CS, D, C> SpiTransport<SPI, CS, D, C>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
    C: FnMut(&mut SPI, SpiClock),
{
    pub fn new(spi: SPI, mut cs: CS, delay: D, clock: C) -> Self {
        let _ = cs.set_high();
        Self {
            spi,
            cs,
            delay,
            clock,
            card: None,
            pending_write: None,
            busy_slice: WRITE_POLL_SLICE,
        }
    }

    /// Busy bytes checked per `write_complete` call; zero behaves as one.
    pub fn with_busy_slice(mut self, bytes: usize) -> Self {
        self.busy_slice = bytes.max(1);
        self
    }

    pub fn is_initialized(&self) -> bool {
        self.card.is_some()
    }

    pub fn card_info(&self) -> Option<CardInfo> {
        self.card
    }

    /// Forget the card; the next transfer needs a fresh `init`.
    pub fn invalidate(&mut self) {
        self.card = None;
        self.pending_write = None;
    }

    pub fn release(self) -> (SPI, CS, D, C) {
        (self.spi, self.cs, self.delay, self.clock)
    }
}
