use core::task::Poll;

use embedded_hal::{delay::DelayNs, digital::OutputPin, spi::SpiBus};
use log::{debug, warn};

use super::{
    bus_error,
    helpers::{command_frame, sector_arg},
    pin_error, PendingWrite, SdSpiError, SpiClock, SpiTransport, BUSY_POLLS,
    DATA_RESPONSE_ACCEPTED, DATA_TOKEN_POLLS, R1_POLLS, SD_CMD17, SD_CMD24, SD_CMD25,
    TOKEN_START_BLOCK, TOKEN_START_MULTI_WRITE, TOKEN_STOP_TRAN,
};
use crate::{
    transport::{BusWidth, ClockDivider, Transport},
    SD_SECTOR_SIZE,
};

impl<SPI, CS, D, C> Transport for SpiTransport<SPI, CS, D, C>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
    C: FnMut(&mut SPI, SpiClock),
{
    type Error = SdSpiError;

    fn init(&mut self, width: BusWidth) -> Result<(), SdSpiError> {
        // SPI mode has a single data line.
        if width != BusWidth::OneBit {
            return Err(SdSpiError::UnsupportedBusWidth(width));
        }
        self.power_up().map(|_| ())
    }

    fn set_clock_divider(&mut self, divider: ClockDivider) {
        (self.clock)(&mut self.spi, SpiClock::Divided(divider));
    }

    fn read_blocks(&mut self, buf: &mut [u8], lba: u32, count: u32) -> Result<(), SdSpiError> {
        let high_capacity = self.card.ok_or(SdSpiError::NotInitialized)?.high_capacity;
        let needed = checked_len(buf.len(), count)?;
        self.drain_pending_write()?;

        for (offset, sector) in buf[..needed]
            .chunks_exact_mut(SD_SECTOR_SIZE)
            .enumerate()
        {
            let sector_lba = lba
                .checked_add(offset as u32)
                .ok_or(SdSpiError::AddressOverflow)?;
            self.read_sector_into(sector_lba, high_capacity, sector)?;
        }
        Ok(())
    }

    fn write_blocks_async(&mut self, buf: &[u8], lba: u32, count: u32) -> Result<(), SdSpiError> {
        let high_capacity = self.card.ok_or(SdSpiError::NotInitialized)?.high_capacity;
        let needed = checked_len(buf.len(), count)?;
        if count == 0 {
            return Ok(());
        }
        lba.checked_add(count - 1)
            .ok_or(SdSpiError::AddressOverflow)?;
        self.drain_pending_write()?;

        let data = &buf[..needed];
        let arg = sector_arg(lba, high_capacity);
        if count == 1 {
            let r1 = self.send_command_hold_cs(SD_CMD24, arg, &mut [])?;
            if r1 != 0x00 {
                self.end_transaction();
                return Err(SdSpiError::Cmd24Unexpected(r1));
            }
            if let Err(err) = self.send_data_block(TOKEN_START_BLOCK, data) {
                self.end_transaction();
                return Err(err);
            }
        } else {
            let r1 = self.send_command_hold_cs(SD_CMD25, arg, &mut [])?;
            if r1 != 0x00 {
                self.end_transaction();
                return Err(SdSpiError::Cmd25Unexpected(r1));
            }
            if let Err(err) = self.send_multi_blocks(data) {
                self.end_transaction();
                return Err(err);
            }
        }

        // The card stays selected while it signals busy; write_complete
        // releases it.
        self.pending_write = Some(PendingWrite { lba, count });
        Ok(())
    }

    fn write_complete(&mut self) -> Poll<Result<(), SdSpiError>> {
        let Some(pending) = self.pending_write else {
            return Poll::Ready(Ok(()));
        };
        for _ in 0..self.busy_slice {
            match self.transfer_byte(0xFF) {
                Ok(0xFF) => {
                    self.pending_write = None;
                    self.end_transaction();
                    debug!(
                        "sdspi: write_done lba={} count={}",
                        pending.lba, pending.count
                    );
                    return Poll::Ready(Ok(()));
                }
                Ok(_) => {}
                Err(err) => {
                    self.pending_write = None;
                    self.end_transaction();
                    return Poll::Ready(Err(err));
                }
            }
        }
        Poll::Pending
    }
}

fn checked_len(actual: usize, count: u32) -> Result<usize, SdSpiError> {
    let needed = (count as usize).saturating_mul(SD_SECTOR_SIZE);
    if actual < needed {
        return Err(SdSpiError::BufferTooSmall { needed, actual });
    }
    Ok(needed)
}

impl<SPI, CS, D, C> SpiTransport<SPI, CS, D, C>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
    C: FnMut(&mut SPI, SpiClock),
{
    /// Block until a write left busy by `write_blocks_async` has finished.
    fn drain_pending_write(&mut self) -> Result<(), SdSpiError> {
        let Some(pending) = self.pending_write else {
            return Ok(());
        };
        match self.wait_not_busy() {
            Ok(()) => {
                self.pending_write = None;
                self.end_transaction();
                Ok(())
            }
            Err(SdSpiError::WriteBusyTimeout) => {
                warn!(
                    "sdspi: write_still_busy lba={} count={}",
                    pending.lba, pending.count
                );
                Err(SdSpiError::WriteInProgress)
            }
            Err(err) => {
                self.pending_write = None;
                self.end_transaction();
                Err(err)
            }
        }
    }

    fn read_sector_into(
        &mut self,
        lba: u32,
        high_capacity: bool,
        out: &mut [u8],
    ) -> Result<(), SdSpiError> {
        let r1 = self.send_command_hold_cs(SD_CMD17, sector_arg(lba, high_capacity), &mut [])?;
        if r1 != 0x00 {
            self.end_transaction();
            return Err(SdSpiError::Cmd17Unexpected(r1));
        }
        let result = self.read_data_block(SD_CMD17, out);
        self.end_transaction();
        result
    }

    fn send_multi_blocks(&mut self, data: &[u8]) -> Result<(), SdSpiError> {
        for (idx, block) in data.chunks_exact(SD_SECTOR_SIZE).enumerate() {
            let sent = self
                .send_data_block(TOKEN_START_MULTI_WRITE, block)
                .and_then(|()| self.wait_not_busy());
            if let Err(err) = sent {
                warn!("sdspi: multi_write_abort block={} err={:?}", idx, err);
                // Close the CMD25 transfer before the caller deselects.
                if self.stop_multi_write().is_ok() {
                    let _ = self.wait_not_busy();
                }
                return Err(err);
            }
        }
        self.stop_multi_write()
    }

    fn stop_multi_write(&mut self) -> Result<(), SdSpiError> {
        let _ = self.transfer_byte(TOKEN_STOP_TRAN)?;
        // One stuff byte before the card raises busy.
        let _ = self.transfer_byte(0xFF)?;
        Ok(())
    }

    fn send_data_block(&mut self, token: u8, block: &[u8]) -> Result<(), SdSpiError> {
        let _ = self.transfer_byte(0xFF)?;
        let _ = self.transfer_byte(token)?;
        self.spi.write(block).map_err(bus_error)?;
        // Data CRC16 is ignored in SPI mode unless CRC is explicitly enabled.
        let _ = self.transfer_byte(0xFF)?;
        let _ = self.transfer_byte(0xFF)?;

        let response = self.transfer_byte(0xFF)? & 0x1F;
        if response != DATA_RESPONSE_ACCEPTED {
            return Err(SdSpiError::WriteDataRejected(response));
        }
        Ok(())
    }

    fn wait_not_busy(&mut self) -> Result<(), SdSpiError> {
        for _ in 0..BUSY_POLLS {
            if self.transfer_byte(0xFF)? == 0xFF {
                return Ok(());
            }
        }
        Err(SdSpiError::WriteBusyTimeout)
    }

    pub(super) fn send_command(
        &mut self,
        cmd: u8,
        arg: u32,
        extra_response: &mut [u8],
    ) -> Result<u8, SdSpiError> {
        self.send_command_inner(cmd, arg, extra_response, true)
    }

    pub(super) fn send_command_hold_cs(
        &mut self,
        cmd: u8,
        arg: u32,
        extra_response: &mut [u8],
    ) -> Result<u8, SdSpiError> {
        self.send_command_inner(cmd, arg, extra_response, false)
    }

    fn send_command_inner(
        &mut self,
        cmd: u8,
        arg: u32,
        extra_response: &mut [u8],
        release_cs_after: bool,
    ) -> Result<u8, SdSpiError> {
        self.cs.set_low().map_err(pin_error)?;
        let result = self.exchange_command(cmd, arg, extra_response);
        if result.is_err() || release_cs_after {
            self.end_transaction();
        }
        result
    }

    /// Clock out a command frame and collect R1 plus any trailing response
    /// bytes. The card must already be selected.
    fn exchange_command(
        &mut self,
        cmd: u8,
        arg: u32,
        extra_response: &mut [u8],
    ) -> Result<u8, SdSpiError> {
        self.spi.write(&command_frame(cmd, arg)).map_err(bus_error)?;

        let mut r1 = None;
        for _ in 0..R1_POLLS {
            let byte = self.transfer_byte(0xFF)?;
            if (byte & 0x80) == 0 {
                r1 = Some(byte);
                break;
            }
        }
        let r1 = r1.ok_or(SdSpiError::NoResponse(cmd))?;

        for slot in extra_response {
            *slot = self.transfer_byte(0xFF)?;
        }
        Ok(r1)
    }

    pub(super) fn send_dummy_clocks(&mut self, bytes: usize) -> Result<(), SdSpiError> {
        for _ in 0..bytes {
            let _ = self.transfer_byte(0xFF)?;
        }
        Ok(())
    }

    pub(super) fn deselect(&mut self) -> Result<(), SdSpiError> {
        self.cs.set_high().map_err(pin_error)
    }

    fn transfer_byte(&mut self, byte: u8) -> Result<u8, SdSpiError> {
        let mut frame = [byte];
        self.spi.transfer_in_place(&mut frame).map_err(bus_error)?;
        Ok(frame[0])
    }

    /// Wait for the start token and clock in one data block plus its CRC.
    pub(super) fn read_data_block(&mut self, cmd: u8, out: &mut [u8]) -> Result<(), SdSpiError> {
        let mut token = 0xFFu8;
        let mut got_token = false;
        for _ in 0..DATA_TOKEN_POLLS {
            token = self.transfer_byte(0xFF)?;
            if token != 0xFF {
                got_token = true;
                break;
            }
        }
        if !got_token {
            return Err(SdSpiError::DataTokenTimeout(cmd));
        }
        if token != TOKEN_START_BLOCK {
            return Err(SdSpiError::DataTokenUnexpected(cmd, token));
        }

        out.fill(0xFF);
        self.spi.transfer_in_place(out).map_err(bus_error)?;
        // Read and discard CRC16.
        let _ = self.transfer_byte(0xFF)?;
        let _ = self.transfer_byte(0xFF)?;
        Ok(())
    }

    pub(super) fn end_transaction(&mut self) {
        let _ = self.spi.flush();
        let _ = self.cs.set_high();
        let _ = self.transfer_byte(0xFF);
    }
}
