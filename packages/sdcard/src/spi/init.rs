use embedded_hal::{delay::DelayNs, digital::OutputPin, spi::SpiBus};
use log::{debug, info};

use super::{
    helpers::{decode_capacity_bytes, R1Status},
    CardInfo, SdCardVersion, SdSpiError, SpiClock, SpiTransport, ACMD41_ATTEMPTS, CMD0_ATTEMPTS,
    SD_ACMD41, SD_CMD0, SD_CMD16, SD_CMD55, SD_CMD58, SD_CMD8, SD_CMD9,
};
use crate::SD_SECTOR_SIZE;

const CMD8_CHECK_PATTERN: u32 = 0x0000_01AA;
const ACMD41_HCS: u32 = 0x4000_0000;
const OCR_CCS: u8 = 0x40;

impl<SPI, CS, D, C> SpiTransport<SPI, CS, D, C>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
    C: FnMut(&mut SPI, SpiClock),
{
    pub(super) fn power_up(&mut self) -> Result<CardInfo, SdSpiError> {
        self.card = None;
        self.pending_write = None;
        (self.clock)(&mut self.spi, SpiClock::Init);
        self.deselect()?;
        self.send_dummy_clocks(10)?;

        let mut cmd0_r1 = 0xFFu8;
        for _ in 0..CMD0_ATTEMPTS {
            cmd0_r1 = self.send_command(SD_CMD0, 0, &mut [])?;
            if cmd0_r1 == R1Status::IDLE.bits() {
                break;
            }
        }
        if cmd0_r1 != R1Status::IDLE.bits() {
            return Err(SdSpiError::Cmd0Failed(cmd0_r1));
        }

        let mut r7 = [0u8; 4];
        let cmd8_r1 = self.send_command(SD_CMD8, CMD8_CHECK_PATTERN, &mut r7)?;
        let version = if cmd8_r1 == R1Status::IDLE.bits() {
            if r7[2] != 0x01 || r7[3] != 0xAA {
                return Err(SdSpiError::Cmd8EchoMismatch(r7));
            }
            SdCardVersion::V2
        } else if R1Status::from_response(cmd8_r1).contains(R1Status::ILLEGAL_COMMAND) {
            SdCardVersion::V1
        } else {
            return Err(SdSpiError::Cmd8Unexpected(cmd8_r1));
        };

        let acmd41_arg = match version {
            SdCardVersion::V2 => ACMD41_HCS,
            SdCardVersion::V1 => 0,
        };
        let mut acmd41_r1 = 0xFFu8;
        let mut ready = false;
        for _ in 0..ACMD41_ATTEMPTS {
            let _ = self.send_command(SD_CMD55, 0, &mut [])?;
            acmd41_r1 = self.send_command(SD_ACMD41, acmd41_arg, &mut [])?;
            if R1Status::from_response(acmd41_r1).is_ready() {
                ready = true;
                break;
            }
            self.delay.delay_ms(1);
        }
        if !ready {
            return Err(SdSpiError::Acmd41Timeout(acmd41_r1));
        }

        if version == SdCardVersion::V1 {
            let cmd16_r1 = self.send_command(SD_CMD16, SD_SECTOR_SIZE as u32, &mut [])?;
            if cmd16_r1 != 0x00 {
                return Err(SdSpiError::Cmd16Unexpected(cmd16_r1));
            }
        }

        (self.clock)(&mut self.spi, SpiClock::Data);

        let mut ocr = [0u8; 4];
        let cmd58_r1 = self.send_command(SD_CMD58, 0, &mut ocr)?;
        if cmd58_r1 != 0x00 {
            return Err(SdSpiError::Cmd58Unexpected(cmd58_r1));
        }
        let high_capacity = (ocr[0] & OCR_CCS) != 0;

        let cmd9_r1 = self.send_command_hold_cs(SD_CMD9, 0, &mut [])?;
        if cmd9_r1 != 0x00 {
            self.end_transaction();
            return Err(SdSpiError::Cmd9Unexpected(cmd9_r1));
        }
        let mut csd = [0u8; 16];
        let csd_result = self.read_data_block(SD_CMD9, &mut csd);
        self.end_transaction();
        csd_result?;
        let capacity_bytes =
            decode_capacity_bytes(&csd).ok_or(SdSpiError::CapacityDecodeFailed)?;

        let card = CardInfo {
            version,
            high_capacity,
            capacity_bytes,
        };
        debug!(
            "sdspi: ocr={:02x}{:02x}{:02x}{:02x} acmd41_r1=0x{:02x}",
            ocr[0], ocr[1], ocr[2], ocr[3], acmd41_r1
        );
        info!(
            "sdspi: card_ready version={:?} high_capacity={} bytes={}",
            card.version, card.high_capacity, card.capacity_bytes
        );
        self.card = Some(card);
        Ok(card)
    }
}
