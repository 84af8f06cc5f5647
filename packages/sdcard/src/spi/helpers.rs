use bitflags::bitflags;

bitflags! {
    /// R1 response byte of an SPI-mode command.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct R1Status: u8 {
        const IDLE = 0x01;
        const ERASE_RESET = 0x02;
        const ILLEGAL_COMMAND = 0x04;
        const CRC_ERROR = 0x08;
        const ERASE_SEQUENCE_ERROR = 0x10;
        const ADDRESS_ERROR = 0x20;
        const PARAMETER_ERROR = 0x40;
    }
}

impl R1Status {
    pub fn from_response(r1: u8) -> Self {
        Self::from_bits_retain(r1)
    }

    /// Ready and without error bits.
    pub fn is_ready(self) -> bool {
        self.is_empty()
    }
}

pub(super) fn command_frame(cmd: u8, arg: u32) -> [u8; 6] {
    let mut frame = [
        0x40 | (cmd & 0x3F),
        (arg >> 24) as u8,
        (arg >> 16) as u8,
        (arg >> 8) as u8,
        arg as u8,
        0,
    ];
    frame[5] = crc7(&frame[..5]);
    frame
}

/// CRC7 over a command frame, already shifted and with the end bit set.
pub(super) fn crc7(bytes: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &byte in bytes {
        let mut data = byte;
        for _ in 0..8 {
            crc <<= 1;
            if ((data & 0x80) ^ (crc & 0x80)) != 0 {
                crc ^= 0x09;
            }
            data <<= 1;
        }
    }
    (crc << 1) | 1
}

/// Card address argument for a sector: block index on SDHC/SDXC, byte
/// offset on standard-capacity cards.
pub(super) fn sector_arg(lba: u32, high_capacity: bool) -> u32 {
    if high_capacity {
        lba
    } else {
        lba.saturating_mul(crate::SD_SECTOR_SIZE as u32)
    }
}

/// Card capacity from the CSD register. Reserved CSD structures yield `None`.
pub(super) fn decode_capacity_bytes(csd: &[u8; 16]) -> Option<u64> {
    let field = |msb: u8, lsb: u8| u64::from(csd_get_bits(csd, msb, lsb));
    match field(127, 126) {
        // Standard capacity: (C_SIZE + 1) << (C_SIZE_MULT + 2 + READ_BL_LEN).
        0 => {
            let shift = field(49, 47) + 2 + field(83, 80);
            (field(73, 62) + 1).checked_shl(shift as u32)
        }
        // High capacity: (C_SIZE + 1) units of 512 KiB.
        1 => Some((field(69, 48) + 1) << 19),
        _ => None,
    }
}

fn csd_get_bits(csd: &[u8; 16], msb: u8, lsb: u8) -> u32 {
    (lsb..=msb).rev().fold(0u32, |value, bit| {
        let byte = csd[((127 - bit) / 8) as usize];
        (value << 1) | ((byte >> (bit % 8)) & 1) as u32
    })
}
