//! Byte-level SD card model answering SPI-mode commands, for host tests of
//! code built on [`SpiTransport`](crate::SpiTransport).

use core::{cell::RefCell, convert::Infallible};
use std::{
    collections::{BTreeMap, VecDeque},
    rc::Rc,
    vec,
    vec::Vec,
};

use embedded_hal::{
    delay::DelayNs,
    digital,
    spi::{self, ErrorKind},
};

use crate::{
    spi::{R1Status, SpiClock, SpiTransport},
    SD_SECTOR_SIZE,
};

/// CSD v2.0 register of an 8 GB SDHC card.
pub const CSD_V2_8GB: [u8; 16] = [
    0x40, 0x0E, 0x00, 0x32, 0x5B, 0x59, 0x00, 0x00, 0x3B, 0x37, 0x7F, 0x80, 0x0A, 0x40, 0x00,
    0x01,
];
pub const CSD_V2_8GB_BYTES: u64 = (0x3B37 + 1) * 512 * 1024;

/// Content of a sector that was never written.
pub fn sector_pattern(lba: u32) -> [u8; SD_SECTOR_SIZE] {
    core::array::from_fn(|i| (lba as u8).wrapping_mul(7).wrapping_add(i as u8))
}

enum Phase {
    Idle,
    Command(Vec<u8>),
    AwaitToken { multi: bool, lba: u32 },
    Receiving { multi: bool, lba: u32, data: Vec<u8> },
}

pub struct SimCard {
    pub v1: bool,
    pub high_capacity: bool,
    pub acmd41_busy_rounds: u32,
    pub sectors: BTreeMap<u32, [u8; SD_SECTOR_SIZE]>,
    pub failing_reads: Vec<u32>,
    pub rejected_writes: Vec<u32>,
    /// Busy bytes after a single-block write or a multi-block stop token.
    pub write_busy_polls: usize,
    /// Every bus call fails while set.
    pub bus_fault: bool,
    /// Chip-select asserted.
    pub selected: bool,
    pub stop_tokens: usize,
    pub commands: Vec<(u8, u32)>,
    ready: bool,
    app_cmd: bool,
    out: VecDeque<u8>,
    busy: usize,
    phase: Phase,
}

pub type SharedCard = Rc<RefCell<SimCard>>;

impl SimCard {
    pub fn sdhc() -> Self {
        Self {
            v1: false,
            high_capacity: true,
            acmd41_busy_rounds: 2,
            sectors: BTreeMap::new(),
            failing_reads: Vec::new(),
            rejected_writes: Vec::new(),
            write_busy_polls: 3,
            bus_fault: false,
            selected: false,
            stop_tokens: 0,
            commands: Vec::new(),
            ready: false,
            app_cmd: false,
            out: VecDeque::new(),
            busy: 0,
            phase: Phase::Idle,
        }
    }

    pub fn sdsc_v1() -> Self {
        Self {
            v1: true,
            high_capacity: false,
            ..Self::sdhc()
        }
    }

    pub fn shared(self) -> SharedCard {
        Rc::new(RefCell::new(self))
    }

    pub fn sector(&self, lba: u32) -> [u8; SD_SECTOR_SIZE] {
        self.sectors
            .get(&lba)
            .copied()
            .unwrap_or_else(|| sector_pattern(lba))
    }

    pub fn command_ids(&self) -> Vec<u8> {
        self.commands.iter().map(|(cmd, _)| *cmd).collect()
    }

    fn lba_from_arg(&self, arg: u32) -> u32 {
        if self.high_capacity {
            arg
        } else {
            arg / SD_SECTOR_SIZE as u32
        }
    }

    fn exchange(&mut self, byte: u8) -> u8 {
        let reply = if let Some(next) = self.out.pop_front() {
            next
        } else if self.busy > 0 {
            self.busy -= 1;
            0x00
        } else {
            0xFF
        };
        self.consume(byte);
        reply
    }

    fn consume(&mut self, byte: u8) {
        let phase = core::mem::replace(&mut self.phase, Phase::Idle);
        self.phase = match phase {
            Phase::Idle if byte & 0xC0 == 0x40 => Phase::Command(vec![byte]),
            Phase::Idle => Phase::Idle,
            Phase::Command(mut frame) => {
                frame.push(byte);
                if frame.len() == 6 {
                    self.handle_command(&frame)
                } else {
                    Phase::Command(frame)
                }
            }
            Phase::AwaitToken { multi, lba } => match byte {
                0xFE if !multi => Phase::Receiving {
                    multi,
                    lba,
                    data: Vec::new(),
                },
                0xFC if multi => Phase::Receiving {
                    multi,
                    lba,
                    data: Vec::new(),
                },
                0xFD if multi => {
                    self.stop_tokens += 1;
                    self.busy = self.write_busy_polls;
                    Phase::Idle
                }
                _ => Phase::AwaitToken { multi, lba },
            },
            Phase::Receiving {
                multi,
                lba,
                mut data,
            } => {
                data.push(byte);
                if data.len() < SD_SECTOR_SIZE + 2 {
                    Phase::Receiving { multi, lba, data }
                } else if self.rejected_writes.contains(&lba) {
                    // Write error data response; a multi-block transfer
                    // waits for the stop token.
                    self.out.push_back(0xED);
                    if multi {
                        Phase::AwaitToken { multi, lba }
                    } else {
                        Phase::Idle
                    }
                } else {
                    let mut sector = [0u8; SD_SECTOR_SIZE];
                    sector.copy_from_slice(&data[..SD_SECTOR_SIZE]);
                    self.sectors.insert(lba, sector);
                    self.out.push_back(0xE5);
                    if multi {
                        self.busy = 2;
                        Phase::AwaitToken {
                            multi,
                            lba: lba + 1,
                        }
                    } else {
                        self.busy = self.write_busy_polls;
                        Phase::Idle
                    }
                }
            }
        };
    }

    fn handle_command(&mut self, frame: &[u8]) -> Phase {
        let cmd = frame[0] & 0x3F;
        let arg = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]);
        self.commands.push((cmd, arg));
        let app_cmd = core::mem::take(&mut self.app_cmd);
        let idle_r1 = if self.ready { 0x00 } else { 0x01 };

        // NCR gap before the response.
        self.out.push_back(0xFF);
        match cmd {
            0 if frame[5] != 0x95 => self.out.push_back(R1Status::CRC_ERROR.bits()),
            0 => {
                self.ready = false;
                self.out.push_back(0x01);
            }
            8 if self.v1 => self.out.push_back(0x05),
            8 => self.out.extend([0x01, 0x00, 0x00, 0x01, 0xAA]),
            55 => {
                self.app_cmd = true;
                self.out.push_back(idle_r1);
            }
            41 if app_cmd => {
                if self.acmd41_busy_rounds > 0 {
                    self.acmd41_busy_rounds -= 1;
                    self.out.push_back(0x01);
                } else {
                    self.ready = true;
                    self.out.push_back(0x00);
                }
            }
            16 => self.out.push_back(0x00),
            58 => {
                let ocr0 = if self.high_capacity { 0xC0 } else { 0x80 };
                self.out.extend([0x00, ocr0, 0xFF, 0x80, 0x00]);
            }
            9 => {
                self.out.extend([0x00, 0xFF, 0xFE]);
                self.out.extend(CSD_V2_8GB);
                self.out.extend([0xFF, 0xFF]);
            }
            17 => {
                let lba = self.lba_from_arg(arg);
                if self.failing_reads.contains(&lba) {
                    self.out.push_back(R1Status::ADDRESS_ERROR.bits());
                } else {
                    let sector = self.sector(lba);
                    self.out.extend([0x00, 0xFF, 0xFE]);
                    self.out.extend(sector);
                    self.out.extend([0xFF, 0xFF]);
                }
            }
            24 | 25 => {
                self.out.push_back(0x00);
                return Phase::AwaitToken {
                    multi: cmd == 25,
                    lba: self.lba_from_arg(arg),
                };
            }
            _ => self.out.push_back(R1Status::ILLEGAL_COMMAND.bits()),
        }
        Phase::Idle
    }
}

#[derive(Clone)]
pub struct SimSpi(pub SharedCard);

impl SimSpi {
    fn card(&self) -> Result<core::cell::RefMut<'_, SimCard>, ErrorKind> {
        let card = self.0.borrow_mut();
        if card.bus_fault {
            return Err(ErrorKind::Other);
        }
        Ok(card)
    }
}

impl spi::ErrorType for SimSpi {
    type Error = ErrorKind;
}

impl spi::SpiBus for SimSpi {
    fn read(&mut self, words: &mut [u8]) -> Result<(), ErrorKind> {
        let mut card = self.card()?;
        for word in words {
            *word = card.exchange(0xFF);
        }
        Ok(())
    }

    fn write(&mut self, words: &[u8]) -> Result<(), ErrorKind> {
        let mut card = self.card()?;
        for &word in words {
            let _ = card.exchange(word);
        }
        Ok(())
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), ErrorKind> {
        let mut card = self.card()?;
        let len = read.len().max(write.len());
        for idx in 0..len {
            let reply = card.exchange(write.get(idx).copied().unwrap_or(0xFF));
            if let Some(slot) = read.get_mut(idx) {
                *slot = reply;
            }
        }
        Ok(())
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), ErrorKind> {
        let mut card = self.card()?;
        for word in words {
            *word = card.exchange(*word);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ErrorKind> {
        Ok(())
    }
}

pub struct SimCs(pub SharedCard);

impl digital::ErrorType for SimCs {
    type Error = Infallible;
}

impl digital::OutputPin for SimCs {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.0.borrow_mut().selected = true;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.0.borrow_mut().selected = false;
        Ok(())
    }
}

pub type SimClockHook = fn(&mut SimSpi, SpiClock);

pub type SimTransport<D> = SpiTransport<SimSpi, SimCs, D, SimClockHook>;

fn ignore_clock(_: &mut SimSpi, _: SpiClock) {}

/// SPI transport wired to `card`, with a clock hook that does nothing.
pub fn transport<D: DelayNs>(card: &SharedCard, delay: D) -> SimTransport<D> {
    SpiTransport::new(
        SimSpi(card.clone()),
        SimCs(card.clone()),
        delay,
        ignore_clock as SimClockHook,
    )
}
