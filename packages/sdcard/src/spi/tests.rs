use core::{cell::RefCell, task::Poll};
use std::{rc::Rc, vec, vec::Vec};

use embedded_hal::{delay::DelayNs, spi::ErrorKind};

use super::{
    helpers::{command_frame, crc7, decode_capacity_bytes},
    CardInfo, R1Status, SdCardVersion, SdSpiError, SpiClock, SpiTransport,
};
use crate::{
    sim::{sector_pattern, SharedCard, SimCard, SimCs, SimSpi, CSD_V2_8GB, CSD_V2_8GB_BYTES},
    transport::{BusWidth, ClockDivider, Transport},
    SD_SECTOR_SIZE,
};

#[derive(Default)]
struct CountingDelay {
    total_ns: u64,
}

impl DelayNs for CountingDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ns += ns as u64;
    }
}

type TestTransport =
    SpiTransport<SimSpi, SimCs, CountingDelay, std::boxed::Box<dyn FnMut(&mut SimSpi, SpiClock)>>;

struct Rig {
    card: SharedCard,
    clocks: Rc<RefCell<Vec<SpiClock>>>,
    transport: TestTransport,
}

fn rig(card: SimCard) -> Rig {
    let card = card.shared();
    let clocks = Rc::new(RefCell::new(Vec::new()));
    let hook_clocks = clocks.clone();
    let hook: std::boxed::Box<dyn FnMut(&mut SimSpi, SpiClock)> =
        std::boxed::Box::new(move |_: &mut SimSpi, clock: SpiClock| {
            hook_clocks.borrow_mut().push(clock)
        });
    let transport = SpiTransport::new(
        SimSpi(card.clone()),
        SimCs(card.clone()),
        CountingDelay::default(),
        hook,
    );
    Rig {
        card,
        clocks,
        transport,
    }
}

fn ready_rig(card: SimCard) -> Rig {
    let mut rig = rig(card);
    rig.transport.init(BusWidth::OneBit).unwrap();
    rig.card.borrow_mut().commands.clear();
    rig
}

fn poll_write_done(transport: &mut TestTransport) -> usize {
    let mut pending = 0;
    loop {
        match transport.write_complete() {
            Poll::Ready(result) => {
                result.unwrap();
                return pending;
            }
            Poll::Pending => {
                pending += 1;
                assert!(pending < 32, "write never completed");
            }
        }
    }
}

#[test]
fn command_frames_carry_known_crc7() {
    assert_eq!(command_frame(0, 0), [0x40, 0, 0, 0, 0, 0x95]);
    assert_eq!(command_frame(8, 0x1AA), [0x48, 0, 0, 0x01, 0xAA, 0x87]);
    assert_eq!(command_frame(58, 0)[5], 0xFD);
    assert_eq!(command_frame(9, 0)[5], 0xAF);
    assert_eq!(crc7(&[0x77, 0, 0, 0, 0]), 0x65);
}

#[test]
fn capacity_decodes_from_csd_v2() {
    assert_eq!(decode_capacity_bytes(&CSD_V2_8GB), Some(CSD_V2_8GB_BYTES));

    let mut reserved = CSD_V2_8GB;
    reserved[0] = 0xC0;
    assert_eq!(decode_capacity_bytes(&reserved), None);
}

#[test]
fn r1_status_splits_idle_from_errors() {
    assert!(R1Status::from_response(0x00).is_ready());
    assert!(!R1Status::from_response(0x01).is_ready());
    let r1 = R1Status::from_response(0x05);
    assert!(r1.contains(R1Status::IDLE | R1Status::ILLEGAL_COMMAND));
}

#[test]
fn init_brings_up_high_capacity_card() {
    let mut rig = rig(SimCard::sdhc());

    rig.transport.init(BusWidth::OneBit).unwrap();

    assert_eq!(
        rig.transport.card_info(),
        Some(CardInfo {
            version: SdCardVersion::V2,
            high_capacity: true,
            capacity_bytes: CSD_V2_8GB_BYTES,
        })
    );
    assert_eq!(
        rig.card.borrow().command_ids(),
        vec![0, 8, 55, 41, 55, 41, 55, 41, 58, 9]
    );
    assert_eq!(*rig.clocks.borrow(), vec![SpiClock::Init, SpiClock::Data]);
    let (_, _, delay, _) = rig.transport.release();
    assert_eq!(delay.total_ns, 2_000_000);
}

#[test]
fn v1_card_uses_byte_addresses() {
    let mut rig = rig(SimCard::sdsc_v1());
    rig.transport.init(BusWidth::OneBit).unwrap();
    let info = rig.transport.card_info().unwrap();
    assert_eq!(info.version, SdCardVersion::V1);
    assert!(!info.high_capacity);
    assert!(rig.card.borrow().command_ids().contains(&16));

    let mut buf = [0u8; SD_SECTOR_SIZE];
    rig.transport.read_blocks(&mut buf, 3, 1).unwrap();

    assert_eq!(buf, sector_pattern(3));
    assert_eq!(rig.card.borrow().commands.last(), Some(&(17, 3 * 512)));
}

#[test]
fn four_bit_mode_is_refused_without_bus_traffic() {
    let mut rig = rig(SimCard::sdhc());

    assert_eq!(
        rig.transport.init(BusWidth::FourBit),
        Err(SdSpiError::UnsupportedBusWidth(BusWidth::FourBit))
    );
    assert!(rig.card.borrow().commands.is_empty());
    assert!(!rig.transport.is_initialized());
}

#[test]
fn transfers_require_init() {
    let mut rig = rig(SimCard::sdhc());
    let mut buf = [0u8; SD_SECTOR_SIZE];

    assert_eq!(
        rig.transport.read_blocks(&mut buf, 0, 1),
        Err(SdSpiError::NotInitialized)
    );
    assert_eq!(
        rig.transport.write_blocks_async(&buf, 0, 1),
        Err(SdSpiError::NotInitialized)
    );
}

#[test]
fn read_blocks_walks_consecutive_sectors() {
    let mut rig = ready_rig(SimCard::sdhc());
    let mut buf = [0u8; SD_SECTOR_SIZE * 3];

    rig.transport.read_blocks(&mut buf, 40, 3).unwrap();

    for (idx, sector) in buf.chunks_exact(SD_SECTOR_SIZE).enumerate() {
        assert_eq!(sector, &sector_pattern(40 + idx as u32)[..]);
    }
    assert_eq!(
        rig.card.borrow().commands,
        vec![(17, 40), (17, 41), (17, 42)]
    );
}

#[test]
fn read_blocks_checks_buffer_length() {
    let mut rig = ready_rig(SimCard::sdhc());
    let mut buf = [0u8; SD_SECTOR_SIZE];

    assert_eq!(
        rig.transport.read_blocks(&mut buf, 0, 2),
        Err(SdSpiError::BufferTooSmall {
            needed: 2 * SD_SECTOR_SIZE,
            actual: SD_SECTOR_SIZE,
        })
    );
}

#[test]
fn read_error_reports_r1() {
    let mut card = SimCard::sdhc();
    card.failing_reads.push(7);
    let mut rig = ready_rig(card);
    let mut buf = [0u8; SD_SECTOR_SIZE * 2];

    assert_eq!(
        rig.transport.read_blocks(&mut buf, 6, 2),
        Err(SdSpiError::Cmd17Unexpected(0x20))
    );
    assert_eq!(&buf[..SD_SECTOR_SIZE], &sector_pattern(6)[..]);
}

#[test]
fn short_busy_completes_on_first_poll() {
    let mut rig = ready_rig(SimCard::sdhc());
    let data = [0xA5u8; SD_SECTOR_SIZE];

    rig.transport.write_blocks_async(&data, 9, 1).unwrap();

    assert_eq!(poll_write_done(&mut rig.transport), 0);
    assert_eq!(rig.card.borrow().sector(9), data);
    assert_eq!(rig.card.borrow().commands, vec![(24, 9)]);
    assert_eq!(rig.transport.write_complete(), Poll::Ready(Ok(())));
}

#[test]
fn multi_block_write_uses_one_command() {
    let mut rig = ready_rig(SimCard::sdhc());
    let mut data = [0u8; SD_SECTOR_SIZE * 3];
    for (idx, sector) in data.chunks_exact_mut(SD_SECTOR_SIZE).enumerate() {
        sector.fill(idx as u8 + 1);
    }

    rig.transport.write_blocks_async(&data, 100, 3).unwrap();
    poll_write_done(&mut rig.transport);

    let card = rig.card.borrow();
    assert_eq!(card.commands, vec![(25, 100)]);
    assert_eq!(card.sector(100), [1u8; SD_SECTOR_SIZE]);
    assert_eq!(card.sector(101), [2u8; SD_SECTOR_SIZE]);
    assert_eq!(card.sector(102), [3u8; SD_SECTOR_SIZE]);
}

#[test]
fn rejected_data_is_reported() {
    let mut card = SimCard::sdhc();
    card.rejected_writes.push(5);
    let mut rig = ready_rig(card);
    let data = [0u8; SD_SECTOR_SIZE];

    assert_eq!(
        rig.transport.write_blocks_async(&data, 5, 1),
        Err(SdSpiError::WriteDataRejected(0x0D))
    );
    assert_eq!(rig.transport.write_complete(), Poll::Ready(Ok(())));
}

#[test]
fn next_command_drains_pending_write() {
    let mut rig = ready_rig(SimCard::sdhc());
    let data = [0x3Cu8; SD_SECTOR_SIZE];
    rig.transport.write_blocks_async(&data, 12, 1).unwrap();

    let mut buf = [0u8; SD_SECTOR_SIZE];
    rig.transport.read_blocks(&mut buf, 12, 1).unwrap();

    assert_eq!(buf, data);
    assert_eq!(rig.transport.write_complete(), Poll::Ready(Ok(())));
}

#[test]
fn clock_divider_goes_through_hook() {
    let mut rig = rig(SimCard::sdhc());

    rig.transport.set_clock_divider(ClockDivider::new(30));

    assert_eq!(
        *rig.clocks.borrow(),
        vec![SpiClock::Divided(ClockDivider(30))]
    );
    assert!(rig.card.borrow().commands.is_empty());
}

#[test]
fn each_poll_covers_one_busy_slice() {
    let mut card = SimCard::sdhc();
    card.write_busy_polls = 11;
    let mut rig = ready_rig(card);
    rig.transport = rig.transport.with_busy_slice(4);
    let data = [0x42u8; SD_SECTOR_SIZE];

    rig.transport.write_blocks_async(&data, 9, 1).unwrap();

    assert_eq!(poll_write_done(&mut rig.transport), 2);
    assert_eq!(rig.card.borrow().sector(9), data);
}

#[test]
fn default_slice_outlasts_long_busy() {
    let mut card = SimCard::sdhc();
    card.write_busy_polls = 20_000;
    let mut rig = ready_rig(card);
    let data = [0x42u8; SD_SECTOR_SIZE];

    rig.transport.write_blocks_async(&data, 9, 1).unwrap();

    assert_eq!(poll_write_done(&mut rig.transport), 4);
    assert!(!rig.card.borrow().selected);
}

#[test]
fn rejected_block_closes_multi_block_write() {
    let mut card = SimCard::sdhc();
    card.rejected_writes.push(101);
    let mut rig = ready_rig(card);
    let data = [0x11u8; SD_SECTOR_SIZE * 3];

    assert_eq!(
        rig.transport.write_blocks_async(&data, 100, 3),
        Err(SdSpiError::WriteDataRejected(0x0D))
    );
    {
        let card = rig.card.borrow();
        assert_eq!(card.stop_tokens, 1);
        assert!(!card.selected);
        assert_eq!(card.sector(100), [0x11u8; SD_SECTOR_SIZE]);
        assert_eq!(card.sector(101), sector_pattern(101));
    }

    let mut buf = [0u8; SD_SECTOR_SIZE];
    rig.transport.read_blocks(&mut buf, 100, 1).unwrap();
    assert_eq!(buf, [0x11u8; SD_SECTOR_SIZE]);
}

#[test]
fn bus_error_releases_chip_select() {
    let mut rig = ready_rig(SimCard::sdhc());
    rig.card.borrow_mut().bus_fault = true;
    let mut buf = [0u8; SD_SECTOR_SIZE];

    assert_eq!(
        rig.transport.read_blocks(&mut buf, 0, 1),
        Err(SdSpiError::Bus(ErrorKind::Other))
    );
    assert!(!rig.card.borrow().selected);

    rig.card.borrow_mut().bus_fault = false;
    rig.transport.read_blocks(&mut buf, 0, 1).unwrap();
    assert_eq!(buf, sector_pattern(0));
}

fn put_csd_bits(csd: &mut [u8; 16], msb: u8, lsb: u8, value: u32) {
    for bit in lsb..=msb {
        let byte = &mut csd[((127 - bit) / 8) as usize];
        let mask = 1u8 << (bit % 8);
        if (value >> (bit - lsb)) & 1 == 1 {
            *byte |= mask;
        } else {
            *byte &= !mask;
        }
    }
}

#[test]
fn capacity_decodes_from_csd_v1() {
    let mut csd = [0u8; 16];
    put_csd_bits(&mut csd, 83, 80, 9);
    put_csd_bits(&mut csd, 73, 62, 3839);
    put_csd_bits(&mut csd, 49, 47, 7);

    assert_eq!(decode_capacity_bytes(&csd), Some(3840 * 512 * 512));
}
