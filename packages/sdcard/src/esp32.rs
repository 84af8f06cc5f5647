//! SPI-mode card transport wired to `esp-hal` peripherals.

use esp_hal::{
    delay::Delay,
    gpio::Output,
    spi::{
        master::{Config as SpiConfig, Spi},
        Mode as SpiMode,
    },
    time::Rate,
    Blocking,
};
use log::warn;

use crate::spi::{SpiClock, SpiTransport};

const SD_INIT_SPI_RATE_KHZ: u32 = 400;
const SD_DATA_SPI_RATE_KHZ: u32 = 24_000;

pub type Esp32ClockHook = fn(&mut Spi<'_, Blocking>, SpiClock);

pub type Esp32SpiTransport<'d> = SpiTransport<Spi<'d, Blocking>, Output<'d>, Delay, Esp32ClockHook>;

pub fn new_esp32_transport<'d>(spi: Spi<'d, Blocking>, cs: Output<'d>) -> Esp32SpiTransport<'d> {
    SpiTransport::new(spi, cs, Delay::new(), apply_clock as Esp32ClockHook)
}

fn apply_clock(spi: &mut Spi<'_, Blocking>, clock: SpiClock) {
    let khz = spi_rate_khz(clock);
    let config = SpiConfig::default()
        .with_mode(SpiMode::_0)
        .with_frequency(Rate::from_khz(khz));
    if let Err(err) = spi.apply_config(&config) {
        warn!("sdspi: clock_apply_error khz={} err={:?}", khz, err);
    }
}

fn spi_rate_khz(clock: SpiClock) -> u32 {
    match clock {
        SpiClock::Init => SD_INIT_SPI_RATE_KHZ,
        SpiClock::Data => SD_DATA_SPI_RATE_KHZ,
        SpiClock::Divided(divider) => {
            (SD_DATA_SPI_RATE_KHZ / (divider.level() as u32 + 1)).max(SD_INIT_SPI_RATE_KHZ)
        }
    }
}
