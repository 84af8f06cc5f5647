//! FAT timestamps. The adapter has no clock of its own: `current_timestamp`
//! always answers with the zero value, and callers that need real times
//! plug a [`TimeSource`] into their filesystem layer.

const FAT_EPOCH_YEAR: u16 = 1980;
const FAT_MAX_YEAR: u16 = FAT_EPOCH_YEAR + 127;

/// Packed FAT date and time:
/// `year-1980 (7) | month (4) | day (5) | hour (5) | minute (6) | second/2 (5)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FatTimestamp(pub u32);

impl FatTimestamp {
    pub const ZERO: Self = Self(0);

    /// Pack a calendar time. Odd seconds round down to the FAT 2-second
    /// resolution.
    pub fn new(year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> Option<Self> {
        if !(FAT_EPOCH_YEAR..=FAT_MAX_YEAR).contains(&year)
            || !(1..=12).contains(&month)
            || !(1..=31).contains(&day)
            || hour > 23
            || minute > 59
            || second > 59
        {
            return None;
        }
        let packed = ((year - FAT_EPOCH_YEAR) as u32) << 25
            | (month as u32) << 21
            | (day as u32) << 16
            | (hour as u32) << 11
            | (minute as u32) << 5
            | (second / 2) as u32;
        Some(Self(packed))
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn year(self) -> u16 {
        FAT_EPOCH_YEAR + (self.0 >> 25) as u16
    }

    pub fn month(self) -> u8 {
        ((self.0 >> 21) & 0x0F) as u8
    }

    pub fn day(self) -> u8 {
        ((self.0 >> 16) & 0x1F) as u8
    }

    pub fn hour(self) -> u8 {
        ((self.0 >> 11) & 0x1F) as u8
    }

    pub fn minute(self) -> u8 {
        ((self.0 >> 5) & 0x3F) as u8
    }

    pub fn second(self) -> u8 {
        ((self.0 & 0x1F) * 2) as u8
    }
}

pub trait TimeSource {
    fn now(&mut self) -> FatTimestamp;
}

/// Clockless source; always the zero timestamp.
#[derive(Clone, Copy, Debug, Default)]
pub struct EpochClock;

impl TimeSource for EpochClock {
    fn now(&mut self) -> FatTimestamp {
        FatTimestamp::ZERO
    }
}

pub fn current_timestamp() -> FatTimestamp {
    EpochClock.now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_clock_reports_zero() {
        assert_eq!(current_timestamp(), FatTimestamp::ZERO);
        assert_eq!(current_timestamp().bits(), 0);
    }

    #[test]
    fn packs_calendar_fields() {
        let ts = FatTimestamp::new(2024, 3, 15, 13, 45, 31).unwrap();
        assert_eq!(ts.bits(), 0x586F_6DAF);
        assert_eq!(ts.year(), 2024);
        assert_eq!(ts.month(), 3);
        assert_eq!(ts.day(), 15);
        assert_eq!(ts.hour(), 13);
        assert_eq!(ts.minute(), 45);
        assert_eq!(ts.second(), 30);
    }

    #[test]
    fn rejects_out_of_range_fields() {
        assert_eq!(FatTimestamp::new(1979, 1, 1, 0, 0, 0), None);
        assert_eq!(FatTimestamp::new(2108, 1, 1, 0, 0, 0), None);
        assert_eq!(FatTimestamp::new(2000, 13, 1, 0, 0, 0), None);
        assert_eq!(FatTimestamp::new(2000, 1, 0, 0, 0, 0), None);
        assert_eq!(FatTimestamp::new(2000, 1, 1, 24, 0, 0), None);
        assert!(FatTimestamp::new(2107, 12, 31, 23, 59, 59).is_some());
    }
}
