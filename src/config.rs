use embassy_time::Duration;
use sdcard::{BusWidth, ClockDivider};

/// Divider used for bring-up, status queries and reads.
pub const READ_CLOCK_DIVIDER: ClockDivider = ClockDivider::new(3);
/// Divider used while a write is issued and awaited.
pub const WRITE_CLOCK_DIVIDER: ClockDivider = ClockDivider::new(30);
/// Completion polls granted to one write.
pub const WRITE_POLL_BUDGET: u16 = 10;

/// What a write does with the result the transport reports on completion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CompletionCheck {
    /// A failed completion fails the write.
    #[default]
    Surface,
    /// Any completion counts as success.
    Ignore,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WritePolicy {
    /// Polls allowed before the write is reported as timed out. Reset on
    /// every write; zero behaves as one.
    pub poll_budget: u16,
    /// Pause between two polls; zero polls back to back.
    pub poll_interval: Duration,
    pub completion: CompletionCheck,
}

impl Default for WritePolicy {
    fn default() -> Self {
        Self {
            poll_budget: WRITE_POLL_BUDGET,
            poll_interval: Duration::from_ticks(0),
            completion: CompletionCheck::Surface,
        }
    }
}

impl WritePolicy {
    pub fn with_poll_budget(mut self, poll_budget: u16) -> Self {
        self.poll_budget = poll_budget;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_completion(mut self, completion: CompletionCheck) -> Self {
        self.completion = completion;
        self
    }

    pub(crate) fn effective_budget(&self) -> u16 {
        self.poll_budget.max(1)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiskConfig {
    pub bus_width: BusWidth,
    pub read_divider: ClockDivider,
    pub write_divider: ClockDivider,
    pub write: WritePolicy,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            bus_width: BusWidth::OneBit,
            read_divider: READ_CLOCK_DIVIDER,
            write_divider: WRITE_CLOCK_DIVIDER,
            write: WritePolicy::default(),
        }
    }
}

impl DiskConfig {
    pub fn with_bus_width(mut self, bus_width: BusWidth) -> Self {
        self.bus_width = bus_width;
        self
    }

    pub fn with_read_divider(mut self, divider: ClockDivider) -> Self {
        self.read_divider = divider;
        self
    }

    pub fn with_write_divider(mut self, divider: ClockDivider) -> Self {
        self.write_divider = divider;
        self
    }

    pub fn with_write_policy(mut self, write: WritePolicy) -> Self {
        self.write = write;
        self
    }
}
