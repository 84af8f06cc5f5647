use core::task::Poll;

use embedded_hal::delay::DelayNs;
use log::{debug, warn};
use sdcard::Transport;

use super::{checked_run, SdDisk};
use crate::{config::CompletionCheck, error::DiskError};

impl<T, D> SdDisk<T, D>
where
    T: Transport,
    D: DelayNs,
{
    /// Write `count` sectors from `src` starting at `lba` as one transport
    /// request, then poll for completion.
    ///
    /// Running out of polls reports `WriteTimeout`; the transport may still
    /// finish the write afterwards.
    pub fn write(
        &mut self,
        drive: u8,
        src: &[u8],
        lba: u32,
        count: u32,
    ) -> Result<(), DiskError<T::Error>> {
        Self::check_drive(drive)?;
        self.transport.set_clock_divider(self.config.write_divider);
        self.check_ready("write")?;
        let len = checked_run(src.len(), lba, count)?;

        if let Err(source) = self.transport.write_blocks_async(&src[..len], lba, count) {
            warn!(
                "diskio: write_issue_error lba={} count={} err={:?}",
                lba, count, source
            );
            return Err(DiskError::WriteIssue(source));
        }
        self.wait_write_complete(lba, count)
    }

    fn wait_write_complete(&mut self, lba: u32, count: u32) -> Result<(), DiskError<T::Error>> {
        let policy = self.config.write;
        let budget = policy.effective_budget();
        let interval_us = policy.poll_interval.as_micros().min(u32::MAX as u64) as u32;

        let mut remaining = budget;
        loop {
            match self.transport.write_complete() {
                Poll::Ready(Ok(())) => return Ok(()),
                Poll::Ready(Err(source)) => match policy.completion {
                    CompletionCheck::Surface => {
                        warn!(
                            "diskio: write_failed lba={} count={} err={:?}",
                            lba, count, source
                        );
                        return Err(DiskError::WriteCompletion(source));
                    }
                    CompletionCheck::Ignore => {
                        debug!(
                            "diskio: write_result_ignored lba={} err={:?}",
                            lba, source
                        );
                        return Ok(());
                    }
                },
                Poll::Pending => {
                    remaining -= 1;
                    debug!(
                        "diskio: write_wait lba={} poll={}/{}",
                        lba,
                        budget - remaining,
                        budget
                    );
                    if remaining == 0 {
                        warn!(
                            "diskio: write_timeout lba={} count={} polls={}",
                            lba, count, budget
                        );
                        return Err(DiskError::WriteTimeout { polls: budget });
                    }
                    if interval_us > 0 {
                        self.delay.delay_us(interval_us);
                    }
                }
            }
        }
    }
}
