use bitflags::bitflags;

bitflags! {
    /// Drive status as reported to the filesystem layer.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct DiskStatus: u8 {
        /// The drive has not been brought up, or the last bring-up failed.
        const NOT_INITIALIZED = 0x01;
    }
}

impl DiskStatus {
    /// No status bits set: the drive accepts reads and writes.
    pub const READY: Self = Self::empty();

    pub fn is_ready(self) -> bool {
        self.is_empty()
    }
}

impl Default for DiskStatus {
    fn default() -> Self {
        Self::NOT_INITIALIZED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_status_is_not_initialized() {
        assert_eq!(DiskStatus::default(), DiskStatus::NOT_INITIALIZED);
        assert!(!DiskStatus::default().is_ready());
    }

    #[test]
    fn unknown_bits_block_readiness() {
        let status = DiskStatus::from_bits_retain(0x04);
        assert!(!status.contains(DiskStatus::NOT_INITIALIZED));
        assert!(!status.is_ready());
        assert!(DiskStatus::READY.is_ready());
    }
}
