pub mod clock;

pub use clock::{Clock, MonotonicClock};

/// Coin-out sensor bit within the polled status register.
pub const COIN_OUT_BIT: u8 = 1 << 0;

/// Ticks per millisecond for [`ChangeRecord::elapsed_ticks`] (100 ns units).
pub const TICKS_PER_MS: i64 = 10_000;

/// One debounced register transition handed out by the transport.
///
/// Quiet polls (no register activity since the previous read) report
/// `old_value == new_value` and carry the elapsed interval, which is what
/// advances the driver's countdown timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChangeRecord {
    /// Register value as of the previously consumed record.
    pub old_value: u8,
    /// Register value now.
    pub new_value: u8,
    /// Time covered by this record, in 100 ns ticks.
    pub elapsed_ticks: i64,
    /// Rolling record id assigned by the transport.
    pub change_id: u8,
}

impl ChangeRecord {
    #[inline]
    pub const fn new(old_value: u8, new_value: u8, elapsed_ticks: i64, change_id: u8) -> Self {
        Self {
            old_value,
            new_value,
            elapsed_ticks,
            change_id,
        }
    }

    /// True when any register bit changed in this record.
    #[inline]
    pub const fn changed(&self) -> bool {
        self.old_value != self.new_value
    }

    /// Rising transition of the masked bit.
    #[inline]
    pub const fn leading_edge(&self, mask: u8) -> bool {
        self.old_value & mask == 0 && self.new_value & mask != 0
    }

    /// Falling transition of the masked bit.
    #[inline]
    pub const fn trailing_edge(&self, mask: u8) -> bool {
        self.old_value & mask != 0 && self.new_value & mask == 0
    }
}

/// Device control commands issued over the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoctlCmd {
    /// Drive (value 1) or release (value 0) the dispense motor line.
    Motor,
    /// Enable polled reporting.
    Enable,
    /// Disable polled reporting.
    Disable,
    /// Apply the device-type discriminator byte.
    SetType,
    /// Ask whether the sensor head is attached; result 1 means detached.
    Probe,
    /// Snapshot the raw status register; result is the register byte.
    Status,
}

pub trait Transport {
    /// Consume the latest register snapshot. Reads are destructive: a record
    /// handed out once is gone. `Ok(None)` means the device produced nothing
    /// for this cycle.
    fn read(&mut self)
    -> Result<Option<ChangeRecord>, Box<dyn std::error::Error + Send + Sync>>;

    /// Issue a control command; returns the device's result byte.
    fn ioctl(
        &mut self,
        cmd: IoctlCmd,
        value: u8,
    ) -> Result<u8, Box<dyn std::error::Error + Send + Sync>>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn read(
        &mut self,
    ) -> Result<Option<ChangeRecord>, Box<dyn std::error::Error + Send + Sync>> {
        (**self).read()
    }

    fn ioctl(
        &mut self,
        cmd: IoctlCmd,
        value: u8,
    ) -> Result<u8, Box<dyn std::error::Error + Send + Sync>> {
        (**self).ioctl(cmd, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edges_track_the_masked_bit_only() {
        let rec = ChangeRecord::new(0b0000_0010, 0b0000_0011, 10_000, 1);
        assert!(rec.leading_edge(COIN_OUT_BIT));
        assert!(!rec.trailing_edge(COIN_OUT_BIT));
        assert!(rec.changed());

        let quiet = ChangeRecord::new(0b01, 0b01, 10_000, 2);
        assert!(!quiet.leading_edge(COIN_OUT_BIT));
        assert!(!quiet.trailing_edge(COIN_OUT_BIT));
        assert!(!quiet.changed());
    }

    #[test]
    fn trailing_edge_requires_prior_high() {
        let rec = ChangeRecord::new(0b01, 0b00, 5_000, 3);
        assert!(rec.trailing_edge(COIN_OUT_BIT));
        assert!(!rec.leading_edge(COIN_OUT_BIT));
    }
}
