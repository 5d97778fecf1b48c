pub mod error;
#[cfg(feature = "hardware")]
pub mod gpio;

use std::sync::Arc;
use std::time::Instant;

use hopper_traits::clock::{Clock, MonotonicClock};
use hopper_traits::{COIN_OUT_BIT, ChangeRecord, IoctlCmd, TICKS_PER_MS, Transport};

use crate::error::HwError;

/// Behavior of the simulated hopper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimMode {
    /// Dispense a coin pulse train while the motor is driven.
    #[default]
    Normal,
    /// Never pulse (out of coins).
    Empty,
    /// First pulse sticks high (coin wedged in the optic).
    Jam,
    /// Zero register, probe reports detached.
    Disconnected,
    /// Every transport call fails with a hardware timeout.
    Flaky,
}

/// Simulated hopper transport.
///
/// Coin pulses are derived from accumulated motor-on time: within each pulse
/// period the register is low for `period - width` ms, then high for `width`
/// ms. Reads report the interval since the previous read, so the pulse train
/// tracks whatever cadence the poll loop runs at.
pub struct SimHopper {
    clock: Arc<dyn Clock + Send + Sync>,
    mode: SimMode,
    pulse_period_ms: u64,
    pulse_width_ms: u64,
    last_read: Option<Instant>,
    run_ms: u64,
    register: u8,
    reported: u8,
    motor_driven: bool,
    enabled: bool,
    device_type: u8,
    change_id: u8,
    jam_latched: bool,
}

impl SimHopper {
    pub fn new(mode: SimMode, pulse_period_ms: u64, pulse_width_ms: u64) -> Self {
        Self::with_clock(
            mode,
            pulse_period_ms,
            pulse_width_ms,
            Arc::new(MonotonicClock::new()),
        )
    }

    pub fn with_clock(
        mode: SimMode,
        pulse_period_ms: u64,
        pulse_width_ms: u64,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        Self {
            clock,
            mode,
            pulse_period_ms: pulse_period_ms.max(2),
            pulse_width_ms: pulse_width_ms.max(1),
            last_read: None,
            run_ms: 0,
            register: 0,
            reported: 0,
            motor_driven: false,
            enabled: false,
            device_type: 0,
            change_id: 0,
            jam_latched: false,
        }
    }

    pub fn device_type(&self) -> u8 {
        self.device_type
    }

    /// High window sits at the tail of each pulse period, so a freshly
    /// started motor needs a full lead-in before the first leading edge.
    fn in_high_window(&self) -> bool {
        let lead = self.pulse_period_ms.saturating_sub(self.pulse_width_ms);
        self.run_ms % self.pulse_period_ms >= lead
    }

    fn level(&mut self) -> u8 {
        let high = match self.mode {
            SimMode::Normal => self.motor_driven && self.in_high_window(),
            SimMode::Jam => {
                if self.motor_driven && self.in_high_window() {
                    self.jam_latched = true;
                }
                self.jam_latched
            }
            SimMode::Empty | SimMode::Disconnected | SimMode::Flaky => false,
        };
        if high { COIN_OUT_BIT } else { 0 }
    }
}

impl Transport for SimHopper {
    fn read(
        &mut self,
    ) -> Result<Option<ChangeRecord>, Box<dyn std::error::Error + Send + Sync>> {
        if self.mode == SimMode::Flaky {
            return Err(Box::new(HwError::Timeout));
        }
        if !self.enabled {
            return Ok(None);
        }
        let now = self.clock.now();
        let elapsed_ms = self
            .last_read
            .map(|t| now.saturating_duration_since(t).as_millis() as u64)
            .unwrap_or(0);
        self.last_read = Some(now);
        if self.motor_driven {
            self.run_ms += elapsed_ms;
        }
        self.register = self.level();
        let rec = ChangeRecord::new(
            self.reported,
            self.register,
            elapsed_ms as i64 * TICKS_PER_MS,
            self.change_id,
        );
        self.reported = self.register;
        self.change_id = self.change_id.wrapping_add(1);
        Ok(Some(rec))
    }

    fn ioctl(
        &mut self,
        cmd: IoctlCmd,
        value: u8,
    ) -> Result<u8, Box<dyn std::error::Error + Send + Sync>> {
        if self.mode == SimMode::Flaky {
            return Err(Box::new(HwError::Timeout));
        }
        match cmd {
            IoctlCmd::Motor => {
                self.motor_driven = value != 0;
                Ok(0)
            }
            IoctlCmd::Enable => {
                self.enabled = true;
                Ok(0)
            }
            IoctlCmd::Disable => {
                self.enabled = false;
                Ok(0)
            }
            IoctlCmd::SetType => {
                self.device_type = value;
                Ok(0)
            }
            IoctlCmd::Probe => Ok(u8::from(self.mode == SimMode::Disconnected)),
            IoctlCmd::Status => Ok(self.register),
        }
    }
}

/// Replays a recorded register trace, one step per read.
///
/// Steps are `(elapsed_ms, register_value)` pairs; once the trace is
/// exhausted every read reports `None`.
pub struct TracePlayer {
    steps: std::vec::IntoIter<(u32, u8)>,
    reported: u8,
    register: u8,
    change_id: u8,
}

impl TracePlayer {
    pub fn new(steps: Vec<(u32, u8)>) -> Self {
        Self {
            steps: steps.into_iter(),
            reported: 0,
            register: 0,
            change_id: 0,
        }
    }
}

impl Transport for TracePlayer {
    fn read(
        &mut self,
    ) -> Result<Option<ChangeRecord>, Box<dyn std::error::Error + Send + Sync>> {
        let Some((elapsed_ms, value)) = self.steps.next() else {
            return Ok(None);
        };
        self.register = value;
        let rec = ChangeRecord::new(
            self.reported,
            value,
            i64::from(elapsed_ms) * TICKS_PER_MS,
            self.change_id,
        );
        self.reported = value;
        self.change_id = self.change_id.wrapping_add(1);
        Ok(Some(rec))
    }

    fn ioctl(
        &mut self,
        cmd: IoctlCmd,
        _value: u8,
    ) -> Result<u8, Box<dyn std::error::Error + Send + Sync>> {
        match cmd {
            IoctlCmd::Probe => Ok(0),
            IoctlCmd::Status => Ok(self.register),
            _ => Ok(0),
        }
    }
}
