//! Raspberry Pi GPIO transport for a directly wired hopper head.

use std::time::{Duration, Instant};

use rppal::gpio::{Gpio, InputPin, Level, OutputPin};
use tracing::{debug, trace};

use hopper_traits::{COIN_OUT_BIT, ChangeRecord, IoctlCmd, TICKS_PER_MS, Transport};

use crate::error::{HwError, Result};

/// Settle time between the two samples of a debounced read.
const SETTLE: Duration = Duration::from_micros(200);

pub struct GpioHopper {
    coin_in: InputPin,
    motor: OutputPin,
    enable: Option<OutputPin>,
    presence: Option<InputPin>,
    wait: Duration,
    last_read: Option<Instant>,
    reported: u8,
    change_id: u8,
    enabled: bool,
    device_type: u8,
}

impl GpioHopper {
    /// Claims the pins and forces the motor line low.
    pub fn open(
        coin_in: u8,
        motor: u8,
        enable: Option<u8>,
        presence: Option<u8>,
        wait: Duration,
    ) -> Result<Self> {
        let gpio = Gpio::new().map_err(|e| HwError::Gpio(e.to_string()))?;
        let coin_in = gpio
            .get(coin_in)
            .map_err(|e| HwError::Gpio(e.to_string()))?
            .into_input_pullup();
        let mut motor = gpio
            .get(motor)
            .map_err(|e| HwError::Gpio(e.to_string()))?
            .into_output();
        motor.set_low();
        let enable = match enable {
            Some(pin) => Some(
                gpio.get(pin)
                    .map_err(|e| HwError::Gpio(e.to_string()))?
                    .into_output_low(),
            ),
            None => None,
        };
        let presence = match presence {
            Some(pin) => Some(
                gpio.get(pin)
                    .map_err(|e| HwError::Gpio(e.to_string()))?
                    .into_input_pullup(),
            ),
            None => None,
        };
        Ok(Self {
            coin_in,
            motor,
            enable,
            presence,
            wait,
            last_read: None,
            reported: 0,
            change_id: 0,
            enabled: false,
            device_type: 0,
        })
    }

    /// Double-sample the optic until two reads agree.
    fn sample_register(&mut self) -> Result<u8> {
        let deadline = Instant::now() + self.wait;
        loop {
            let first = self.coin_in.read();
            std::thread::sleep(SETTLE);
            if self.coin_in.read() == first {
                return Ok(if first == Level::High { COIN_OUT_BIT } else { 0 });
            }
            if Instant::now() >= deadline {
                return Err(HwError::Timeout);
            }
        }
    }
}

impl Transport for GpioHopper {
    fn read(
        &mut self,
    ) -> std::result::Result<Option<ChangeRecord>, Box<dyn std::error::Error + Send + Sync>> {
        if !self.enabled {
            return Ok(None);
        }
        let value = self.sample_register()?;
        let now = Instant::now();
        let elapsed_ms = self
            .last_read
            .map(|t| now.saturating_duration_since(t).as_millis() as i64)
            .unwrap_or(0);
        self.last_read = Some(now);
        let rec = ChangeRecord::new(self.reported, value, elapsed_ms * TICKS_PER_MS, self.change_id);
        if rec.changed() {
            debug!(old = rec.old_value, new = rec.new_value, "coin-out edge");
        }
        self.reported = value;
        self.change_id = self.change_id.wrapping_add(1);
        Ok(Some(rec))
    }

    fn ioctl(
        &mut self,
        cmd: IoctlCmd,
        value: u8,
    ) -> std::result::Result<u8, Box<dyn std::error::Error + Send + Sync>> {
        match cmd {
            IoctlCmd::Motor => {
                if value != 0 {
                    self.motor.set_high();
                } else {
                    self.motor.set_low();
                }
                trace!(driven = value != 0, "motor line");
                Ok(0)
            }
            IoctlCmd::Enable => {
                if let Some(pin) = self.enable.as_mut() {
                    pin.set_high();
                }
                self.enabled = true;
                Ok(0)
            }
            IoctlCmd::Disable => {
                if let Some(pin) = self.enable.as_mut() {
                    pin.set_low();
                }
                self.enabled = false;
                Ok(0)
            }
            IoctlCmd::SetType => {
                self.device_type = value;
                Ok(0)
            }
            // Presence switch closes to ground when the head is seated.
            IoctlCmd::Probe => match self.presence.as_ref() {
                Some(pin) => Ok(u8::from(pin.read() == Level::High)),
                None => Ok(0),
            },
            IoctlCmd::Status => Ok(self.sample_register()?),
        }
    }
}

impl Drop for GpioHopper {
    fn drop(&mut self) {
        self.motor.set_low();
    }
}
