#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Core hopper driver logic (hardware-agnostic).
//!
//! This crate provides the hardware-independent coin-out engine. All hardware
//! interactions go through the `hopper_traits::Transport` trait.
//!
//! ## Architecture
//!
//! - **State machine**: four-phase coin-out FSM (`HopperCore`) advanced by the
//!   elapsed-time deltas carried in change records, never by wall-clock reads
//! - **Disconnect detection**: debounced probe algorithm absorbing single
//!   noisy reads (`probe_connectivity`)
//! - **Legality**: payout ceiling enforcement distinguishing authorized coins
//!   from illegal coin-outs, embedded in the transition that counts each coin
//! - **Polling**: background poll thread and lock-serialized command surface
//!   (`poller` module)
//! - **Sessions**: payout orchestration over the event stream (`session` module)
//!
//! ## Time units
//!
//! Transports report elapsed time in 100 ns ticks; all countdown timers here
//! operate in integer milliseconds derived from those ticks (see `util`).

// Module declarations
pub mod conversions;
pub mod error;
pub mod mocks;
pub mod poller;
pub mod session;
pub mod util;

// TODO: Future refactoring - extract these types into dedicated modules:
// - state.rs: CoinOutState, HopperState
// - config.rs: TimingCfg, ProbeCfg, HopperBinding
// - builder.rs: HopperBuilder and the type-state markers
// This will keep lib.rs focused on HopperCore itself

use crate::error::BuildError;
use crate::error::{HopperError, Result};
use eyre::WrapErr;
use hopper_traits::{COIN_OUT_BIT, ChangeRecord, IoctlCmd};

use crate::util::ticks_to_ms;

/// Motor-drive command bit within `HopperState::device_bits`.
pub const MOTOR_DRIVE: u8 = 1 << 0;
/// Reporting-enabled bit within `HopperState::device_bits`.
pub const DEVICE_ENABLED: u8 = 1 << 1;

/// Coin-out FSM phase. The countdown lives inside the variants that use one,
/// so a phase without a deadline cannot carry a stale timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoinOutState {
    /// Idle or between coins; while the motor is commanded on, the timer
    /// counts down the empty-detection window.
    WaitingForLeadingEdge { timer_ms: i64 },
    /// A coin is crossing the optic; the timer counts down the max-blocked
    /// window before the coin is declared jammed.
    WaitingForTrailingEdge { timer_ms: i64 },
    /// Soft pause after a missed coin; the motor line is released while the
    /// timer runs, then dispensing resumes.
    WaitingForTimeout { timer_ms: i64 },
    /// Latched fault; only an explicit `reset()` leaves this phase.
    WaitingForReset,
}

impl CoinOutState {
    /// Decrement the phase countdown by the elapsed interval, floored at 0.
    fn tick(&mut self, elapsed_ms: i64) {
        match self {
            Self::WaitingForLeadingEdge { timer_ms }
            | Self::WaitingForTrailingEdge { timer_ms }
            | Self::WaitingForTimeout { timer_ms } => {
                *timer_ms = timer_ms.saturating_sub(elapsed_ms).max(0);
            }
            Self::WaitingForReset => {}
        }
    }

    /// Remaining countdown in milliseconds; 0 for `WaitingForReset`.
    pub fn timer_ms(&self) -> i64 {
        match self {
            Self::WaitingForLeadingEdge { timer_ms }
            | Self::WaitingForTrailingEdge { timer_ms }
            | Self::WaitingForTimeout { timer_ms } => *timer_ms,
            Self::WaitingForReset => 0,
        }
    }
}

#[cfg(test)]
mod tick_tests {
    use super::CoinOutState;

    #[test]
    fn tick_floors_at_zero() {
        let mut state = CoinOutState::WaitingForTrailingEdge { timer_ms: 100 };
        state.tick(40);
        assert_eq!(state.timer_ms(), 60);
        state.tick(1_000);
        assert_eq!(state.timer_ms(), 0);
        state.tick(i64::MAX);
        assert_eq!(state.timer_ms(), 0);
    }

    #[test]
    fn reset_phase_has_no_countdown() {
        let mut state = CoinOutState::WaitingForReset;
        state.tick(1_000);
        assert_eq!(state.timer_ms(), 0);
        assert_eq!(state, CoinOutState::WaitingForReset);
    }
}

/// Device-level flags owned by the state machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct HopperState {
    /// Command bitmask: motor-drive bit plus reporting-enable bit.
    pub device_bits: u8,
    /// Debounced connectivity verdict from the probe algorithm.
    pub is_connected: bool,
}

impl HopperState {
    /// True while the motor is commanded on. A soft pause releases the motor
    /// line without clearing this bit.
    pub const fn motor_commanded(&self) -> bool {
        self.device_bits & MOTOR_DRIVE != 0
    }
}

/// Coin-out timing windows, all in milliseconds.
#[derive(Debug, Clone)]
pub struct TimingCfg {
    /// Max time the optic may stay blocked before the coin counts as jammed.
    pub max_blocked_ms: u32,
    /// Max time to the next leading edge while dispensing before a pause.
    pub empty_ms: u32,
    /// Length of one soft pause with the motor line released.
    pub pause_ms: u32,
    /// Consecutive pauses tolerated before the hopper is declared empty.
    pub max_pause_retries: u32,
}

impl Default for TimingCfg {
    fn default() -> Self {
        Self {
            max_blocked_ms: 100,
            empty_ms: 300,
            pause_ms: 1_500,
            max_pause_retries: 3,
        }
    }
}

/// Disconnect-detection tuning.
#[derive(Debug, Clone)]
pub struct ProbeCfg {
    /// Quiet time on the register before probing begins.
    pub after_ms: u32,
    /// Consecutive positive probes required to declare a disconnect.
    pub debounce: u32,
}

impl Default for ProbeCfg {
    fn default() -> Self {
        Self {
            after_ms: 5_000,
            debounce: 3,
        }
    }
}

/// Identity of one hopper variant: everything needed to open its transport.
/// Pure configuration, no state machine logic.
#[derive(Debug, Clone)]
pub struct HopperBinding {
    pub vendor: String,
    pub model: String,
    /// Transport selector, e.g. "sim" or "gpio".
    pub interface: String,
    /// Device-type discriminator applied during initialization.
    pub device_type: u8,
    /// Poll cadence of the background thread.
    pub poll_ms: u64,
    /// Device wait period for debounced register reads.
    pub wait_ms: u64,
}

impl Default for HopperBinding {
    fn default() -> Self {
        Self {
            vendor: "Aristocrat".into(),
            model: "Coin Hopper".into(),
            interface: "sim".into(),
            device_type: 2,
            poll_ms: 5,
            wait_ms: 20,
        }
    }
}

/// Tagged commands accepted by `HopperCore::dispatch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HopperCommand {
    /// Start or stop the dispense motor.
    MotorControl { on: bool },
    /// Authorize a payout of up to `count` coins; zeroes the paid counter.
    SetMaxPayout { count: u32 },
    /// Acknowledge faults and re-arm the state machine.
    DeviceReset,
    /// Re-apply device type, then cycle reporting off and on.
    Initialize,
}

/// Hardware fault conditions. These are expected operating states requiring
/// an external `reset()`, not programming errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HopperFault {
    Empty,
    Jam,
    Disconnected,
    IllegalCoinOut,
}

/// Events delivered to the owning layer over the event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HopperEvent {
    /// One coin crossed the optic. `legal` is false when the coin fell
    /// outside an authorized payout.
    CoinOut { legal: bool },
    /// A fault condition latched; cleared only by `DeviceReset`.
    Fault(HopperFault),
    /// A reset succeeded and outstanding faults were cleared.
    FaultCleared,
}

/// Receiving end of the hopper event stream.
pub type EventReceiver = crossbeam_channel::Receiver<HopperEvent>;

/// Unified coin-out engine for both dynamic (boxed) and generic variants.
///
/// One instance exists per bound hopper device. All mutation happens either
/// on the poll path (`poll_cycle`/`poll_record`) or through the command
/// surface; `poller::Poller` serializes the two behind one lock.
pub struct HopperCore<T: hopper_traits::Transport> {
    transport: T,
    timing: TimingCfg,
    probe: ProbeCfg,
    device_type: u8,
    coin_out: CoinOutState,
    hopper: HopperState,
    // Soft-pause budget; reset on a dispensed coin or reset()
    pause_retry_count: u32,
    // Payout legality ceiling
    current_payout_count: u32,
    max_payout_count: u32,
    // Latched fault awaiting reset()
    active_fault: Option<HopperFault>,
    // Disconnect probing: quiet time since the last register change, and the
    // run length of positive probes
    probe_acc_ms: i64,
    probe_debounce: u32,
    events: crossbeam_channel::Sender<HopperEvent>,
}

impl<T: hopper_traits::Transport> core::fmt::Debug for HopperCore<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HopperCore")
            .field("state", &self.coin_out)
            .field("motor_commanded", &self.hopper.motor_commanded())
            .field("current_payout", &self.current_payout_count)
            .field("max_payout", &self.max_payout_count)
            .field("is_connected", &self.hopper.is_connected)
            .finish()
    }
}

impl<T: hopper_traits::Transport> HopperCore<T> {
    /// Current FSM phase.
    pub fn coin_out_state(&self) -> CoinOutState {
        self.coin_out
    }

    /// Debounced connectivity verdict.
    pub fn is_connected(&self) -> bool {
        self.hopper.is_connected
    }

    /// Latched fault, if any.
    pub fn active_fault(&self) -> Option<HopperFault> {
        self.active_fault
    }

    /// Coins counted since the last reset or ceiling change.
    pub fn current_payout(&self) -> u32 {
        self.current_payout_count
    }

    /// Payout legality ceiling.
    pub fn max_payout(&self) -> u32 {
        self.max_payout_count
    }

    /// Device command bitmask snapshot.
    pub fn device_bits(&self) -> u8 {
        self.hopper.device_bits
    }

    /// True while the motor is commanded on.
    pub fn motor_commanded(&self) -> bool {
        self.hopper.motor_commanded()
    }

    /// Route a tagged command from the owning adapter.
    pub fn dispatch(&mut self, command: HopperCommand) -> Result<()> {
        tracing::debug!(?command, "dispatch");
        match command {
            HopperCommand::MotorControl { on: true } => self.motor_on(),
            HopperCommand::MotorControl { on: false } => self.motor_off(),
            HopperCommand::SetMaxPayout { count } => {
                self.set_max_payout(count);
                Ok(())
            }
            HopperCommand::DeviceReset => self.reset().map(|_| ()),
            HopperCommand::Initialize => self.initialize_device(),
        }
    }

    /// Acknowledge faults and re-arm the state machine.
    ///
    /// Disables the device, stops the motor, probes connectivity once
    /// (without debounce), then either re-flags the disconnect or returns to
    /// `WaitingForLeadingEdge` with the payout counter zeroed. The device is
    /// re-enabled before returning. Always returns `Ok(true)`: a re-flagged
    /// disconnect is the reported outcome, not a failure of the call.
    pub fn reset(&mut self) -> Result<bool> {
        self.disable_device()?;
        if let Err(e) = self.motor_off() {
            tracing::warn!(error = %e, "motor stop failed during reset");
        }
        let detached = self.ioctl(IoctlCmd::Probe, 0)? == 1;
        self.probe_acc_ms = 0;
        self.probe_debounce = 0;
        if detached {
            self.coin_out = CoinOutState::WaitingForReset;
            self.hopper.is_connected = false;
            self.raise_fault(HopperFault::Disconnected);
        } else {
            self.coin_out = CoinOutState::WaitingForLeadingEdge { timer_ms: 0 };
            self.hopper.is_connected = true;
            self.current_payout_count = 0;
            self.pause_retry_count = 0;
            self.active_fault = None;
            self.emit(HopperEvent::FaultCleared);
        }
        self.enable_device()?;
        Ok(true)
    }

    /// Set the payout legality ceiling; zeroes the paid counter.
    pub fn set_max_payout(&mut self, count: u32) -> bool {
        self.current_payout_count = 0;
        self.max_payout_count = count;
        tracing::debug!(count, "max payout set");
        true
    }

    /// Locked snapshot read of the raw hardware register.
    pub fn status_report(&mut self) -> Result<u8> {
        self.ioctl(IoctlCmd::Status, 0)
    }

    /// Re-apply the device type, then cycle reporting off and on.
    pub fn initialize_device(&mut self) -> Result<()> {
        self.set_type()?;
        self.disable_device()?;
        self.enable_device()?;
        tracing::info!(device_type = self.device_type, "device initialized");
        Ok(())
    }

    /// Command the motor on and arm the empty-detection window.
    pub fn motor_on(&mut self) -> Result<()> {
        self.hopper.device_bits |= MOTOR_DRIVE;
        self.set_motor_line(true)?;
        if let CoinOutState::WaitingForLeadingEdge { ref mut timer_ms } = self.coin_out {
            *timer_ms = i64::from(self.timing.empty_ms);
        }
        Ok(())
    }

    /// Command the motor off.
    pub fn motor_off(&mut self) -> Result<()> {
        self.hopper.device_bits &= !MOTOR_DRIVE;
        self.set_motor_line(false)
    }

    /// Enable polled reporting.
    pub fn enable_device(&mut self) -> Result<()> {
        self.ioctl(IoctlCmd::Enable, 0)?;
        self.hopper.device_bits |= DEVICE_ENABLED;
        Ok(())
    }

    /// Disable polled reporting.
    pub fn disable_device(&mut self) -> Result<()> {
        self.ioctl(IoctlCmd::Disable, 0)?;
        self.hopper.device_bits &= !DEVICE_ENABLED;
        Ok(())
    }

    /// Apply the device-type discriminator.
    pub fn set_type(&mut self) -> Result<()> {
        let device_type = self.device_type;
        self.ioctl(IoctlCmd::SetType, device_type).map(|_| ())
    }

    /// One wake of the polling thread: consume the latest change record, if
    /// any, and advance the FSM.
    pub fn poll_cycle(&mut self) -> Result<()> {
        let rec = self
            .transport
            .read()
            .map_err(|e| eyre::Report::new(map_hw_error_dyn(&*e)))
            .wrap_err("reading change record")?;
        match rec {
            Some(rec) => self.poll_record(rec),
            None => Ok(()),
        }
    }

    /// Advance the FSM with an externally supplied change record.
    ///
    /// Evaluates connectivity, charges the elapsed interval against the
    /// current phase countdown, then dispatches on the phase. Reads are
    /// destructive upstream, so every record passes through here exactly once.
    pub fn poll_record(&mut self, rec: ChangeRecord) -> Result<()> {
        let elapsed_ms = ticks_to_ms(rec.elapsed_ticks);
        let connected = self.probe_connectivity(&rec)?;
        self.coin_out.tick(elapsed_ms);
        tracing::trace!(
            old = rec.old_value,
            new = rec.new_value,
            elapsed_ms,
            connected,
            state = ?self.coin_out,
            "poll"
        );
        match self.coin_out {
            CoinOutState::WaitingForLeadingEdge { timer_ms } => {
                self.on_leading_wait(&rec, connected, timer_ms)
            }
            CoinOutState::WaitingForTrailingEdge { timer_ms } => {
                self.on_trailing_wait(&rec, connected, timer_ms)
            }
            CoinOutState::WaitingForTimeout { timer_ms } => {
                self.on_pause_wait(&rec, connected, timer_ms)
            }
            CoinOutState::WaitingForReset => {
                // Passive: re-evaluate connectivity only; exit requires reset().
                self.hopper.is_connected = connected;
                Ok(())
            }
        }
    }

    /// Evaluate connectivity for this poll cycle.
    ///
    /// Quiet time since the last observed register change accumulates; any
    /// change zeroes both the accumulator and the debounce run. Once the
    /// accumulation reaches the probe threshold a dedicated probe ioctl is
    /// issued each cycle. A positive probe counts toward the debounce run
    /// only while the live register reads exactly zero, because a
    /// disconnected device cannot independently assert bits; the verdict
    /// flips to disconnected only when the run reaches the debounce
    /// threshold, so a single noisy read cannot raise a false fault. A
    /// negative probe clears the run and the accumulator immediately.
    fn probe_connectivity(&mut self, rec: &ChangeRecord) -> Result<bool> {
        if rec.changed() {
            self.probe_acc_ms = 0;
            self.probe_debounce = 0;
            return Ok(true);
        }
        self.probe_acc_ms = self.probe_acc_ms.saturating_add(ticks_to_ms(rec.elapsed_ticks));
        if self.probe_acc_ms < i64::from(self.probe.after_ms) {
            return Ok(true);
        }
        let detached = self.ioctl(IoctlCmd::Probe, 0)? == 1;
        if detached && rec.new_value == 0 {
            self.probe_debounce = self.probe_debounce.saturating_add(1);
            tracing::trace!(run = self.probe_debounce, "positive disconnect probe");
            if self.probe_debounce >= self.probe.debounce {
                return Ok(false);
            }
        } else {
            self.probe_acc_ms = 0;
            self.probe_debounce = 0;
        }
        Ok(true)
    }

    fn on_leading_wait(
        &mut self,
        rec: &ChangeRecord,
        connected: bool,
        timer_ms: i64,
    ) -> Result<()> {
        if !connected {
            self.mark_disconnected();
            return Ok(());
        }
        if rec.leading_edge(COIN_OUT_BIT) {
            self.coin_out = CoinOutState::WaitingForTrailingEdge {
                timer_ms: i64::from(self.timing.max_blocked_ms),
            };
            if !self.hopper.motor_commanded() {
                // A coin started moving with the motor commanded off; force
                // the line low even though it should already be.
                if let Err(e) = self.motor_off() {
                    tracing::warn!(error = %e, "motor stop failed on unexpected leading edge");
                }
            }
            return Ok(());
        }
        if self.hopper.motor_commanded() && timer_ms == 0 {
            self.pause_retry_count += 1;
            if self.pause_retry_count >= self.timing.max_pause_retries {
                self.pause_retry_count = 0;
                if let Err(e) = self.motor_off() {
                    tracing::warn!(error = %e, "motor stop failed on empty fault");
                }
                self.coin_out = CoinOutState::WaitingForReset;
                self.raise_fault(HopperFault::Empty);
            } else {
                // Soft pause: release the motor line but keep the command
                // bit, so expiry can re-drive it.
                if let Err(e) = self.set_motor_line(false) {
                    tracing::warn!(error = %e, "motor release failed entering pause");
                }
                self.coin_out = CoinOutState::WaitingForTimeout {
                    timer_ms: i64::from(self.timing.pause_ms),
                };
                tracing::debug!(retry = self.pause_retry_count, "soft pause");
            }
        }
        Ok(())
    }

    fn on_trailing_wait(
        &mut self,
        rec: &ChangeRecord,
        connected: bool,
        timer_ms: i64,
    ) -> Result<()> {
        if !connected {
            self.mark_disconnected();
            return Ok(());
        }
        if rec.trailing_edge(COIN_OUT_BIT) {
            self.pause_retry_count = 0;
            self.coin_out = CoinOutState::WaitingForLeadingEdge {
                timer_ms: i64::from(self.timing.empty_ms),
            };
            self.record_coin();
            return Ok(());
        }
        if timer_ms == 0 {
            self.pause_retry_count = 0;
            if let Err(e) = self.motor_off() {
                tracing::warn!(error = %e, "motor stop failed on jam fault");
            }
            self.coin_out = CoinOutState::WaitingForReset;
            self.raise_fault(HopperFault::Jam);
        }
        Ok(())
    }

    fn on_pause_wait(&mut self, rec: &ChangeRecord, connected: bool, timer_ms: i64) -> Result<()> {
        if !connected {
            self.mark_disconnected();
            return Ok(());
        }
        if rec.leading_edge(COIN_OUT_BIT) {
            // A coin arrived mid-pause; resume immediately.
            self.coin_out = CoinOutState::WaitingForTrailingEdge {
                timer_ms: i64::from(self.timing.max_blocked_ms),
            };
            if self.hopper.motor_commanded()
                && let Err(e) = self.set_motor_line(true)
            {
                tracing::warn!(error = %e, "motor resume failed on mid-pause coin");
            }
            return Ok(());
        }
        if timer_ms == 0 {
            self.coin_out = CoinOutState::WaitingForLeadingEdge {
                timer_ms: i64::from(self.timing.empty_ms),
            };
            if self.hopper.motor_commanded()
                && let Err(e) = self.set_motor_line(true)
            {
                tracing::warn!(error = %e, "motor resume failed on pause expiry");
            }
        }
        Ok(())
    }

    /// Count one dispensed coin and classify its legality.
    fn record_coin(&mut self) {
        if self.hopper.motor_commanded() {
            self.emit(HopperEvent::CoinOut { legal: true });
            self.current_payout_count = self.current_payout_count.saturating_add(1);
            // Ceiling enforcement happens in the same transition as the coin
            // that reaches it.
            if self.current_payout_count >= self.max_payout_count {
                if let Err(e) = self.motor_off() {
                    tracing::warn!(error = %e, "motor stop failed at payout ceiling");
                }
                tracing::info!(paid = self.current_payout_count, "payout ceiling reached");
            }
        } else {
            if let Err(e) = self.motor_off() {
                tracing::warn!(error = %e, "motor stop failed on unpowered coin");
            }
            self.current_payout_count = self.current_payout_count.saturating_add(1);
            if self.current_payout_count <= self.max_payout_count {
                self.emit(HopperEvent::CoinOut { legal: true });
            } else {
                // Coin-out without an authorized dispense in progress.
                self.active_fault = Some(HopperFault::IllegalCoinOut);
                tracing::warn!(
                    paid = self.current_payout_count,
                    ceiling = self.max_payout_count,
                    "illegal coin out"
                );
                self.emit(HopperEvent::CoinOut { legal: false });
            }
        }
    }

    fn mark_disconnected(&mut self) {
        self.coin_out = CoinOutState::WaitingForReset;
        self.hopper.is_connected = false;
        self.raise_fault(HopperFault::Disconnected);
    }

    fn raise_fault(&mut self, fault: HopperFault) {
        self.active_fault = Some(fault);
        tracing::warn!(?fault, "hopper fault");
        self.emit(HopperEvent::Fault(fault));
    }

    fn emit(&self, event: HopperEvent) {
        tracing::debug!(?event, "hopper event");
        if self.events.send(event).is_err() {
            tracing::trace!("event receiver dropped");
        }
    }

    fn set_motor_line(&mut self, driven: bool) -> Result<()> {
        self.ioctl(IoctlCmd::Motor, u8::from(driven)).map(|_| ())
    }

    fn ioctl(&mut self, cmd: IoctlCmd, value: u8) -> Result<u8> {
        self.transport
            .ioctl(cmd, value)
            .map_err(|e| eyre::Report::new(map_hw_error_dyn(&*e)))
            .wrap_err_with(|| format!("ioctl {cmd:?}"))
    }
}

// Map any error to a typed HopperError, with special handling for hardware errors.
fn map_hw_error_dyn(e: &(dyn std::error::Error + 'static)) -> HopperError {
    #[cfg(feature = "hardware-errors")]
    if let Some(hw) = e.downcast_ref::<hopper_hardware::error::HwError>() {
        return match hw {
            hopper_hardware::error::HwError::Timeout => HopperError::Timeout,
            other => HopperError::HardwareFault(other.to_string()),
        };
    }
    let s = e.to_string();
    if s.to_lowercase().contains("timeout") {
        HopperError::Timeout
    } else {
        HopperError::Hardware(s)
    }
}

/// Public dynamic (boxed) hopper that preserves the command surface via
/// composition.
pub struct Hopper {
    inner: HopperCore<Box<dyn hopper_traits::Transport + Send>>,
}

impl core::fmt::Debug for Hopper {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.inner.fmt(f)
    }
}

impl Hopper {
    /// Start building a Hopper.
    pub fn builder() -> HopperBuilder<Missing> {
        HopperBuilder::default()
    }

    /// Route a tagged command from the owning adapter.
    pub fn dispatch(&mut self, command: HopperCommand) -> Result<()> {
        self.inner.dispatch(command)
    }

    /// Acknowledge faults and re-arm the state machine.
    pub fn reset(&mut self) -> Result<bool> {
        self.inner.reset()
    }

    /// Set the payout legality ceiling; zeroes the paid counter.
    pub fn set_max_payout(&mut self, count: u32) -> bool {
        self.inner.set_max_payout(count)
    }

    /// Locked snapshot read of the raw hardware register.
    pub fn status_report(&mut self) -> Result<u8> {
        self.inner.status_report()
    }

    /// One wake of the polling thread.
    pub fn poll_cycle(&mut self) -> Result<()> {
        self.inner.poll_cycle()
    }

    /// Advance the FSM with an externally supplied change record.
    pub fn poll_record(&mut self, rec: ChangeRecord) -> Result<()> {
        self.inner.poll_record(rec)
    }

    pub fn coin_out_state(&self) -> CoinOutState {
        self.inner.coin_out_state()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    pub fn active_fault(&self) -> Option<HopperFault> {
        self.inner.active_fault()
    }

    pub fn current_payout(&self) -> u32 {
        self.inner.current_payout()
    }

    pub fn max_payout(&self) -> u32 {
        self.inner.max_payout()
    }

    pub fn motor_commanded(&self) -> bool {
        self.inner.motor_commanded()
    }

    /// Unwrap into the generic core, e.g. to hand it to `poller::Poller`.
    pub fn into_core(self) -> HopperCore<Box<dyn hopper_traits::Transport + Send>> {
        self.inner
    }
}

// Type-state markers for the builder
pub struct Missing;
pub struct Set;

use std::marker::PhantomData;

/// Builder for `Hopper`. All fields are validated on `build()`.
pub struct HopperBuilder<T> {
    transport: Option<Box<dyn hopper_traits::Transport + Send>>,
    timing: Option<TimingCfg>,
    probe: Option<ProbeCfg>,
    device_type: Option<u8>,
    max_payout: Option<u32>,
    _t: PhantomData<T>,
}

impl Default for HopperBuilder<Missing> {
    fn default() -> Self {
        Self {
            transport: None,
            timing: None,
            probe: None,
            device_type: None,
            max_payout: None,
            _t: PhantomData,
        }
    }
}

impl<T> HopperBuilder<T> {
    /// Fallible build available in any type-state; returns a detailed
    /// BuildError for missing pieces.
    pub fn try_build(self) -> Result<(Hopper, EventReceiver)> {
        let HopperBuilder {
            transport,
            timing,
            probe,
            device_type,
            max_payout,
            _t: _,
        } = self;

        let transport = transport.ok_or_else(|| eyre::Report::new(BuildError::MissingTransport))?;
        let timing = timing.unwrap_or_default();
        let probe = probe.unwrap_or_default();
        let device_type = device_type.unwrap_or(2);
        // The legality ceiling defaults to deny: every payout must be
        // authorized through set_max_payout first.
        let max_payout = max_payout.unwrap_or(0);

        validate_cfg(&timing, &probe)?;

        let (inner, events) = assemble(transport, timing, probe, device_type, max_payout);
        Ok((Hopper { inner }, events))
    }

    pub fn with_timing(mut self, timing: TimingCfg) -> Self {
        self.timing = Some(timing);
        self
    }

    pub fn with_probe(mut self, probe: ProbeCfg) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn with_device_type(mut self, device_type: u8) -> Self {
        self.device_type = Some(device_type);
        self
    }

    pub fn with_max_payout(mut self, count: u32) -> Self {
        self.max_payout = Some(count);
        self
    }
}

impl HopperBuilder<Missing> {
    pub fn with_transport(
        self,
        transport: impl hopper_traits::Transport + Send + 'static,
    ) -> HopperBuilder<Set> {
        let HopperBuilder {
            transport: _,
            timing,
            probe,
            device_type,
            max_payout,
            _t: _,
        } = self;
        HopperBuilder {
            transport: Some(Box::new(transport)),
            timing,
            probe,
            device_type,
            max_payout,
            _t: PhantomData,
        }
    }
}

impl HopperBuilder<Set> {
    /// Validate and build the Hopper plus its event stream. Only available
    /// once a transport is set.
    pub fn build(self) -> Result<(Hopper, EventReceiver)> {
        self.try_build()
    }
}

fn validate_cfg(timing: &TimingCfg, probe: &ProbeCfg) -> Result<()> {
    if timing.max_blocked_ms == 0 {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "max_blocked_ms must be > 0",
        )));
    }
    if timing.empty_ms == 0 {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "empty_ms must be > 0",
        )));
    }
    if timing.pause_ms == 0 {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "pause_ms must be > 0",
        )));
    }
    if timing.max_pause_retries == 0 {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "max_pause_retries must be > 0",
        )));
    }
    if probe.after_ms == 0 {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "probe after_ms must be > 0",
        )));
    }
    if probe.debounce == 0 {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "probe debounce must be > 0",
        )));
    }
    Ok(())
}

fn assemble<T: hopper_traits::Transport>(
    transport: T,
    timing: TimingCfg,
    probe: ProbeCfg,
    device_type: u8,
    max_payout: u32,
) -> (HopperCore<T>, EventReceiver) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let core = HopperCore {
        transport,
        timing,
        probe,
        device_type,
        coin_out: CoinOutState::WaitingForLeadingEdge { timer_ms: 0 },
        hopper: HopperState {
            device_bits: 0,
            is_connected: true,
        },
        pause_retry_count: 0,
        current_payout_count: 0,
        max_payout_count: max_payout,
        active_fault: None,
        probe_acc_ms: 0,
        probe_debounce: 0,
        events: tx,
    };
    (core, rx)
}

/// Build a generic, statically-dispatched core from a concrete transport.
pub fn build_hopper<T>(
    transport: T,
    timing: TimingCfg,
    probe: ProbeCfg,
    device_type: u8,
    max_payout: u32,
) -> Result<(HopperCore<T>, EventReceiver)>
where
    T: hopper_traits::Transport + 'static,
{
    validate_cfg(&timing, &probe)?;
    Ok(assemble(transport, timing, probe, device_type, max_payout))
}
