//! Payout session orchestration.
//!
//! Drives one coin payout through a [`Poller`]: authorizes the ceiling,
//! starts the motor, then consumes decoded events until the requested
//! coins are paid, a fault aborts the run, or a deadline fires. After
//! the last expected coin a short settle window watches for coast coins
//! so the outcome reports everything the hopper actually dispensed.
use crate::error::{AbortReason, HopperError, Report, Result as CoreResult};
use crate::poller::Poller;
use crate::{EventReceiver, HopperEvent};
use hopper_traits::Transport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Granularity of deadline and shutdown checks while waiting on the
/// event channel.
const EVENT_TICK: Duration = Duration::from_millis(10);

/// One payout request.
#[derive(Debug, Clone, Copy)]
pub struct PayoutParams {
    /// Coins to dispense; also becomes the legality ceiling for the run.
    pub coins: u32,
    /// Hard cap on the session's runtime.
    pub max_run_ms: u64,
    /// Window after the last expected coin to watch for coast coins.
    pub settle_ms: u64,
}

/// What a finished session actually dispensed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayoutOutcome {
    /// Coins paid under the ceiling.
    pub paid: u32,
    /// Coast coins seen past the ceiling. Nonzero means the meters need
    /// reconciling even though the session completed.
    pub illegal: u32,
    pub elapsed_ms: u64,
}

/// Run one payout to completion or abort.
///
/// The poller keeps decoding in the background; this function only
/// issues commands and consumes events. A latched fault from an earlier
/// run must be cleared with a device reset before a new session starts.
/// Aborts report a typed [`AbortReason`] and stop the motor; coins paid
/// before the abort stay on the core's meter and can be read back with
/// [`Poller::current_payout`].
pub fn run_payout<T: Transport + Send + 'static>(
    poller: &Poller<T>,
    events: &EventReceiver,
    params: PayoutParams,
    shutdown: &AtomicBool,
) -> CoreResult<PayoutOutcome> {
    if params.coins == 0 {
        return Err(Report::new(HopperError::State(
            "payout of zero coins".into(),
        )));
    }
    if let Some(fault) = poller.active_fault() {
        return Err(Report::new(HopperError::State(format!(
            "unresolved fault {fault:?}, device reset required"
        ))));
    }

    // Events left over from earlier activity belong to no session.
    while events.try_recv().is_ok() {}

    poller.set_max_payout(params.coins);
    poller.motor_start()?;
    tracing::info!(coins = params.coins, "payout start");

    let start = Instant::now();
    let mut paid: u32 = 0;
    let mut illegal: u32 = 0;

    loop {
        let elapsed_ms: u64 = {
            let ms = start.elapsed().as_millis();
            (ms.min(u128::from(u64::MAX))) as u64
        };
        if shutdown.load(Ordering::Relaxed) {
            return abort(poller, AbortReason::Interrupted);
        }
        if let Some(e) = poller.take_error() {
            let _ = poller.motor_stop();
            return Err(e.wrap_err("payout polling failed"));
        }
        if elapsed_ms >= params.max_run_ms {
            return abort(poller, AbortReason::MaxRuntime);
        }

        match events.recv_timeout(EVENT_TICK) {
            Ok(HopperEvent::CoinOut { legal: true }) => {
                paid += 1;
                if paid >= params.coins {
                    break;
                }
            }
            Ok(HopperEvent::CoinOut { legal: false }) => {
                illegal += 1;
                return abort(poller, AbortReason::IllegalCoinOut);
            }
            Ok(HopperEvent::Fault(fault)) => {
                return abort(poller, fault.into());
            }
            Ok(HopperEvent::FaultCleared) => {}
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                return Err(Report::new(HopperError::State(
                    "event channel closed".into(),
                )));
            }
        }
    }

    // The core stopped the motor in the same transition as the ceiling
    // coin; what remains is counting whatever coasts out of the optic.
    let settle_start = Instant::now();
    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        let spent = settle_start.elapsed();
        let Some(remaining) = Duration::from_millis(params.settle_ms).checked_sub(spent) else {
            break;
        };
        match events.recv_timeout(remaining.min(EVENT_TICK)) {
            Ok(HopperEvent::CoinOut { legal: false }) => {
                illegal += 1;
            }
            Ok(HopperEvent::CoinOut { legal: true }) => {
                paid = paid.saturating_add(1);
            }
            Ok(HopperEvent::Fault(fault)) => {
                // Coins are already paid; latch the fault for the next
                // session instead of discarding the outcome.
                tracing::warn!(?fault, "fault during settle window");
                break;
            }
            Ok(HopperEvent::FaultCleared) => {}
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
    }

    let elapsed_ms: u64 = {
        let ms = start.elapsed().as_millis();
        (ms.min(u128::from(u64::MAX))) as u64
    };
    tracing::info!(paid, illegal, elapsed_ms, "payout complete");
    Ok(PayoutOutcome {
        paid,
        illegal,
        elapsed_ms,
    })
}

fn abort<T: Transport + Send + 'static>(
    poller: &Poller<T>,
    reason: AbortReason,
) -> CoreResult<PayoutOutcome> {
    let _ = poller.motor_stop();
    tracing::error!(error = %reason, "payout aborted");
    Err(Report::new(HopperError::Abort(reason)))
}
