//! Background device polling utilities.
//!
//! Spawns a thread that owns the `HopperCore` behind a mutex, runs one
//! poll cycle per period, and re-exposes the core's command surface
//! through the same lock. Events decoded by the core arrive on the
//! receiver handed out when the core was built.
//!
//! Safety: Each `Poller` spawns exactly one thread that is automatically
//! shut down when the `Poller` is dropped, preventing thread leaks.
use crate::error::Report;
use crate::{HopperCommand, HopperCore, HopperFault};
use hopper_traits::Transport;
use hopper_traits::clock::Clock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// A poisoned core still holds consistent state; the panic that poisoned
/// it happened outside the driver, so recover the guard and keep going.
fn lock_core<T: Transport>(core: &Mutex<HopperCore<T>>) -> MutexGuard<'_, HopperCore<T>> {
    core.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn lock_error(slot: &Mutex<Option<Report>>) -> MutexGuard<'_, Option<Report>> {
    slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

pub struct Poller<T: Transport + Send + 'static> {
    core: Arc<Mutex<HopperCore<T>>>,
    /// Shutdown flag for immediate response (atomic for lock-free check)
    shutdown: Arc<AtomicBool>,
    /// Join handle for graceful thread cleanup
    join_handle: Option<std::thread::JoinHandle<()>>,
    last_error: Arc<Mutex<Option<Report>>>,
}

impl<T: Transport + Send + 'static> Poller<T> {
    pub fn spawn<C: Clock + Send + Sync + 'static>(
        core: HopperCore<T>,
        poll_period: Duration,
        clock: C,
    ) -> Self {
        let core = Arc::new(Mutex::new(core));
        let core_clone = core.clone();
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let last_error = Arc::new(Mutex::new(None));
        let last_error_clone = last_error.clone();

        let join_handle = std::thread::spawn(move || {
            loop {
                // Immediate shutdown check (lock-free atomic)
                if shutdown_clone.load(Ordering::Relaxed) {
                    tracing::debug!("Poller thread received shutdown signal");
                    break;
                }

                if let Err(e) = lock_core(&core_clone).poll_cycle() {
                    tracing::warn!(error = %e, "poll cycle failed");
                    *lock_error(&last_error_clone) = Some(e);
                }

                // Check shutdown before sleep to avoid unnecessary delay
                if shutdown_clone.load(Ordering::Relaxed) {
                    break;
                }
                clock.sleep(poll_period);
            }
            tracing::trace!("Poller thread exiting cleanly");
        });

        Self {
            core,
            shutdown,
            join_handle: Some(join_handle),
            last_error,
        }
    }

    /// Route a host command to the core.
    pub fn dispatch(&self, command: HopperCommand) -> crate::error::Result<()> {
        lock_core(&self.core).dispatch(command)
    }

    pub fn reset(&self) -> crate::error::Result<bool> {
        lock_core(&self.core).reset()
    }

    pub fn set_max_payout(&self, count: u32) -> bool {
        lock_core(&self.core).set_max_payout(count)
    }

    pub fn motor_start(&self) -> crate::error::Result<()> {
        lock_core(&self.core).motor_on()
    }

    pub fn motor_stop(&self) -> crate::error::Result<()> {
        lock_core(&self.core).motor_off()
    }

    pub fn status_report(&self) -> crate::error::Result<u8> {
        lock_core(&self.core).status_report()
    }

    pub fn is_connected(&self) -> bool {
        lock_core(&self.core).is_connected()
    }

    pub fn active_fault(&self) -> Option<HopperFault> {
        lock_core(&self.core).active_fault()
    }

    pub fn current_payout(&self) -> u32 {
        lock_core(&self.core).current_payout()
    }

    /// Last transport error seen by the polling thread, if any.
    ///
    /// Taking it clears the slot; a healthy loop returns `None`.
    pub fn take_error(&self) -> Option<Report> {
        lock_error(&self.last_error).take()
    }
}

impl<T: Transport + Send + 'static> Drop for Poller<T> {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);

        // The thread exits between poll cycles; a blocking transport read
        // delays the join by at most one device wait period.
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => {
                    tracing::trace!("Poller thread joined successfully");
                }
                Err(e) => {
                    // Thread panicked; log but don't propagate (we're in Drop)
                    tracing::warn!(?e, "Poller thread panicked during shutdown");
                }
            }
        }
    }
}
