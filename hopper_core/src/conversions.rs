//! `From` implementations bridging `hopper_config` types to `hopper_core` types.
//!
//! These keep field-by-field config mapping out of the CLI.

use crate::{HopperBinding, ProbeCfg, TimingCfg};

// ── TimingCfg ────────────────────────────────────────────────────────────────

impl From<&hopper_config::Timing> for TimingCfg {
    fn from(c: &hopper_config::Timing) -> Self {
        Self {
            max_blocked_ms: c.max_blocked_ms,
            empty_ms: c.empty_ms,
            pause_ms: c.pause_ms,
            max_pause_retries: c.max_pause_retries,
        }
    }
}

// ── ProbeCfg ─────────────────────────────────────────────────────────────────

impl From<&hopper_config::Probe> for ProbeCfg {
    fn from(c: &hopper_config::Probe) -> Self {
        Self {
            after_ms: c.after_ms,
            debounce: c.debounce,
        }
    }
}

// ── HopperBinding ────────────────────────────────────────────────────────────

impl From<&hopper_config::Device> for HopperBinding {
    fn from(c: &hopper_config::Device) -> Self {
        Self {
            vendor: c.vendor.clone(),
            model: c.model.clone(),
            interface: c.interface.clone(),
            device_type: c.device_type,
            poll_ms: c.poll_ms,
            wait_ms: c.wait_ms,
        }
    }
}
