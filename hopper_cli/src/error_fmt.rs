//! Human-readable error descriptions and structured JSON error formatting.

use crate::cli::LAST_LIMITS;
use crate::payout::abort_reason_name;

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    use hopper_core::error::{BuildError, HopperError};

    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingTransport => {
                "What happened: No transport was provided to the hopper driver.\nLikely causes: Hardware open failed or the builder was never given a transport.\nHow to fix: Ensure the device opens successfully and is passed via with_transport(...).".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun. See README for a sample."
            ),
        };
    }

    if let Some(he) = err.downcast_ref::<HopperError>() {
        // Specific domain cases first
        if matches!(he, HopperError::Timeout) {
            return "What happened: Device read timed out.\nLikely causes: Hopper unpowered, harness loose, or wait window too low.\nHow to fix: Check the harness and power, and consider increasing device.wait_ms in the config.".to_string();
        }
        if let HopperError::Abort(reason) = he {
            use hopper_core::error::AbortReason::*;
            return match reason {
                Empty => "What happened: The hopper ran out of coins mid-payout.\nLikely causes: Coin bowl empty, or coins bridging above the elevator.\nHow to fix: Refill the bowl and clear any bridge, then reset the device and retry.".to_string(),
                Jam => "What happened: A coin blocked the coin-out optic past the jam window.\nLikely causes: Bent coin wedged in the exit, or debris on the optic.\nHow to fix: Clear the coin path and wipe the optic, then reset the device.".to_string(),
                Disconnected => "What happened: The hopper stopped answering the connectivity probe.\nLikely causes: Hopper lifted out of its cradle, or harness unplugged.\nHow to fix: Re-seat the hopper, then reset the device.".to_string(),
                IllegalCoinOut => "What happened: A coin left the hopper without authorization.\nLikely causes: Coins coasting past a stopped wheel, or the motor driven outside a session.\nHow to fix: Inspect the drive train, then reset the device; the count is on the meter.".to_string(),
                MaxRuntime => "What happened: Max run time was exceeded.\nLikely causes: Slow dispensing, a high coin count, or stalls.\nHow to fix: Increase payout.max_run_ms or split the payout.".to_string(),
                Interrupted => "What happened: The payout was interrupted.\nLikely causes: Ctrl-C or a shutdown signal during the session.\nHow to fix: Re-run the payout; coins already paid stay on the meter.".to_string(),
            };
        }
        // Fallback to generic for other domain errors
        return format!(
            "What happened: {he}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
        );
    }

    // String-based heuristics for errors coming from init or config
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("gpio") {
        return "What happened: Failed to open the GPIO hopper.\nLikely causes: Incorrect [pins] values or insufficient GPIO permissions.\nHow to fix: Fix the [pins] values in the config; ensure the process has permission to access GPIO.".to_string();
    }

    if lower.contains("reading config") {
        return "What happened: The config file could not be read.\nLikely causes: Wrong --config path or missing file.\nHow to fix: Pass --config with the path to a hopper config TOML.".to_string();
    }

    if lower.contains("parsing config") || lower.contains("must be >=") || lower.contains("must not be empty") {
        return "What happened: Configuration is invalid or incomplete.\nLikely causes: Malformed TOML or out-of-range values in [device], [timing], [probe] or [payout].\nHow to fix: Edit the TOML config and try again.".to_string();
    }

    // Trace CSV header special-case
    if lower.contains("trace csv must have headers") {
        return "Invalid headers in trace CSV. Expected 'elapsed_ms,value'.".to_string();
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Map AbortReason (if present) to stable exit codes; other errors return 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    use hopper_core::error::{AbortReason, HopperError};
    if let Some(HopperError::Abort(reason)) = err.downcast_ref::<HopperError>() {
        return match reason {
            AbortReason::Interrupted => 2,
            AbortReason::Empty => 3,
            AbortReason::Jam => 4,
            AbortReason::Disconnected => 5,
            AbortReason::IllegalCoinOut => 6,
            AbortReason::MaxRuntime => 7,
        };
    }
    1
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use hopper_core::error::{AbortReason, HopperError};
    use serde_json::json;

    if let Some(HopperError::Abort(reason)) = err.downcast_ref::<HopperError>() {
        let msg = humanize(err);
        let details = LAST_LIMITS.get();
        let reason_name = abort_reason_name(reason);

        let detail_obj = match reason {
            AbortReason::MaxRuntime => details.map(|l| json!({ "max_run_ms": l.max_run_ms })),
            AbortReason::Empty => details.map(|l| {
                json!({ "pause_ms": l.pause_ms, "max_pause_retries": l.max_pause_retries })
            }),
            _ => None,
        };

        let obj = if let Some(d) = detail_obj {
            json!({ "reason": reason_name, "details": d, "message": msg })
        } else {
            json!({ "reason": reason_name, "message": msg })
        };
        return obj.to_string();
    }

    // Generic error JSON
    json!({ "reason": "Error", "message": humanize(err) }).to_string()
}
