#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas and register-trace parsing for the hopper driver.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - Register trace CSV loader enforces headers; traces feed the simulated
//!   transport for replay and diagnostics.
use serde::Deserialize;

/// Register trace CSV schema.
///
/// Expected headers:
/// elapsed_ms,value
///
/// Example:
/// elapsed_ms,value
/// 120,1
/// 35,0
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct TraceRow {
    /// Interval covered by this step, in milliseconds.
    pub elapsed_ms: u32,
    /// Register value at the end of the step.
    pub value: u8,
}

/// Device identity used to open the transport for a hopper variant.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Device {
    pub vendor: String,
    pub model: String,
    /// Interface id, e.g. a device node path.
    pub interface: String,
    /// Device-type discriminator applied during initialization.
    pub device_type: u8,
    /// Poll cadence of the background loop.
    pub poll_ms: u64,
    /// Per-cycle wait on the raw device.
    pub wait_ms: u64,
}

impl Default for Device {
    fn default() -> Self {
        Self {
            vendor: "Aristocrat".to_string(),
            model: "Coin Hopper".to_string(),
            interface: "sim".to_string(),
            device_type: 2,
            poll_ms: 5,
            wait_ms: 20,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct Timing {
    /// Max time the coin-out optic may stay blocked before a jam is raised.
    pub max_blocked_ms: u32,
    /// Max gap between coins while the motor is driven before a pause retry.
    pub empty_ms: u32,
    /// Motor rest window of one soft pause.
    pub pause_ms: u32,
    /// Consecutive pause retries before the hopper is declared empty.
    pub max_pause_retries: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            max_blocked_ms: 100,
            empty_ms: 300,
            pause_ms: 1500,
            max_pause_retries: 3,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct Probe {
    /// Quiet time on the register before connectivity probing starts.
    pub after_ms: u32,
    /// Consecutive zero-register positive probes required to flag a
    /// disconnect.
    pub debounce: u32,
}

impl Default for Probe {
    fn default() -> Self {
        Self {
            after_ms: 5000,
            debounce: 3,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct Payout {
    /// Ceiling applied when a session does not set one explicitly.
    pub default_max: u32,
    /// Hard cap on one payout session's runtime.
    pub max_run_ms: u64,
    /// Window after the last expected coin to watch for coast coins.
    pub settle_ms: u64,
}

impl Default for Payout {
    fn default() -> Self {
        Self {
            default_max: 200,
            max_run_ms: 30_000,
            settle_ms: 250,
        }
    }
}

/// Behavior of the simulated transport.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SimMode {
    /// Dispense coins while the motor is driven.
    #[default]
    Normal,
    /// Never produce a pulse (hopper out of coins).
    Empty,
    /// First pulse sticks high (coin wedged in the optic).
    Jam,
    /// Act unplugged: zero register, probe reports detached.
    Disconnected,
    /// Every transport call fails with a hardware timeout.
    Flaky,
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct Sim {
    pub mode: SimMode,
    /// Coin cadence while the motor is driven.
    pub pulse_period_ms: u32,
    /// High time of each coin pulse.
    pub pulse_width_ms: u32,
}

impl Default for Sim {
    fn default() -> Self {
        Self {
            mode: SimMode::Normal,
            pulse_period_ms: 40,
            pulse_width_ms: 12,
        }
    }
}

/// GPIO pin assignment for the `hardware` feature.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct Pins {
    pub coin_in: u8,
    pub motor: u8,
    pub enable: Option<u8>,
    /// Presence input used by the connectivity probe; absent means the probe
    /// always reports attached.
    pub presence: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub device: Device,
    pub timing: Timing,
    pub probe: Probe,
    pub payout: Payout,
    pub sim: Sim,
    pub logging: Logging,
    /// Required only when the binary is built with the `hardware` feature.
    pub pins: Option<Pins>,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Device
        if self.device.poll_ms == 0 {
            eyre::bail!("device.poll_ms must be >= 1");
        }
        if self.device.wait_ms == 0 {
            eyre::bail!("device.wait_ms must be >= 1");
        }
        if self.device.vendor.is_empty() {
            eyre::bail!("device.vendor must not be empty");
        }

        // Timing
        if self.timing.max_blocked_ms == 0 {
            eyre::bail!("timing.max_blocked_ms must be >= 1");
        }
        if self.timing.empty_ms == 0 {
            eyre::bail!("timing.empty_ms must be >= 1");
        }
        if self.timing.pause_ms == 0 {
            eyre::bail!("timing.pause_ms must be >= 1");
        }
        if self.timing.pause_ms > 60_000 {
            eyre::bail!("timing.pause_ms is unreasonably large (>60s)");
        }
        if self.timing.max_pause_retries == 0 {
            eyre::bail!("timing.max_pause_retries must be >= 1");
        }

        // Probe
        if self.probe.after_ms == 0 {
            eyre::bail!("probe.after_ms must be >= 1");
        }
        if self.probe.debounce == 0 {
            eyre::bail!("probe.debounce must be >= 1");
        }

        // Payout
        if self.payout.default_max == 0 {
            eyre::bail!("payout.default_max must be >= 1");
        }
        if self.payout.max_run_ms == 0 {
            eyre::bail!("payout.max_run_ms must be >= 1");
        }
        if self.payout.max_run_ms > 60 * 60 * 1000 {
            eyre::bail!("payout.max_run_ms is unreasonably large (>1h)");
        }

        // Sim
        if self.sim.pulse_period_ms == 0 {
            eyre::bail!("sim.pulse_period_ms must be >= 1");
        }
        if self.sim.pulse_width_ms == 0 {
            eyre::bail!("sim.pulse_width_ms must be >= 1");
        }
        if self.sim.pulse_width_ms >= self.sim.pulse_period_ms {
            eyre::bail!("sim.pulse_width_ms must be < sim.pulse_period_ms");
        }

        Ok(())
    }
}

/// A parsed register trace: validated steps plus the total span.
#[derive(Debug, Clone)]
pub struct RegisterTrace {
    pub rows: Vec<TraceRow>,
}

impl RegisterTrace {
    pub fn from_rows(rows: Vec<TraceRow>) -> eyre::Result<Self> {
        if rows.is_empty() {
            eyre::bail!("register trace requires at least one row");
        }
        for (idx, row) in rows.iter().enumerate() {
            if row.elapsed_ms == 0 {
                eyre::bail!("register trace row {} has zero elapsed_ms", idx + 2);
            }
        }
        Ok(Self { rows })
    }

    /// Total time covered by the trace, in milliseconds.
    pub fn span_ms(&self) -> u64 {
        self.rows.iter().map(|r| u64::from(r.elapsed_ms)).sum()
    }
}

impl TryFrom<Vec<TraceRow>> for RegisterTrace {
    type Error = eyre::Report;
    fn try_from(rows: Vec<TraceRow>) -> Result<Self, Self::Error> {
        Self::from_rows(rows)
    }
}

pub fn load_trace_csv(path: &std::path::Path) -> eyre::Result<RegisterTrace> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open trace CSV {:?}: {}", path, e))?;

    // Enforce exact headers
    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["elapsed_ms", "value"];
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != expected {
        eyre::bail!(
            "trace CSV must have headers 'elapsed_ms,value', got: {}",
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<TraceRow>().enumerate() {
        match rec {
            Ok(row) => rows.push(row),
            Err(e) => {
                eyre::bail!("invalid CSV row {}: {}", idx + 2, e);
            }
        }
    }

    RegisterTrace::try_from(rows)
}
