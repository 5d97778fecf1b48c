//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();
/// Effective session limits for the current run (for JSON error details).
pub static LAST_LIMITS: OnceLock<CliLimits> = OnceLock::new();

#[derive(Copy, Clone, Debug)]
pub struct CliLimits {
    pub max_run_ms: u64,
    pub settle_ms: u64,
    pub pause_ms: u32,
    pub max_pause_retries: u32,
}

#[derive(Parser, Debug)]
#[command(name = "hopper", version, about = "Hopper CLI")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/hopper_config.toml")]
    pub config: PathBuf,

    /// Log as JSON lines instead of pretty
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); defaults to
    /// [logging].level from the config
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Memory locking mode for real-time operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum RtLock {
    /// Do not lock memory
    None,
    /// Lock currently resident pages
    Current,
    /// Lock current and future pages
    All,
}

impl RtLock {
    #[inline]
    pub fn os_default() -> Self {
        #[cfg(target_os = "linux")]
        {
            return RtLock::Current;
        }
        #[cfg(target_os = "macos")]
        {
            return RtLock::None;
        }
        #[allow(unreachable_code)]
        RtLock::None
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Dispense coins against the payout ceiling
    Payout {
        /// Number of coins to dispense
        #[arg(long)]
        coins: u32,
        /// Override [payout].max_run_ms: hard cap on session runtime
        #[arg(long, value_name = "MS")]
        max_run_ms: Option<u64>,
        /// Override [payout].settle_ms: coast-coin watch window after the
        /// last expected coin
        #[arg(long, value_name = "MS")]
        settle_ms: Option<u64>,
        /// Enable real-time mode (SCHED_FIFO, affinity, mlockall)
        #[arg(
            long,
            action = ArgAction::SetTrue,
            long_help = "Enable real-time mode on supported OSes.\n\nLinux: Attempts SCHED_FIFO priority, pins to CPU 0, and calls mlockall(MCL_CURRENT|MCL_FUTURE) to lock the process address space into RAM. This reduces page faults and poll jitter but can impact overall system performance and may require elevated privileges or ulimits (e.g., memlock). Use with care on shared systems.\n\nmacOS: Only mlockall is applied; SCHED_FIFO/affinity are unavailable. Locking memory can increase pressure on the OS memory manager."
        )]
        rt: bool,
        /// Real-time priority for SCHED_FIFO on Linux (1..=max); ignored on macOS
        #[arg(
            long,
            value_name = "PRIO",
            long_help = "SCHED_FIFO priority when --rt is enabled (Linux only). Higher values run before lower ones. Range is platform-defined (usually 1..=99). Use with care; very high priorities can impact system stability."
        )]
        rt_prio: Option<i32>,
        /// Select memory locking mode for --rt: none, current, or all
        #[arg(
            long,
            value_enum,
            value_name = "MODE",
            long_help = "Select memory locking mode when --rt is enabled.\n- none: do not lock memory.\n- current: lock currently resident pages (mlockall(MCL_CURRENT)).\n- all: lock current and future pages (mlockall(MCL_CURRENT|MCL_FUTURE)).\nDefault: current on Linux, none on macOS."
        )]
        rt_lock: Option<RtLock>,
        /// Real-time CPU index to pin the process to (Linux only). If not set, defaults to 0.
        #[arg(
            long,
            value_name = "CPU",
            long_help = "Select the CPU index to pin the process to when --rt is enabled (Linux only). Defaults to 0. The value must be allowed by the current affinity mask; otherwise affinity will be left unchanged and a warning is logged."
        )]
        rt_cpu: Option<usize>,
        /// Run the poll loop inline and print latency stats
        #[arg(long, action = ArgAction::SetTrue)]
        stats: bool,
    },
    /// Connectivity, register and fault snapshot
    Status,
    /// Quick plumbing check (open, initialize, reset, one status read)
    SelfCheck,
    /// Decode a recorded register trace and print the event stream
    Replay {
        /// Trace CSV with headers 'elapsed_ms,value'
        #[arg(long, value_name = "FILE")]
        trace: PathBuf,
    },
}
