//! Command execution: config mapping, transport assembly, and payout runs.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

#[cfg(all(feature = "hardware", target_os = "linux"))]
use eyre::WrapErr;
use hopper_config::Config;
use hopper_core::error::{AbortReason, HopperError, Report, Result as CoreResult};
use hopper_core::poller::Poller;
use hopper_core::session::{PayoutOutcome, PayoutParams, run_payout};
use hopper_core::{
    EventReceiver, HopperBinding, HopperCore, HopperEvent, ProbeCfg, TimingCfg, build_hopper,
};
use hopper_traits::Transport;
use hopper_traits::clock::MonotonicClock;

use crate::cli::{CliLimits, LAST_LIMITS, RtLock};
use crate::rt::setup_rt_once;

/// `payout` flags bundled for [`run`].
pub struct PayoutArgs {
    pub coins: u32,
    pub max_run_ms: Option<u64>,
    pub settle_ms: Option<u64>,
    pub rt: bool,
    pub rt_prio: Option<i32>,
    pub rt_lock: Option<RtLock>,
    pub rt_cpu: Option<usize>,
    pub stats: bool,
}

pub fn abort_reason_name(r: &AbortReason) -> &'static str {
    use AbortReason::*;
    match r {
        Empty => "Empty",
        Jam => "Jam",
        Disconnected => "Disconnected",
        IllegalCoinOut => "IllegalCoinOut",
        MaxRuntime => "MaxRuntime",
        Interrupted => "Interrupted",
    }
}

fn sim_mode(mode: hopper_config::SimMode) -> hopper_hardware::SimMode {
    match mode {
        hopper_config::SimMode::Normal => hopper_hardware::SimMode::Normal,
        hopper_config::SimMode::Empty => hopper_hardware::SimMode::Empty,
        hopper_config::SimMode::Jam => hopper_hardware::SimMode::Jam,
        hopper_config::SimMode::Disconnected => hopper_hardware::SimMode::Disconnected,
        hopper_config::SimMode::Flaky => hopper_hardware::SimMode::Flaky,
    }
}

/// Open the transport named by the device binding's interface.
pub fn open_transport(cfg: &Config) -> CoreResult<Box<dyn Transport + Send>> {
    let binding: HopperBinding = (&cfg.device).into();
    tracing::debug!(
        vendor = %binding.vendor,
        model = %binding.model,
        interface = %binding.interface,
        "opening hopper transport"
    );
    match binding.interface.as_str() {
        "sim" => {
            let sim = hopper_hardware::SimHopper::new(
                sim_mode(cfg.sim.mode),
                u64::from(cfg.sim.pulse_period_ms),
                u64::from(cfg.sim.pulse_width_ms),
            );
            Ok(Box::new(sim))
        }
        "gpio" => {
            #[cfg(all(feature = "hardware", target_os = "linux"))]
            {
                let pins = cfg.pins.ok_or_else(|| {
                    Report::new(HopperError::Config(
                        "[pins] is required for the gpio interface".into(),
                    ))
                })?;
                let hopper = hopper_hardware::gpio::GpioHopper::open(
                    pins.coin_in,
                    pins.motor,
                    pins.enable,
                    pins.presence,
                    Duration::from_millis(binding.wait_ms),
                )
                .wrap_err("opening gpio hopper")?;
                Ok(Box::new(hopper))
            }
            #[cfg(not(all(feature = "hardware", target_os = "linux")))]
            {
                Err(Report::new(HopperError::Config(
                    "gpio interface requires a Linux build with the `hardware` feature".into(),
                )))
            }
        }
        other => Err(Report::new(HopperError::Config(format!(
            "unknown device interface {other:?}"
        )))),
    }
}

fn assemble(
    cfg: &Config,
    transport: Box<dyn Transport + Send>,
    max_payout: u32,
) -> CoreResult<(HopperCore<Box<dyn Transport + Send>>, EventReceiver)> {
    // Map config sections via the From impls in conversions
    let timing: TimingCfg = (&cfg.timing).into();
    let probe: ProbeCfg = (&cfg.probe).into();
    let (mut core, events) = build_hopper(
        transport,
        timing,
        probe,
        cfg.device.device_type,
        max_payout,
    )?;
    core.initialize_device()?;
    Ok((core, events))
}

/// Run one payout session on the configured transport.
pub fn run(
    cfg: &Config,
    transport: Box<dyn Transport + Send>,
    args: &PayoutArgs,
    shutdown: &Arc<AtomicBool>,
) -> CoreResult<PayoutOutcome> {
    // Real-time mode setup (Linux/macOS), applied once per process
    #[cfg(target_os = "linux")]
    {
        let mode = args.rt_lock.unwrap_or(RtLock::os_default());
        setup_rt_once(args.rt, args.rt_prio, mode, args.rt_cpu);
    }
    #[cfg(target_os = "macos")]
    {
        let mode = args.rt_lock.unwrap_or(RtLock::os_default());
        let _rt_prio = args.rt_prio; // silence unused on non-Linux builds
        let _rt_cpu = args.rt_cpu; // silence unused on non-Linux builds
        setup_rt_once(args.rt, mode);
    }

    if args.coins == 0 {
        return Err(Report::new(HopperError::State(
            "payout of zero coins".into(),
        )));
    }

    let params = PayoutParams {
        coins: args.coins,
        max_run_ms: args.max_run_ms.unwrap_or(cfg.payout.max_run_ms),
        settle_ms: args.settle_ms.unwrap_or(cfg.payout.settle_ms),
    };
    let _ = LAST_LIMITS.set(CliLimits {
        max_run_ms: params.max_run_ms,
        settle_ms: params.settle_ms,
        pause_ms: cfg.timing.pause_ms,
        max_pause_retries: cfg.timing.max_pause_retries,
    });

    // The session sets its own ceiling from params.coins.
    let (core, events) = assemble(cfg, transport, 0)?;
    let poll_period = Duration::from_millis(cfg.device.poll_ms.max(1));

    if args.stats {
        run_inline(core, &events, params, poll_period, shutdown)
    } else {
        let poller = Poller::spawn(core, poll_period, MonotonicClock::new());
        run_payout(&poller, &events, params, shutdown)
    }
}

/// Inline poll loop with latency stats.
///
/// Mirrors the session runner but keeps the poll cycle on the caller's
/// thread so each cycle can be timed against the poll period.
fn run_inline(
    mut core: HopperCore<Box<dyn Transport + Send>>,
    events: &EventReceiver,
    params: PayoutParams,
    poll_period: Duration,
    shutdown: &Arc<AtomicBool>,
) -> CoreResult<PayoutOutcome> {
    let period_us = (poll_period.as_micros().min(u128::from(u64::MAX))) as u64;
    let mut latencies: Vec<u64> = Vec::new();
    let mut missed_deadlines = 0usize;
    let mut sample_count = 0usize;

    #[inline]
    fn record_sample(
        latencies: &mut Vec<u64>,
        missed_deadlines: &mut usize,
        period_us: u64,
        t_start: Instant,
    ) {
        let latency = (t_start.elapsed().as_micros().min(u128::from(u64::MAX))) as u64;
        latencies.push(latency);
        if latency > period_us {
            *missed_deadlines = missed_deadlines.saturating_add(1);
        }
    }

    core.set_max_payout(params.coins);
    core.motor_on()?;
    tracing::info!(coins = params.coins, mode = "inline", "payout start");

    let start = Instant::now();
    let mut paid: u32 = 0;
    let mut illegal: u32 = 0;

    loop {
        if shutdown.load(Ordering::Relaxed) {
            return abort_inline(&mut core, AbortReason::Interrupted);
        }
        let elapsed_ms: u64 = {
            let ms = start.elapsed().as_millis();
            (ms.min(u128::from(u64::MAX))) as u64
        };
        if elapsed_ms >= params.max_run_ms {
            return abort_inline(&mut core, AbortReason::MaxRuntime);
        }

        let t_start = Instant::now();
        if let Err(e) = core.poll_cycle() {
            let _ = core.motor_off();
            return Err(e.wrap_err("payout polling failed"));
        }
        record_sample(&mut latencies, &mut missed_deadlines, period_us, t_start);
        sample_count += 1;

        let mut done = false;
        while let Ok(ev) = events.try_recv() {
            match ev {
                HopperEvent::CoinOut { legal: true } => {
                    paid += 1;
                    if paid >= params.coins {
                        done = true;
                    }
                }
                HopperEvent::CoinOut { legal: false } => {
                    illegal = illegal.saturating_add(1);
                    return abort_inline(&mut core, AbortReason::IllegalCoinOut);
                }
                HopperEvent::Fault(fault) => {
                    return abort_inline(&mut core, fault.into());
                }
                HopperEvent::FaultCleared => {}
            }
        }
        if done {
            break;
        }
        std::thread::sleep(poll_period);
    }

    // The core stopped the motor on the ceiling coin; keep polling through
    // the settle window and count whatever coasts out of the optic.
    let settle = Duration::from_millis(params.settle_ms);
    let settle_start = Instant::now();
    'settle: while settle_start.elapsed() < settle {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        let t_start = Instant::now();
        if let Err(e) = core.poll_cycle() {
            let _ = core.motor_off();
            return Err(e.wrap_err("payout polling failed"));
        }
        record_sample(&mut latencies, &mut missed_deadlines, period_us, t_start);
        sample_count += 1;
        while let Ok(ev) = events.try_recv() {
            match ev {
                HopperEvent::CoinOut { legal: false } => {
                    illegal = illegal.saturating_add(1);
                }
                HopperEvent::CoinOut { legal: true } => {
                    paid = paid.saturating_add(1);
                }
                HopperEvent::Fault(fault) => {
                    tracing::warn!(?fault, "fault during settle window");
                    break 'settle;
                }
                HopperEvent::FaultCleared => {}
            }
        }
        std::thread::sleep(poll_period);
    }

    let elapsed_ms: u64 = {
        let ms = start.elapsed().as_millis();
        (ms.min(u128::from(u64::MAX))) as u64
    };
    tracing::info!(paid, illegal, elapsed_ms, "payout complete");
    if !latencies.is_empty() {
        print_stats(&latencies, sample_count, missed_deadlines, period_us);
    }
    Ok(PayoutOutcome {
        paid,
        illegal,
        elapsed_ms,
    })
}

fn abort_inline(
    core: &mut HopperCore<Box<dyn Transport + Send>>,
    reason: AbortReason,
) -> CoreResult<PayoutOutcome> {
    let _ = core.motor_off();
    tracing::error!(error = %reason, "payout aborted");
    Err(Report::new(HopperError::Abort(reason)))
}

/// Print a connectivity / register / fault snapshot.
pub fn status(cfg: &Config, transport: Box<dyn Transport + Send>) -> CoreResult<()> {
    let (mut core, _events) = assemble(cfg, transport, cfg.payout.default_max)?;
    // reset() carries the authoritative connectivity probe.
    core.reset()?;
    let register = core.status_report()?;
    let connected = core.is_connected();
    let fault = core.active_fault();
    if crate::json_mode() {
        let obj = serde_json::json!({
            "connected": connected,
            "register": register,
            "fault": fault.map(|f| format!("{f:?}")),
        });
        println!("{obj}");
    } else {
        println!("connected: {connected}");
        println!("register: {register:#04x}");
        match fault {
            Some(f) => println!("fault: {f:?}"),
            None => println!("fault: none"),
        }
    }
    Ok(())
}

/// Open, initialize, reset, one status read; fails when the hopper is detached.
pub fn self_check(cfg: &Config, transport: Box<dyn Transport + Send>) -> CoreResult<()> {
    let (mut core, _events) = assemble(cfg, transport, cfg.payout.default_max)?;
    core.reset()?;
    if !core.is_connected() {
        return Err(Report::new(HopperError::HardwareFault(
            "hopper reports detached".into(),
        )));
    }
    let register = core.status_report()?;
    tracing::info!(register, "self-check passed");
    println!("self-check: ok (register {register:#04x})");
    Ok(())
}

/// Decode a recorded register trace and print the event stream.
pub fn replay(cfg: &Config, trace_path: &Path) -> CoreResult<()> {
    let trace = hopper_config::load_trace_csv(trace_path)?;
    let span_ms = trace.span_ms();
    let steps: Vec<(u32, u8)> = trace.rows.iter().map(|r| (r.elapsed_ms, r.value)).collect();
    let polls = steps.len();

    let (mut core, events) = assemble(
        cfg,
        Box::new(hopper_hardware::TracePlayer::new(steps)),
        cfg.payout.default_max,
    )?;
    // Traces are recorded during dispensing: decode with the motor commanded.
    core.motor_on()?;

    let json = crate::json_mode();
    let mut coins: u32 = 0;
    let mut illegal: u32 = 0;
    for _ in 0..polls {
        core.poll_cycle()?;
        while let Ok(ev) = events.try_recv() {
            match ev {
                HopperEvent::CoinOut { legal } => {
                    if legal {
                        coins += 1;
                    } else {
                        illegal = illegal.saturating_add(1);
                    }
                    if json {
                        println!(
                            "{}",
                            serde_json::json!({ "event": "coin_out", "legal": legal })
                        );
                    } else {
                        println!("coin out ({})", if legal { "legal" } else { "illegal" });
                    }
                }
                HopperEvent::Fault(fault) => {
                    if json {
                        println!(
                            "{}",
                            serde_json::json!({ "event": "fault", "fault": format!("{fault:?}") })
                        );
                    } else {
                        println!("fault: {fault:?}");
                    }
                }
                HopperEvent::FaultCleared => {
                    if json {
                        println!("{}", serde_json::json!({ "event": "fault_cleared" }));
                    } else {
                        println!("fault cleared");
                    }
                }
            }
        }
    }
    let _ = core.motor_off();

    let fault = core.active_fault().map(|f| format!("{f:?}"));
    if json {
        println!(
            "{}",
            serde_json::json!({
                "event": "summary",
                "polls": polls,
                "span_ms": span_ms,
                "coins": coins,
                "illegal": illegal,
                "fault": fault,
            })
        );
    } else {
        println!("replayed {polls} polls spanning {span_ms} ms: {coins} coin(s), {illegal} illegal");
        if let Some(f) = fault {
            println!("latched fault: {f}");
        }
    }
    Ok(())
}

/// Print poll-latency stats to stderr.
fn print_stats(latencies: &[u64], sample_count: usize, missed_deadlines: usize, period_us: u64) {
    let min = *latencies.iter().min().unwrap_or(&0);
    let max = *latencies.iter().max().unwrap_or(&0);
    let avg = latencies.iter().sum::<u64>() as f64 / latencies.len() as f64;
    let stdev = if latencies.len() > 1 {
        let var = latencies
            .iter()
            .map(|&x| (x as f64 - avg).powi(2))
            .sum::<f64>()
            / (latencies.len() as f64 - 1.0);
        var.sqrt()
    } else {
        0.0
    };
    eprintln!("\n--- Hopper Stats ---");
    eprintln!("Polls: {sample_count}");
    eprintln!("Period (us): {period_us}");
    eprintln!("Latency min/avg/max/stdev (us): {min:.0} / {avg:.1} / {max:.0} / {stdev:.1}");
    eprintln!("Missed deadlines (> period): {missed_deadlines}");
    eprintln!("--------------------\n");
}
