use clap::Parser;
use eyre::{Result, WrapErr};
use hopper_core::error::HopperError;
use hopper_core::session::PayoutOutcome;
use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

mod cli;
mod error_fmt;
mod payout;
mod rt;

use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE};

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    let _ = color_eyre::install();
    if let Err(err) = run(cli) {
        if json_mode() {
            println!("{}", error_fmt::format_error_json(&err));
        } else {
            println!("{}", error_fmt::humanize(&err));
        }
        std::process::exit(error_fmt::exit_code_for_error(&err));
    }
}

pub(crate) fn json_mode() -> bool {
    JSON_MODE.get().copied().unwrap_or(false)
}

fn run(cli: Cli) -> Result<()> {
    let raw = fs::read_to_string(&cli.config)
        .wrap_err_with(|| format!("reading config {}", cli.config.display()))?;
    let cfg = hopper_config::load_toml(&raw).wrap_err("parsing config TOML")?;
    cfg.validate()?;

    init_logging(&cli, &cfg)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed))
        .wrap_err("installing Ctrl-C handler")?;

    match cli.cmd {
        Commands::Payout {
            coins,
            max_run_ms,
            settle_ms,
            rt,
            rt_prio,
            rt_lock,
            rt_cpu,
            stats,
        } => {
            let args = payout::PayoutArgs {
                coins,
                max_run_ms,
                settle_ms,
                rt,
                rt_prio,
                rt_lock,
                rt_cpu,
                stats,
            };
            let transport = payout::open_transport(&cfg)?;
            let started = Instant::now();
            let res = payout::run(&cfg, transport, &args, &shutdown);
            let duration_ms: u64 = {
                let ms = started.elapsed().as_millis();
                (ms.min(u128::from(u64::MAX))) as u64
            };
            if json_mode() {
                let profile = if stats { "inline" } else { "poller" };
                println!("{}", payout_result_json(coins, duration_ms, profile, &res));
            }
            let out = res?;
            if !json_mode() {
                println!("Payout complete: {} coins in {} ms", out.paid, out.elapsed_ms);
                if out.illegal > 0 {
                    println!("Warning: {} coin(s) coasted past the ceiling", out.illegal);
                }
            }
            Ok(())
        }
        Commands::Status => {
            let transport = payout::open_transport(&cfg)?;
            payout::status(&cfg, transport)
        }
        Commands::SelfCheck => {
            let transport = payout::open_transport(&cfg)?;
            payout::self_check(&cfg, transport)
        }
        Commands::Replay { trace } => payout::replay(&cfg, &trace),
    }
}

/// One result line per payout run; `paid`/`illegal` are null on abort.
fn payout_result_json(
    coins: u32,
    duration_ms: u64,
    profile: &str,
    res: &Result<PayoutOutcome>,
) -> String {
    use serde_json::{Value, json};
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());
    let (paid, illegal, abort_reason) = match res {
        Ok(out) => (json!(out.paid), json!(out.illegal), Value::Null),
        Err(err) => {
            let reason = err
                .downcast_ref::<HopperError>()
                .and_then(|he| match he {
                    HopperError::Abort(r) => Some(payout::abort_reason_name(r)),
                    _ => None,
                })
                .unwrap_or("Error");
            (Value::Null, Value::Null, json!(reason))
        }
    };
    json!({
        "timestamp": timestamp,
        "coins": coins,
        "paid": paid,
        "illegal": illegal,
        "duration_ms": duration_ms,
        "profile": profile,
        "abort_reason": abort_reason,
    })
    .to_string()
}

/// Console layer on stderr plus an optional JSON file layer from `[logging]`.
fn init_logging(cli: &Cli, cfg: &hopper_config::Config) -> Result<()> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

    // RUST_LOG wins over --log-level, which wins over [logging].level.
    let directive = cli
        .log_level
        .clone()
        .or_else(|| cfg.logging.level.clone())
        .unwrap_or_else(|| "info".into());
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&directive))
        .wrap_err("parsing log filter")?;

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    if json_mode() {
        layers.push(fmt::layer().json().with_writer(std::io::stderr).boxed());
    } else {
        layers.push(fmt::layer().with_writer(std::io::stderr).boxed());
    }
    if let Some(file) = &cfg.logging.file {
        let path = std::path::Path::new(file);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| std::path::Path::new("."));
        let name = path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("hopper.log"));
        let appender = match cfg.logging.rotation.as_deref() {
            Some("daily") => tracing_appender::rolling::daily(dir, name),
            Some("hourly") => tracing_appender::rolling::hourly(dir, name),
            _ => tracing_appender::rolling::never(dir, name),
        };
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        layers.push(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .boxed(),
        );
    }
    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .wrap_err("initializing tracing subscriber")?;
    Ok(())
}
