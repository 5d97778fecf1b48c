use std::sync::atomic::AtomicBool;
use std::time::Duration;

use hopper_core::error::{AbortReason, HopperError};
use hopper_core::poller::Poller;
use hopper_core::session::{PayoutParams, run_payout};
use hopper_core::{EventReceiver, ProbeCfg, TimingCfg, build_hopper};
use hopper_hardware::{SimHopper, SimMode};
use hopper_traits::clock::MonotonicClock;

fn spawn_sim(mode: SimMode, timing: TimingCfg) -> (Poller<SimHopper>, EventReceiver) {
    let sim = SimHopper::new(mode, 30, 10);
    let (mut core, events) =
        build_hopper(sim, timing, ProbeCfg::default(), 2, 0).expect("build core");
    core.initialize_device().expect("initialize");
    let poller = Poller::spawn(core, Duration::from_millis(1), MonotonicClock::new());
    (poller, events)
}

#[test]
fn pays_the_requested_coins() {
    let (poller, events) = spawn_sim(SimMode::Normal, TimingCfg::default());
    let params = PayoutParams {
        coins: 3,
        max_run_ms: 5_000,
        settle_ms: 80,
    };

    let outcome =
        run_payout(&poller, &events, params, &AtomicBool::new(false)).expect("payout completes");

    assert_eq!(outcome.paid, 3);
    assert_eq!(outcome.illegal, 0);
    assert_eq!(poller.current_payout(), 3);
    assert!(poller.active_fault().is_none());
    assert!(poller.take_error().is_none());
}

#[test]
fn empty_hopper_aborts_and_blocks_until_reset() {
    // Tight windows so the retry budget burns down in tens of milliseconds.
    let timing = TimingCfg {
        max_blocked_ms: 100,
        empty_ms: 20,
        pause_ms: 10,
        max_pause_retries: 2,
    };
    let (poller, events) = spawn_sim(SimMode::Empty, timing);
    let params = PayoutParams {
        coins: 1,
        max_run_ms: 5_000,
        settle_ms: 20,
    };

    let err = run_payout(&poller, &events, params, &AtomicBool::new(false))
        .expect_err("empty hopper must abort");
    match err.downcast_ref::<HopperError>() {
        Some(HopperError::Abort(AbortReason::Empty)) => {}
        other => panic!("expected Abort(Empty), got {other:?}"),
    }

    // The latched fault refuses further sessions until a device reset.
    let err = run_payout(&poller, &events, params, &AtomicBool::new(false))
        .expect_err("latched fault must block");
    assert!(
        format!("{err}").contains("device reset required"),
        "unexpected error: {err}"
    );

    assert!(poller.reset().expect("reset"));
    assert!(poller.active_fault().is_none());
}

#[test]
fn zero_coin_request_is_rejected() {
    let (poller, events) = spawn_sim(SimMode::Empty, TimingCfg::default());
    let params = PayoutParams {
        coins: 0,
        max_run_ms: 1_000,
        settle_ms: 10,
    };

    let err = run_payout(&poller, &events, params, &AtomicBool::new(false))
        .expect_err("zero coins is not a session");
    assert!(format!("{err}").contains("zero coins"), "unexpected error: {err}");
}

#[test]
fn shutdown_flag_interrupts_the_session() {
    let (poller, events) = spawn_sim(SimMode::Empty, TimingCfg::default());
    let params = PayoutParams {
        coins: 5,
        max_run_ms: 5_000,
        settle_ms: 10,
    };
    let shutdown = AtomicBool::new(true);

    let err = run_payout(&poller, &events, params, &shutdown)
        .expect_err("preset shutdown must interrupt");
    match err.downcast_ref::<HopperError>() {
        Some(HopperError::Abort(AbortReason::Interrupted)) => {}
        other => panic!("expected Abort(Interrupted), got {other:?}"),
    }
}

#[test]
fn runtime_cap_fires_before_any_fault() {
    // Default windows are far longer than the cap, so the deadline wins.
    let (poller, events) = spawn_sim(SimMode::Empty, TimingCfg::default());
    let params = PayoutParams {
        coins: 1,
        max_run_ms: 40,
        settle_ms: 10,
    };

    let err = run_payout(&poller, &events, params, &AtomicBool::new(false))
        .expect_err("deadline must fire");
    match err.downcast_ref::<HopperError>() {
        Some(HopperError::Abort(AbortReason::MaxRuntime)) => {}
        other => panic!("expected Abort(MaxRuntime), got {other:?}"),
    }
    assert!(poller.active_fault().is_none(), "no device fault at 40ms");
}

#[test]
fn jammed_coin_aborts_with_reason() {
    let (poller, events) = spawn_sim(SimMode::Jam, TimingCfg::default());
    let params = PayoutParams {
        coins: 1,
        max_run_ms: 5_000,
        settle_ms: 10,
    };

    let err = run_payout(&poller, &events, params, &AtomicBool::new(false))
        .expect_err("stuck coin must abort");
    match err.downcast_ref::<HopperError>() {
        Some(HopperError::Abort(AbortReason::Jam)) => {}
        other => panic!("expected Abort(Jam), got {other:?}"),
    }
    assert_eq!(
        poller.active_fault(),
        Some(hopper_core::HopperFault::Jam)
    );
}
