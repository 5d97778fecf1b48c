use hopper_core::mocks::NoopTransport;
use hopper_core::{CoinOutState, ProbeCfg, TimingCfg, build_hopper};
use hopper_traits::{ChangeRecord, TICKS_PER_MS};
use proptest::prelude::*;

prop_compose! {
    // Register values stay within the low two bits so sequences mix coin
    // edges, foreign-bit noise and quiet stretches.
    fn arb_record()(old in 0u8..4, new in 0u8..4, ms in 0i64..2_000) -> ChangeRecord {
        ChangeRecord::new(old, new, ms * TICKS_PER_MS, 0)
    }
}

prop_compose! {
    fn arb_records()(recs in proptest::collection::vec(arb_record(), 1..64)) -> Vec<ChangeRecord> {
        recs
    }
}

proptest! {
    #[test]
    fn countdown_timers_never_go_negative(recs in arb_records()) {
        let (mut core, _events) = build_hopper(
            NoopTransport,
            TimingCfg::default(),
            ProbeCfg::default(),
            2,
            100,
        ).unwrap();
        core.motor_on().unwrap();

        for rec in recs {
            core.poll_record(rec).unwrap();
            prop_assert!(core.coin_out_state().timer_ms() >= 0);
        }
    }

    #[test]
    fn payout_meter_never_decreases(recs in arb_records()) {
        let (mut core, _events) = build_hopper(
            NoopTransport,
            TimingCfg::default(),
            ProbeCfg::default(),
            2,
            3,
        ).unwrap();
        core.motor_on().unwrap();

        let mut prev = core.current_payout();
        for rec in recs {
            core.poll_record(rec).unwrap();
            let now = core.current_payout();
            prop_assert!(now >= prev, "meter went backwards: {prev} -> {now}");
            prev = now;
        }
    }

    #[test]
    fn reset_phase_always_has_a_latched_fault(recs in arb_records()) {
        let (mut core, _events) = build_hopper(
            NoopTransport,
            TimingCfg::default(),
            ProbeCfg::default(),
            2,
            3,
        ).unwrap();
        core.motor_on().unwrap();

        for rec in recs {
            core.poll_record(rec).unwrap();
            if core.coin_out_state() == CoinOutState::WaitingForReset {
                prop_assert!(core.active_fault().is_some());
            }
        }
    }

    #[test]
    fn motor_never_starts_on_its_own(recs in arb_records()) {
        let (mut core, _events) = build_hopper(
            NoopTransport,
            TimingCfg::default(),
            ProbeCfg::default(),
            2,
            3,
        ).unwrap();
        // No motor_on: whatever the register does, the command bit stays low.
        for rec in recs {
            core.poll_record(rec).unwrap();
            prop_assert!(!core.motor_commanded());
        }
    }
}
