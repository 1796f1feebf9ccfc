//! Property tests for the session state machine.

use chrono::{DateTime, Duration, TimeZone, Utc};
use focuslock_core::session::{SessionMachine, SessionStatus};
use focuslock_core::{Event, SessionConfig};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Wait(i64),
    Tick,
    Start,
    Pause,
    Resume,
    Cancel,
    Complete,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0i64..3_600).prop_map(Op::Wait),
        3 => Just(Op::Tick),
        1 => Just(Op::Start),
        1 => Just(Op::Pause),
        1 => Just(Op::Resume),
        1 => Just(Op::Cancel),
        1 => Just(Op::Complete),
    ]
}

fn config() -> impl Strategy<Value = SessionConfig> {
    (1u32..60, 1u32..20, 1u32..40, 1u32..6).prop_map(|(f, s, l, c)| SessionConfig {
        focus_minutes: f,
        short_rest_minutes: s,
        long_rest_minutes: l,
        cycles_per_long_rest: c,
    })
}

fn allowed(from: SessionStatus, to: SessionStatus) -> bool {
    use SessionStatus::*;
    from == to
        || matches!(
            (from, to),
            (Idle, Running)
                | (Running, Paused)
                | (Paused, Running)
                | (Running | Paused, Cancelled | Completed)
                | (Cancelled | Completed, Running)
        )
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
}

proptest! {
    #[test]
    fn remaining_stays_in_range_and_statuses_follow_the_graph(
        cfg in config(),
        ops in prop::collection::vec(op(), 1..60),
    ) {
        let mut machine = SessionMachine::new();
        let mut now = t0();
        for op in ops {
            let before = machine.status();
            match op {
                Op::Wait(secs) => now += Duration::seconds(secs),
                Op::Tick => { machine.tick(now); }
                Op::Start => { let _ = machine.start(cfg, now); }
                Op::Pause => { let _ = machine.pause(now); }
                Op::Resume => { let _ = machine.resume(now); }
                Op::Cancel => { let _ = machine.cancel(now); }
                Op::Complete => { let _ = machine.complete(now); }
            }
            let after = machine.status();
            prop_assert!(allowed(before, after), "{before} -> {after}");
            if let Some(s) = machine.session() {
                prop_assert!(s.remaining_ms <= s.planned_ms);
                prop_assert_eq!(s.planned_ms, s.config.duration_ms(s.phase));
            }
        }
    }

    #[test]
    fn tick_twice_equals_tick_once(cfg in config(), offsets in prop::collection::vec(0i64..20_000, 1..10)) {
        let mut machine = SessionMachine::new();
        machine.start(cfg, t0()).unwrap();
        let mut now = t0();
        for offset in offsets {
            now += Duration::seconds(offset);
            machine.tick(now);
            let once = machine.session().cloned();
            let again = machine.tick(now);
            prop_assert!(again.is_empty());
            prop_assert_eq!(machine.session().cloned(), once);
        }
    }

    #[test]
    fn pause_then_resume_keeps_remaining(
        cfg in config(),
        run_secs in 0i64..600,
        paused_secs in 0i64..100_000,
    ) {
        let mut machine = SessionMachine::new();
        machine.start(cfg, t0()).unwrap();
        let paused_at = t0() + Duration::seconds(run_secs);
        machine.tick(paused_at);
        machine.pause(paused_at).unwrap();
        let frozen = machine.session().unwrap().remaining_ms;

        let resumed_at = paused_at + Duration::seconds(paused_secs);
        machine.resume(resumed_at).unwrap();
        machine.tick(resumed_at);
        prop_assert_eq!(machine.session().unwrap().remaining_ms, frozen);
    }

    #[test]
    fn focus_completions_match_cadence(cfg in config(), focus_phases in 1u32..12) {
        let mut machine = SessionMachine::new();
        machine.start(cfg, t0()).unwrap();
        let mut rests = Vec::new();
        while rests.len() < focus_phases as usize {
            let now = machine.session().unwrap().phase_ends_at() + Duration::seconds(1);
            for event in machine.tick(now) {
                if let Event::PhaseCompleted { phase, next_phase, cycle_index, .. } = event {
                    if !phase.is_rest() {
                        let long = cycle_index % cfg.cycles_per_long_rest == 0;
                        prop_assert!(next_phase.is_rest());
                        prop_assert_eq!(
                            next_phase == focuslock_core::Phase::LongRest,
                            long
                        );
                        rests.push(next_phase);
                    }
                }
            }
        }
        prop_assert_eq!(machine.session().unwrap().cycle_index as usize, rests.len());
    }
}
