//! End-to-end runs against the simulated controller on a manual clock.

use shade_core::{Command, CommandReceipt, ShadeEngine, ShadeError, StopSource};
use shade_sim::{SimShadeSpec, SimulatedController};
use shade_traits::{ManualClock, ShadeController, ShadeId};
use std::sync::Arc;
use std::time::Duration;

fn setup(start_raw: u16) -> (ManualClock, Arc<SimulatedController>, ShadeEngine) {
    let clock = ManualClock::new();
    let sim = Arc::new(SimulatedController::with_clock(
        "sim",
        [SimShadeSpec::new("a", start_raw)
            .speed(6_000.0)
            .latency(Duration::from_millis(300))],
        clock.clone(),
    ));
    let engine = ShadeEngine::builder()
        .with_shared_controller(Arc::clone(&sim) as Arc<dyn ShadeController>)
        .with_clock(clock.clone())
        .build()
        .unwrap();
    engine.poll_once().unwrap();
    (clock, sim, engine)
}

fn settle(clock: &ManualClock, receipt: &CommandReceipt) -> Result<(), ShadeError> {
    for _ in 0..50 {
        clock.advance_ms(100);
        match receipt.wait(Duration::from_millis(100)) {
            Err(ShadeError::Timeout) => {}
            other => return other,
        }
    }
    Err(ShadeError::Timeout)
}

fn poll_every(clock: &ManualClock, engine: &ShadeEngine, step_ms: u64, times: usize) {
    for _ in 0..times {
        clock.advance_ms(step_ms);
        engine.poll_once().unwrap();
    }
}

#[test]
fn predictive_stop_lands_where_planned() {
    let (clock, sim, engine) = setup(0);
    let a = ShadeId::from("a");
    settle(&clock, &engine.apply_command(&a, Command::Open).unwrap()).unwrap();
    poll_every(&clock, &engine, 1_000, 3);

    let last = engine.shade(&a).unwrap().raw.unwrap();
    assert!(last > 10_000, "shade should be well under way, at {last}");
    let model = engine.diagnostics_snapshot().shades["a"].model.clone().unwrap();
    assert!(model.speed > 3_000.0, "learned speed {}", model.speed);

    clock.advance_ms(200);
    let receipt = engine.apply_command(&a, Command::Stop).unwrap();
    let stop = receipt.plan().unwrap().targets[0].clone();
    assert_ne!(stop.source, StopSource::Frozen);
    assert!(stop.target > last && stop.target <= u16::MAX);
    settle(&clock, &receipt).unwrap();

    clock.advance_ms(30_000);
    assert_eq!(sim.position("a"), Some(stop.target));
    assert!(!sim.is_moving("a"));
}

#[test]
fn repeated_stops_track_free_run_position() {
    const SPEED: f64 = 6_000.0;
    const LATENCY_MS: f64 = 300.0;
    const CYCLES: u32 = 6;

    let (clock, sim, engine) = setup(20_000);
    let a = ShadeId::from("a");
    for cycle in 0..CYCLES {
        let (command, dir) = if cycle % 2 == 0 {
            (Command::Open, 1.0)
        } else {
            (Command::Close, -1.0)
        };
        settle(&clock, &engine.apply_command(&a, command).unwrap()).unwrap();
        poll_every(&clock, &engine, 1_000, 2);

        clock.advance_ms(200);
        let at_command = f64::from(sim.position("a").unwrap());
        let receipt = engine.apply_command(&a, Command::Stop).unwrap();
        let stop = receipt.plan().unwrap().targets[0].clone();
        assert_ne!(stop.source, StopSource::Frozen, "cycle {cycle}");
        settle(&clock, &receipt).unwrap();

        // Where the shade would have been when the stop write took effect.
        let snap = engine.diagnostics_snapshot();
        let planned_ms = snap.recent_stop_outcomes.last().unwrap().at_ms;
        let sent_ms = snap.recent_batch_events.last().unwrap().at_ms;
        let delay_s = ((sent_ms - planned_ms) as f64 + LATENCY_MS) / 1_000.0;
        let free_run = at_command + dir * SPEED * delay_s;
        let err = f64::from(stop.target) - free_run;
        assert!(
            err.abs() < 3_000.0,
            "cycle {cycle}: planned {} vs free run {free_run:.0}",
            stop.target
        );

        // Come to rest before the next move.
        poll_every(&clock, &engine, 1_000, 3);
        assert!(!sim.is_moving("a"), "cycle {cycle}");
    }

    // Only the moves from rest are timed; the stops sent mid-motion are not.
    let model = engine.diagnostics_snapshot().shades["a"].model.clone().unwrap();
    assert_eq!(model.latency_samples, CYCLES);
    assert!(model.latency_ms > 0);
    assert!((model.speed - SPEED).abs() < SPEED * 0.15, "learned speed {}", model.speed);
}

#[test]
fn freeze_stop_drifts_back_to_last_sample() {
    let (clock, sim, engine) = setup(0);
    let a = ShadeId::from("a");
    engine.settings().set_predictive(false);
    settle(&clock, &engine.apply_command(&a, Command::Open).unwrap()).unwrap();
    poll_every(&clock, &engine, 1_000, 2);
    let last = engine.shade(&a).unwrap().raw.unwrap();

    clock.advance_ms(500);
    let receipt = engine.apply_command(&a, Command::Stop).unwrap();
    assert_eq!(receipt.plan().unwrap().targets[0].target, last);
    settle(&clock, &receipt).unwrap();

    // The shade keeps moving through the write latency, then returns.
    assert!(sim.position("a").unwrap() > last);
    clock.advance_ms(30_000);
    assert_eq!(sim.position("a"), Some(last));
}

#[test]
fn offline_controller_fails_writes_and_polls() {
    let (clock, sim, engine) = setup(0);
    sim.set_offline(true);
    assert!(matches!(engine.poll_once(), Err(ShadeError::Controller(_))));

    let receipt = engine.apply_command(&"a".into(), Command::Open).unwrap();
    let err = settle(&clock, &receipt).unwrap_err();
    assert!(matches!(err, ShadeError::AllFailed { .. }), "{err:?}");
    assert_eq!(sim.write_count(), 0);

    sim.set_offline(false);
    engine.poll_once().unwrap();
    assert!(engine.poll_healthy());
}

#[test]
fn controller_timeout_is_reported_as_timeout() {
    let (_clock, sim, engine) = setup(0);
    sim.set_timing_out(true);
    assert_eq!(engine.poll_once().unwrap_err(), ShadeError::Timeout);
}
