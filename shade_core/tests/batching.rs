//! Write coalescing through the public engine API.
//!
//! Verifies that:
//! - Commands issued within one window share a single controller write
//! - A later command for the same shade replaces the earlier target
//! - The 16-shade cap splits larger bursts
//! - Per-shade failures surface on the right receipts

use shade_core::mocks::RecordingController;
use shade_core::{Command, FlushOutcome, ShadeEngine, ShadeError, ShadeWriteStatus};
use shade_traits::ShadeId;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);

fn controller_with(count: usize) -> Arc<RecordingController> {
    let ctrl = Arc::new(RecordingController::new("hub"));
    for i in 0..count {
        ctrl.set_shade(&format!("s{i}"), Some(0));
    }
    ctrl
}

fn engine(ctrl: &Arc<RecordingController>) -> ShadeEngine {
    let engine = ShadeEngine::builder()
        .with_shared_controller(Arc::clone(ctrl) as Arc<dyn shade_traits::ShadeController>)
        .build()
        .unwrap();
    engine.poll_once().unwrap();
    engine
}

fn id(i: usize) -> ShadeId {
    ShadeId::from(format!("s{i}"))
}

#[test]
fn commands_in_one_window_share_a_write() {
    let ctrl = controller_with(8);
    let engine = engine(&ctrl);

    let receipts: Vec<_> = (0..8)
        .map(|i| engine.apply_command(&id(i), Command::SetPercent(50.0)).unwrap())
        .collect();
    for r in &receipts {
        r.wait(WAIT).unwrap();
    }

    let writes = ctrl.writes();
    assert_eq!(writes.len(), 1, "expected one coalesced write, got {writes:?}");
    assert_eq!(writes[0].len(), 8);
    assert!(writes[0].iter().all(|(_, raw)| *raw == 32_768));
}

#[test]
fn later_command_replaces_queued_target() {
    let ctrl = controller_with(1);
    let engine = engine(&ctrl);

    let first = engine.apply_command(&id(0), Command::SetPercent(20.0)).unwrap();
    let second = engine.apply_command(&id(0), Command::SetPercent(80.0)).unwrap();
    first.wait(WAIT).unwrap();
    second.wait(WAIT).unwrap();

    assert_eq!(ctrl.writes(), vec![vec![(id(0), 52_428)]]);
    assert_eq!(engine.shade(&id(0)).unwrap().commanded_raw, Some(52_428));
}

#[test]
fn open_and_close_hit_the_curve_ends() {
    let ctrl = controller_with(2);
    let engine = engine(&ctrl);

    let open = engine.apply_command(&id(0), Command::Open).unwrap();
    let close = engine.apply_command(&id(1), Command::Close).unwrap();
    open.wait(WAIT).unwrap();
    close.wait(WAIT).unwrap();

    let write = &ctrl.writes()[0];
    assert!(write.contains(&(id(0), u16::MAX)));
    assert!(write.contains(&(id(1), 0)));
}

#[test]
fn twenty_shades_split_at_the_cap() {
    let ctrl = controller_with(20);
    let engine = engine(&ctrl);

    let receipts: Vec<_> = (0..20)
        .map(|i| engine.apply_command(&id(i), Command::Open).unwrap())
        .collect();
    for r in &receipts {
        r.wait(WAIT).unwrap();
    }

    let sizes: Vec<usize> = ctrl.writes().iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![16, 4]);

    let snapshot = engine.diagnostics_snapshot();
    let triggers: Vec<&str> = snapshot
        .recent_batch_events
        .iter()
        .map(|e| e.trigger)
        .collect();
    assert_eq!(triggers, vec!["cap", "deadline"]);
}

#[test]
fn rejected_shade_fails_only_its_own_receipt() {
    let ctrl = controller_with(2);
    ctrl.reject("s1", "motor fault");
    let engine = engine(&ctrl);

    let ok = engine.apply_command(&id(0), Command::Open).unwrap();
    let bad = engine.apply_command(&id(1), Command::Open).unwrap();

    assert_eq!(ok.wait(WAIT), Ok(()));
    assert_eq!(
        bad.wait(WAIT),
        Err(ShadeError::AllFailed {
            reason: "motor fault".into()
        })
    );
    assert!(engine.shade(&id(1)).unwrap().write_failed);
    assert!(!engine.shade(&id(0)).unwrap().write_failed);
}

#[test]
fn shade_missing_from_response_counts_as_failed() {
    let ctrl = controller_with(2);
    ctrl.omit_from_response("s1");
    let engine = engine(&ctrl);

    let a = engine.apply_command(&id(0), Command::Close).unwrap();
    let b = engine.apply_command(&id(1), Command::Close).unwrap();
    a.wait(WAIT).unwrap();
    assert_eq!(
        b.tickets()[0].wait(WAIT).unwrap(),
        ShadeWriteStatus::Failed("no result reported".into())
    );
}

#[test]
fn whole_write_failure_fails_every_receipt() {
    let ctrl = controller_with(3);
    ctrl.fail_writes(Some("http 503"));
    let engine = engine(&ctrl);

    let receipts: Vec<_> = (0..3)
        .map(|i| engine.apply_command(&id(i), Command::Open).unwrap())
        .collect();
    for r in &receipts {
        let err = r.wait(WAIT).unwrap_err();
        assert!(
            matches!(&err, ShadeError::AllFailed { reason } if reason.contains("http 503")),
            "unexpected error {err:?}"
        );
    }

    let events = engine.diagnostics_snapshot().recent_batch_events;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].outcome, "all_failed");
    assert_eq!(events[0].items, 3);
}

#[test]
fn write_failure_clears_after_next_success() {
    let ctrl = controller_with(1);
    ctrl.fail_writes(Some("http 500"));
    let engine = engine(&ctrl);

    let _ = engine.apply_command(&id(0), Command::Open).unwrap().wait(WAIT);
    assert!(engine.shade(&id(0)).unwrap().write_failed);

    ctrl.fail_writes(None);
    engine.apply_command(&id(0), Command::Open).unwrap().wait(WAIT).unwrap();
    assert!(!engine.shade(&id(0)).unwrap().write_failed);
}

#[test]
fn unknown_shade_is_rejected_before_queueing() {
    let ctrl = controller_with(1);
    let engine = engine(&ctrl);
    let err = engine
        .apply_command(&ShadeId::from("ghost"), Command::Open)
        .unwrap_err();
    assert_eq!(err, ShadeError::UnknownShade("ghost".into()));
    std::thread::sleep(Duration::from_millis(150));
    assert!(ctrl.writes().is_empty());
}

#[test]
fn flush_outcome_reports_partial_failure() {
    let outcome = FlushOutcome::PartialFailure {
        failed: vec!["s1".into()],
    };
    assert!(outcome.any_succeeded());
    assert!(!FlushOutcome::AllFailed { reason: "x".into() }.any_succeeded());
}
