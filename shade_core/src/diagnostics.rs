//! Bounded history of stop plans, flushes and assisted calibration runs, and
//! the serializable snapshot built from it.
//!
//! Times are milliseconds since the engine started (`at_ms`), which keeps the
//! snapshot independent of wall-clock time.

use crate::batch_worker::{FlushOutcome, FlushReport};
use crate::batcher::{CommandKind, FlushTrigger};
use crate::planner::StopPlan;
use crate::util::{duration_ms, ms_from};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StopTargetEvent {
    pub shade: String,
    pub last_raw: u16,
    pub target: u16,
    pub source: &'static str,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StopEvent {
    pub at_ms: u64,
    pub scope: String,
    pub scope_name: String,
    pub targets: Vec<StopTargetEvent>,
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BatchEvent {
    pub at_ms: u64,
    pub trigger: &'static str,
    pub items: usize,
    pub stops: usize,
    /// Time the batch stayed open before the write started.
    pub window_ms: u64,
    pub elapsed_ms: u64,
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AssistedSkip {
    pub shade: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AssistedRun {
    pub at_ms: u64,
    pub scope: String,
    pub percent: u8,
    pub saved: Vec<String>,
    pub unchanged: Vec<String>,
    pub skipped: Vec<AssistedSkip>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ModelDiagnostics {
    pub speed: f64,
    pub covariance: f64,
    pub latency_ms: u64,
    pub speed_samples: u32,
    pub latency_samples: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ShadeDiagnostics {
    pub name: String,
    pub raw: Option<u16>,
    pub percent: Option<f64>,
    pub available: bool,
    pub commanded_raw: Option<u16>,
    pub write_failed: bool,
    pub cohort: String,
    pub invert: bool,
    pub anchors: Vec<(u8, u16)>,
    pub model: Option<ModelDiagnostics>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GroupDiagnostics {
    pub id: String,
    pub name: String,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CadenceDiagnostics {
    pub state: &'static str,
    pub interval_ms: u64,
    pub boost_remaining_ms: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DiagnosticsSnapshot {
    pub controller_id: String,
    pub at_ms: u64,
    pub poll_healthy: bool,
    pub predictive_enabled: bool,
    pub invert_default: bool,
    pub cadence: CadenceDiagnostics,
    pub shades: BTreeMap<String, ShadeDiagnostics>,
    pub groups: Vec<GroupDiagnostics>,
    pub recent_stop_outcomes: Vec<StopEvent>,
    pub recent_batch_events: Vec<BatchEvent>,
    pub assisted_runs: Vec<AssistedRun>,
}

/// Ring buffers owned by the engine.
#[derive(Debug)]
pub struct DiagnosticsLog {
    epoch: Instant,
    capacity: usize,
    stops: VecDeque<StopEvent>,
    batches: VecDeque<BatchEvent>,
    assisted: VecDeque<AssistedRun>,
}

fn push_bounded<T>(ring: &mut VecDeque<T>, item: T, capacity: usize) {
    while ring.len() >= capacity.max(1) {
        ring.pop_front();
    }
    ring.push_back(item);
}

impl DiagnosticsLog {
    pub fn new(epoch: Instant, capacity: usize) -> Self {
        Self {
            epoch,
            capacity,
            stops: VecDeque::new(),
            batches: VecDeque::new(),
            assisted: VecDeque::new(),
        }
    }

    pub fn at_ms(&self, at: Instant) -> u64 {
        ms_from(self.epoch, at)
    }

    pub fn record_stop(&mut self, plan: &StopPlan, scope_name: String) {
        let event = StopEvent {
            at_ms: self.at_ms(plan.created_at),
            scope: plan.scope.to_string(),
            scope_name,
            targets: plan
                .targets
                .iter()
                .map(|t| StopTargetEvent {
                    shade: t.shade.to_string(),
                    last_raw: t.last_raw,
                    target: t.target,
                    source: t.source.as_str(),
                })
                .collect(),
            skipped: plan.skipped.iter().map(ToString::to_string).collect(),
        };
        push_bounded(&mut self.stops, event, self.capacity);
    }

    pub fn record_flush(&mut self, report: &FlushReport) {
        let (outcome, failed, reason) = match &report.outcome {
            FlushOutcome::AllSucceeded => ("all_succeeded", Vec::new(), None),
            FlushOutcome::PartialFailure { failed } => (
                "partial_failure",
                failed.iter().map(ToString::to_string).collect(),
                None,
            ),
            FlushOutcome::AllFailed { reason } => (
                "all_failed",
                report.targets.iter().map(|t| t.shade.to_string()).collect(),
                Some(reason.clone()),
            ),
        };
        let event = BatchEvent {
            at_ms: self.at_ms(report.started_at),
            trigger: match report.trigger {
                FlushTrigger::Deadline => "deadline",
                FlushTrigger::Cap => "cap",
                FlushTrigger::Shutdown => "shutdown",
            },
            items: report.targets.len(),
            stops: report
                .targets
                .iter()
                .filter(|t| t.kind == CommandKind::Stop)
                .count(),
            window_ms: duration_ms(report.started_at.saturating_duration_since(report.opened_at)),
            elapsed_ms: duration_ms(report.elapsed),
            outcome,
            failed,
            reason,
        };
        push_bounded(&mut self.batches, event, self.capacity);
    }

    pub fn record_assisted(&mut self, run: AssistedRun) {
        push_bounded(&mut self.assisted, run, self.capacity);
    }

    pub fn stops(&self) -> Vec<StopEvent> {
        self.stops.iter().cloned().collect()
    }

    pub fn batches(&self) -> Vec<BatchEvent> {
        self.batches.iter().cloned().collect()
    }

    pub fn assisted(&self) -> Vec<AssistedRun> {
        self.assisted.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::groups::Cohort;
    use crate::planner::{PlannedStop, StopSource};
    use std::time::Duration;

    #[test]
    fn rings_are_bounded() {
        let epoch = Instant::now();
        let mut log = DiagnosticsLog::new(epoch, 2);
        for i in 0..5u16 {
            let plan = StopPlan {
                scope: Cohort::All,
                created_at: epoch + Duration::from_millis(u64::from(i)),
                targets: vec![PlannedStop {
                    shade: "a".into(),
                    target: i,
                    last_raw: i,
                    source: StopSource::Frozen,
                }],
                skipped: Vec::new(),
            };
            log.record_stop(&plan, "All shades".into());
        }
        let stops = log.stops();
        assert_eq!(stops.len(), 2);
        assert_eq!(stops[0].at_ms, 3);
        assert_eq!(stops[1].targets[0].source, "frozen");
        assert_eq!(stops[1].scope, "all");
    }
}
