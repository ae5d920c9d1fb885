//! Stop planning for a cohort of shades.
//!
//! The controller has no stop command, so a stop is a write of the position
//! the shade should rest at. For each member the planner picks that position:
//!
//! - predicted from the learned model when predictive stop is enabled and the
//!   shade has a model;
//! - otherwise the last known raw position (freeze).
//!
//! A prediction is clamped between the last known position and the most
//! recent commanded target, so a stop never reverses the shade and never
//! overshoots where it was heading. A prediction from a sample older than
//! [`STALE_SAMPLE_LIMIT`] is not trusted and the shade is frozen instead.

use crate::estimator::Estimator;
use crate::groups::Cohort;
use shade_traits::ShadeId;
use std::time::{Duration, Instant};

/// Samples older than this no longer say whether the shade is still moving.
pub const STALE_SAMPLE_LIMIT: Duration = Duration::from_secs(4);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSource {
    Predicted,
    /// Prediction fell outside [last, commanded] and was clamped.
    Clamped,
    /// Freeze at the last known position.
    Frozen,
}

impl StopSource {
    pub fn as_str(self) -> &'static str {
        match self {
            StopSource::Predicted => "predicted",
            StopSource::Clamped => "clamped",
            StopSource::Frozen => "frozen",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStop {
    pub shade: ShadeId,
    pub target: u16,
    pub last_raw: u16,
    pub source: StopSource,
}

#[derive(Debug, Clone)]
pub struct StopPlan {
    pub scope: Cohort,
    pub created_at: Instant,
    pub targets: Vec<PlannedStop>,
    /// Members with no known position.
    pub skipped: Vec<ShadeId>,
}

impl StopPlan {
    pub fn batch_targets(&self) -> Vec<(ShadeId, u16)> {
        self.targets
            .iter()
            .map(|t| (t.shade.clone(), t.target))
            .collect()
    }
}

/// What the planner needs to know about one member.
#[derive(Debug, Clone)]
pub struct StopInput {
    pub shade: ShadeId,
    pub last_raw: Option<u16>,
    pub last_at: Option<Instant>,
    pub commanded: Option<u16>,
}

pub fn plan_stop(
    scope: Cohort,
    members: impl IntoIterator<Item = StopInput>,
    estimator: &Estimator,
    predictive: bool,
    now: Instant,
) -> StopPlan {
    let mut plan = StopPlan {
        scope,
        created_at: now,
        targets: Vec::new(),
        skipped: Vec::new(),
    };
    for member in members {
        let Some(last_raw) = member.last_raw else {
            tracing::warn!(shade = %member.shade, scope = %plan.scope, "stop skipped: no known position");
            plan.skipped.push(member.shade);
            continue;
        };
        let last_at = member.last_at.unwrap_or(now);
        let fresh = now.saturating_duration_since(last_at) <= STALE_SAMPLE_LIMIT;
        let (target, source) = match member.commanded {
            Some(commanded) if predictive && fresh => {
                match estimator.predict_stop_raw(&member.shade, last_raw, last_at, now) {
                    Ok(predicted) => clamp_no_backtrack(predicted, last_raw, commanded),
                    Err(_) => (last_raw, StopSource::Frozen),
                }
            }
            _ => (last_raw, StopSource::Frozen),
        };
        tracing::debug!(shade = %member.shade, last_raw, target, source = source.as_str(), "stop planned");
        plan.targets.push(PlannedStop {
            shade: member.shade,
            target,
            last_raw,
            source,
        });
    }
    plan
}

fn clamp_no_backtrack(predicted: u16, last_raw: u16, commanded: u16) -> (u16, StopSource) {
    let lo = last_raw.min(commanded);
    let hi = last_raw.max(commanded);
    let target = predicted.clamp(lo, hi);
    if target == predicted {
        (target, StopSource::Predicted)
    } else {
        (target, StopSource::Clamped)
    }
}
