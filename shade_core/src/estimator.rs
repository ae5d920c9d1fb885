//! Online kinematic model used to predict where a moving shade will stop.
//!
//! Per shade the estimator keeps the last telemetry sample, the most recent
//! dispatched target and, once motion has been seen, a [`LearnedModel`]:
//!
//! - steady-state speed in raw units per second, fitted by scalar recursive
//!   least squares of displacement (`|Δraw|`) against moving time (`Δt`), with
//!   a forgetting factor so the fit tracks slow drift;
//! - command latency, an EMA of the delay between a write and the start of
//!   motion it caused. Only writes that find the shade at rest are timed;
//!   a write landing mid-motion shows no start of motion to measure.
//!
//! Memory and update cost are O(1) per shade.

use crate::config::EstimatorCfg;
use crate::error::ShadeError;
use crate::util::{clamp_raw, secs_between};
use shade_traits::ShadeId;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Lower bound on the RLS covariance so the fit never freezes completely.
const COVARIANCE_FLOOR: f64 = 1e-6;
/// Moving-time windows shorter than this carry no usable speed information.
const MIN_MOVING_SECS: f64 = 1e-3;

/// Learned parameters for one shade. Speed and latency are never negative.
#[derive(Debug, Clone, PartialEq)]
pub struct LearnedModel {
    /// Raw units per second.
    pub speed: f64,
    /// RLS covariance of the speed estimate.
    pub covariance: f64,
    pub latency: Duration,
    pub speed_samples: u32,
    pub latency_samples: u32,
}

impl LearnedModel {
    fn seed(cfg: &EstimatorCfg) -> Self {
        Self {
            speed: 0.0,
            covariance: cfg.initial_covariance,
            latency: cfg.initial_latency,
            speed_samples: 0,
            latency_samples: 0,
        }
    }

    fn update_speed(&mut self, moving_secs: f64, displacement: f64, forgetting: f64) {
        let p = self.covariance;
        let gain = p * moving_secs / (forgetting + moving_secs * moving_secs * p);
        let err = displacement - moving_secs * self.speed;
        self.speed = (self.speed + gain * err).max(0.0);
        self.covariance = ((p - gain * moving_secs * p) / forgetting).max(COVARIANCE_FLOOR);
        self.speed_samples = self.speed_samples.saturating_add(1);
    }

    fn update_latency(&mut self, observed: Duration, alpha: f64) {
        let prev = self.latency.as_secs_f64();
        let next = (1.0 - alpha) * prev + alpha * observed.as_secs_f64();
        self.latency = Duration::from_secs_f64(next.max(0.0));
        self.latency_samples = self.latency_samples.saturating_add(1);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandRecord {
    pub target: u16,
    pub at: Instant,
}

/// What a sample did to the model; used for debug logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleEffect {
    /// First sample for the shade; nothing to compare against.
    Baseline,
    /// No motion toward a commanded target.
    Stationary,
    /// Reached the target inside the interval; latency may update, speed does not.
    Arrived { latency_updated: bool },
    Moving { latency_updated: bool },
}

#[derive(Debug, Default)]
struct Track {
    last: Option<(u16, Instant)>,
    command: Option<CommandRecord>,
    awaiting_motion: bool,
    /// The last sample moved and had not reached the commanded target.
    moving: bool,
    model: Option<LearnedModel>,
}

/// Keyed store of per-shade learning state.
#[derive(Debug)]
pub struct Estimator {
    cfg: EstimatorCfg,
    tracks: HashMap<ShadeId, Track>,
}

impl Estimator {
    pub fn new(cfg: EstimatorCfg) -> Self {
        Self {
            cfg,
            tracks: HashMap::new(),
        }
    }

    pub fn config(&self) -> &EstimatorCfg {
        &self.cfg
    }

    pub fn model(&self, shade: &ShadeId) -> Option<&LearnedModel> {
        self.tracks.get(shade).and_then(|t| t.model.as_ref())
    }

    pub fn last_command(&self, shade: &ShadeId) -> Option<CommandRecord> {
        self.tracks.get(shade).and_then(|t| t.command)
    }

    /// Remember the most recently dispatched target for a shade.
    ///
    /// Latency is armed only when the shade was at rest; stops and retargets
    /// sent mid-motion update the direction but are not timed.
    pub fn record_command(&mut self, shade: &ShadeId, target: u16, at: Instant) {
        let track = self.tracks.entry(shade.clone()).or_default();
        track.command = Some(CommandRecord { target, at });
        track.awaiting_motion = !track.moving;
    }

    /// Feed one telemetry sample.
    pub fn record_sample(&mut self, shade: &ShadeId, raw: u16, at: Instant) -> SampleEffect {
        let cfg = &self.cfg;
        let track = self.tracks.entry(shade.clone()).or_default();
        let Some((prev_raw, prev_at)) = track.last.replace((raw, at)) else {
            return SampleEffect::Baseline;
        };
        if at <= prev_at {
            return SampleEffect::Stationary;
        }
        let delta = i32::from(raw) - i32::from(prev_raw);
        let Some(cmd) = track.command else {
            track.moving = delta != 0;
            return SampleEffect::Stationary;
        };
        track.moving = delta != 0 && raw != cmd.target;
        let wanted = i32::from(cmd.target) - i32::from(prev_raw);
        if delta == 0 || wanted == 0 || delta.signum() != wanted.signum() {
            return SampleEffect::Stationary;
        }

        let model = track.model.get_or_insert_with(|| LearnedModel::seed(cfg));
        let displacement = f64::from(delta.unsigned_abs());
        // A write that found the shade moving did not restart the motion.
        let window_start = if track.awaiting_motion {
            prev_at.max(cmd.at)
        } else {
            prev_at
        };
        let mut moving_from = window_start;
        let mut latency_updated = false;

        if track.awaiting_motion && at > cmd.at {
            track.awaiting_motion = false;
            // Place the motion start inside the interval using the current
            // speed; without one assume it started as early as possible.
            if model.speed_samples > 0 && model.speed > 0.0 {
                let travel = Duration::from_secs_f64(displacement / model.speed);
                let estimate = at.checked_sub(travel).unwrap_or(window_start);
                moving_from = estimate.clamp(window_start, at);
            }
            let observed = moving_from
                .saturating_duration_since(cmd.at)
                .min(cfg.max_latency);
            model.update_latency(observed, cfg.latency_alpha);
            latency_updated = true;
        }

        if raw == cmd.target {
            return SampleEffect::Arrived { latency_updated };
        }
        let moving_secs = secs_between(moving_from, at);
        if moving_secs >= MIN_MOVING_SECS {
            model.update_speed(moving_secs, displacement, cfg.forgetting);
        }
        SampleEffect::Moving { latency_updated }
    }

    /// Raw position the shade is expected to rest at if a stop (freeze) is
    /// issued at `command_at`, given its last sample.
    ///
    /// Direction comes from the most recent commanded target; with no target
    /// the shade is assumed stationary.
    pub fn predict_stop_raw(
        &self,
        shade: &ShadeId,
        last_raw: u16,
        last_at: Instant,
        command_at: Instant,
    ) -> Result<u16, ShadeError> {
        let track = self.tracks.get(shade);
        let model = track
            .and_then(|t| t.model.as_ref())
            .ok_or_else(|| ShadeError::Uninitialized(shade.clone()))?;
        let Some(cmd) = track.and_then(|t| t.command) else {
            return Ok(last_raw);
        };
        let dir = f64::from((i32::from(cmd.target) - i32::from(last_raw)).signum());
        let horizon = secs_between(last_at, command_at) + model.latency.as_secs_f64();
        Ok(clamp_raw(f64::from(last_raw) + dir * model.speed * horizon))
    }

    /// Drop the learned model; sample and command history are kept.
    pub fn reset(&mut self, shade: &ShadeId) -> bool {
        self.tracks
            .get_mut(shade)
            .and_then(|t| t.model.take())
            .is_some()
    }

    /// Drop everything known about a deregistered shade.
    pub fn forget(&mut self, shade: &ShadeId) {
        self.tracks.remove(shade);
    }
}
