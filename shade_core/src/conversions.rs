//! `From` implementations bridging `shade_config` types to `shade_core` types.
//!
//! Millisecond fields in the TOML schema become `Duration`s here, so nothing
//! downstream of the config loader deals in raw integers.

use crate::calibration::Anchor;
use crate::config::{BatchCfg, EngineCfg, EstimatorCfg, PollingCfg};
use std::time::Duration;

// ── BatchCfg ─────────────────────────────────────────────────────────────────

impl From<&shade_config::BatchCfg> for BatchCfg {
    fn from(c: &shade_config::BatchCfg) -> Self {
        Self {
            window: Duration::from_millis(c.window_ms),
            max_items: c.max_items,
        }
    }
}

// ── PollingCfg ───────────────────────────────────────────────────────────────

impl From<&shade_config::PollingCfg> for PollingCfg {
    fn from(c: &shade_config::PollingCfg) -> Self {
        Self {
            idle: Duration::from_millis(c.idle_ms),
            boost: Duration::from_millis(c.boost_ms),
            boost_window: Duration::from_millis(c.boost_window_ms),
        }
    }
}

// ── EstimatorCfg ─────────────────────────────────────────────────────────────

impl From<&shade_config::PredictorCfg> for EstimatorCfg {
    fn from(c: &shade_config::PredictorCfg) -> Self {
        Self {
            latency_alpha: c.latency_alpha,
            initial_latency: Duration::from_millis(c.initial_latency_ms),
            max_latency: Duration::from_millis(c.max_latency_ms),
            forgetting: c.forgetting,
            initial_covariance: c.initial_covariance,
        }
    }
}

// ── EngineCfg ────────────────────────────────────────────────────────────────

impl From<&shade_config::Config> for EngineCfg {
    fn from(c: &shade_config::Config) -> Self {
        Self {
            batch: (&c.batch).into(),
            polling: (&c.polling).into(),
            estimator: (&c.predictor).into(),
            history: c.diagnostics.history,
        }
    }
}

// ── Anchors ──────────────────────────────────────────────────────────────────

impl TryFrom<&shade_config::AnchorRow> for Anchor {
    type Error = crate::error::CalibrationError;

    /// Range-checks a single row; reported index is 0.
    fn try_from(row: &shade_config::AnchorRow) -> Result<Self, Self::Error> {
        crate::calibration::anchors_from_pairs([(row.percent, row.raw)])?
            .pop()
            .ok_or(crate::error::CalibrationError::TooFewAnchors { count: 0 })
    }
}
