//! Configuration types for the shade engine.
//!
//! These are the runtime configuration structs used by the engine components.
//! They are separate from the TOML-deserialized config in `shade_config`.

use std::time::Duration;

/// Batch window configuration.
#[derive(Debug, Clone)]
pub struct BatchCfg {
    /// Window opened by the first enqueue into an empty batch.
    pub window: Duration,
    /// Distinct-shade cap; reaching it flushes immediately. At most 16.
    pub max_items: usize,
}

impl Default for BatchCfg {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(80),
            max_items: 16,
        }
    }
}

/// Polling cadence configuration.
#[derive(Debug, Clone)]
pub struct PollingCfg {
    /// Interval while idle.
    pub idle: Duration,
    /// Interval while boosted.
    pub boost: Duration,
    /// Boost duration after the most recent trigger.
    pub boost_window: Duration,
}

impl Default for PollingCfg {
    fn default() -> Self {
        Self {
            idle: Duration::from_secs(12),
            boost: Duration::from_millis(1_500),
            boost_window: Duration::from_secs(10),
        }
    }
}

/// Predictive-stop estimator configuration.
#[derive(Debug, Clone)]
pub struct EstimatorCfg {
    /// EMA smoothing factor for latency, (0.0, 1.0].
    pub latency_alpha: f64,
    /// Latency assumed before the first observation.
    pub initial_latency: Duration,
    /// Upper clamp for a single latency observation.
    pub max_latency: Duration,
    /// RLS forgetting factor, (0.0, 1.0].
    pub forgetting: f64,
    /// Initial RLS covariance.
    pub initial_covariance: f64,
}

impl Default for EstimatorCfg {
    fn default() -> Self {
        Self {
            latency_alpha: 0.2,
            initial_latency: Duration::from_millis(150),
            max_latency: Duration::from_millis(1_500),
            forgetting: 0.98,
            initial_covariance: 1_000.0,
        }
    }
}

/// Everything the engine needs besides the controller, clock and settings.
#[derive(Debug, Clone)]
pub struct EngineCfg {
    pub batch: BatchCfg,
    pub polling: PollingCfg,
    pub estimator: EstimatorCfg,
    /// Entries kept per diagnostics ring (stop plans, batch events, assisted runs).
    pub history: usize,
}

impl Default for EngineCfg {
    fn default() -> Self {
        Self {
            batch: BatchCfg::default(),
            polling: PollingCfg::default(),
            estimator: EstimatorCfg::default(),
            history: 20,
        }
    }
}
