//! Type-state builder for `ShadeEngine`.
//!
//! The builder enforces at compile time that a controller is provided before
//! `build()` is available. `try_build()` is always available for dynamic checks.

use std::marker::PhantomData;
use std::sync::Arc;

use shade_traits::ShadeController;
use shade_traits::clock::{Clock, MonotonicClock};

use crate::batcher::MAX_BATCH_ITEMS;
use crate::config::EngineCfg;
use crate::engine::ShadeEngine;
use crate::error::{BuildError, Result};
use crate::settings::{Settings, SettingsHandle};

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

/// Builder for `ShadeEngine`. Configuration is validated on `build()`.
pub struct ShadeEngineBuilder<C> {
    controller: Option<Arc<dyn ShadeController>>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    config: Option<EngineCfg>,
    settings: Option<Arc<SettingsHandle>>,
    _c: PhantomData<C>,
}

impl Default for ShadeEngineBuilder<Missing> {
    fn default() -> Self {
        Self {
            controller: None,
            clock: None,
            config: None,
            settings: None,
            _c: PhantomData,
        }
    }
}

fn invalid(msg: &'static str) -> eyre::Report {
    eyre::Report::new(BuildError::InvalidConfig(msg))
}

/// Single source of truth for runtime config validation.
fn validate(cfg: &EngineCfg) -> Result<()> {
    if cfg.batch.window.is_zero() {
        return Err(invalid("batch window must be >= 1 ms"));
    }
    if cfg.batch.max_items == 0 || cfg.batch.max_items > MAX_BATCH_ITEMS {
        return Err(invalid("batch max_items must be in [1, 16]"));
    }
    if cfg.polling.boost.is_zero() {
        return Err(invalid("boost poll interval must be > 0"));
    }
    if cfg.polling.idle <= cfg.polling.boost {
        return Err(invalid("idle poll interval must exceed the boost interval"));
    }
    let est = &cfg.estimator;
    if !(est.latency_alpha > 0.0 && est.latency_alpha <= 1.0) {
        return Err(invalid("latency_alpha must be in (0.0, 1.0]"));
    }
    if !(est.forgetting > 0.0 && est.forgetting <= 1.0) {
        return Err(invalid("forgetting must be in (0.0, 1.0]"));
    }
    if !(est.initial_covariance.is_finite() && est.initial_covariance > 0.0) {
        return Err(invalid("initial_covariance must be > 0.0"));
    }
    if est.initial_latency > est.max_latency {
        return Err(invalid("initial_latency must not exceed max_latency"));
    }
    if cfg.history == 0 {
        return Err(invalid("diagnostics history must be >= 1"));
    }
    Ok(())
}

impl<C> ShadeEngineBuilder<C> {
    /// Fallible build available in any type-state; returns a detailed error
    /// for missing pieces.
    pub fn try_build(self) -> Result<ShadeEngine> {
        let controller = self
            .controller
            .ok_or_else(|| eyre::Report::new(BuildError::MissingController))?;
        let config = self.config.unwrap_or_default();
        validate(&config)?;
        let clock: Arc<dyn Clock + Send + Sync> = match self.clock {
            Some(c) => c,
            None => Arc::new(MonotonicClock::new()),
        };
        let settings = self
            .settings
            .unwrap_or_else(|| Arc::new(SettingsHandle::new(Settings::default())));
        tracing::debug!(
            controller = controller.controller_id(),
            window_ms = config.batch.window.as_millis(),
            idle_ms = config.polling.idle.as_millis(),
            boost_ms = config.polling.boost.as_millis(),
            "building shade engine"
        );
        Ok(ShadeEngine::assemble(controller, clock, &config, settings))
    }

    pub fn with_clock(mut self, clock: impl Clock + Send + Sync + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn with_config(mut self, config: EngineCfg) -> Self {
        self.config = Some(config);
        self
    }

    /// Share an existing settings handle (e.g. one the caller keeps editing).
    pub fn with_settings(mut self, settings: Arc<SettingsHandle>) -> Self {
        self.settings = Some(settings);
        self
    }
}

impl ShadeEngineBuilder<Missing> {
    pub fn with_controller(
        self,
        controller: impl ShadeController + 'static,
    ) -> ShadeEngineBuilder<Set> {
        self.with_shared_controller(Arc::new(controller))
    }

    /// Use a controller the caller also keeps a handle to.
    pub fn with_shared_controller(
        self,
        controller: Arc<dyn ShadeController>,
    ) -> ShadeEngineBuilder<Set> {
        ShadeEngineBuilder {
            controller: Some(controller),
            clock: self.clock,
            config: self.config,
            settings: self.settings,
            _c: PhantomData,
        }
    }
}

impl ShadeEngineBuilder<Set> {
    pub fn build(self) -> Result<ShadeEngine> {
        self.try_build()
    }
}
