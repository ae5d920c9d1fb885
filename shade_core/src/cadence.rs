//! Poll cadence: idle interval normally, a faster interval for a while after
//! anything moves.

use crate::config::PollingCfg;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CadenceState {
    Idle,
    Boost { remaining: Duration },
}

#[derive(Debug)]
pub struct CadenceController {
    cfg: PollingCfg,
    boost_until: Option<Instant>,
}

impl CadenceController {
    pub fn new(cfg: PollingCfg) -> Self {
        Self {
            cfg,
            boost_until: None,
        }
    }

    /// Start or extend a boost to the full window from `now`.
    pub fn boost(&mut self, now: Instant) {
        self.boost_until = Some(now + self.cfg.boost_window);
    }

    pub fn state(&self, now: Instant) -> CadenceState {
        match self.boost_until {
            Some(until) if now < until => CadenceState::Boost {
                remaining: until - now,
            },
            _ => CadenceState::Idle,
        }
    }

    pub fn interval(&self, now: Instant) -> Duration {
        match self.state(now) {
            CadenceState::Idle => self.cfg.idle,
            CadenceState::Boost { .. } => self.cfg.boost,
        }
    }

    pub fn config(&self) -> &PollingCfg {
        &self.cfg
    }
}
