//! Simulated shade controller.
//!
//! Each shade moves at a constant speed toward its last accepted target. A
//! write takes effect only after the shade's latency; until then the shade
//! keeps doing whatever it was doing, which is what makes a naive
//! freeze-at-last-position stop overshoot on real hardware.
pub mod error;

pub use error::SimError;

use error::Result;
use shade_traits::clock::{Clock, MonotonicClock};
use shade_traits::{BoxError, ConnectionStatus, RAW_MAX, ShadeController, ShadeId, ShadeSample, WriteOutcome};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Most targets the controller accepts per write.
pub const MAX_TARGETS_PER_WRITE: usize = 16;

/// Static description of one simulated shade.
#[derive(Debug, Clone, PartialEq)]
pub struct SimShadeSpec {
    pub id: String,
    pub name: Option<String>,
    pub start_raw: u16,
    /// Raw units per second.
    pub speed: f64,
    /// Delay between a write and the shade acting on it.
    pub latency: Duration,
    pub connected: bool,
    pub reject_writes: bool,
}

impl SimShadeSpec {
    pub fn new(id: &str, start_raw: u16) -> Self {
        Self {
            id: id.to_string(),
            name: None,
            start_raw,
            speed: 6_000.0,
            latency: Duration::from_millis(300),
            connected: true,
            reject_writes: false,
        }
    }

    #[must_use]
    pub fn speed(mut self, raw_per_s: f64) -> Self {
        self.speed = raw_per_s;
        self
    }

    #[must_use]
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

#[derive(Debug)]
struct SimShade {
    spec: SimShadeSpec,
    pos: f64,
    since: Instant,
    target: Option<u16>,
    /// Accepted write that has not reached the motor yet.
    pending: Option<(u16, Instant)>,
}

impl SimShade {
    fn new(spec: SimShadeSpec, now: Instant) -> Self {
        Self {
            pos: f64::from(spec.start_raw),
            since: now,
            target: None,
            pending: None,
            spec,
        }
    }

    fn position_at(&self, at: Instant) -> f64 {
        let Some(target) = self.target else {
            return self.pos;
        };
        let target = f64::from(target);
        let step = self.spec.speed * at.saturating_duration_since(self.since).as_secs_f64();
        if self.pos < target {
            (self.pos + step).min(target)
        } else {
            (self.pos - step).max(target)
        }
    }

    /// Bring the state forward to `now`, applying a pending write on the way.
    fn advance(&mut self, now: Instant) {
        if let Some((target, effective_at)) = self.pending
            && now >= effective_at
        {
            self.pos = self.position_at(effective_at);
            self.since = effective_at;
            self.target = Some(target);
            self.pending = None;
        }
        self.pos = self.position_at(now);
        self.since = now;
        if self.target.is_some_and(|t| f64::from(t) == self.pos) {
            self.target = None;
        }
    }

    fn raw(&self) -> u16 {
        self.pos.round().clamp(0.0, f64::from(RAW_MAX)) as u16
    }

    fn is_moving(&self) -> bool {
        self.target.is_some() || self.pending.is_some()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-process controller with simple shade kinematics.
pub struct SimulatedController {
    id: String,
    clock: Box<dyn Clock + Send + Sync>,
    shades: Mutex<BTreeMap<ShadeId, SimShade>>,
    offline: AtomicBool,
    timing_out: AtomicBool,
    writes: AtomicUsize,
}

impl SimulatedController {
    pub fn new(id: &str, shades: impl IntoIterator<Item = SimShadeSpec>) -> Self {
        Self::with_clock(id, shades, MonotonicClock::new())
    }

    pub fn with_clock(
        id: &str,
        shades: impl IntoIterator<Item = SimShadeSpec>,
        clock: impl Clock + Send + Sync + 'static,
    ) -> Self {
        let now = clock.now();
        let shades = shades
            .into_iter()
            .map(|spec| (ShadeId::from(spec.id.as_str()), SimShade::new(spec, now)))
            .collect();
        Self {
            id: id.to_string(),
            clock: Box::new(clock),
            shades: Mutex::new(shades),
            offline: AtomicBool::new(false),
            timing_out: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
        }
    }

    /// Fail every call as if the controller were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    /// Fail every call with a request timeout.
    pub fn set_timing_out(&self, timing_out: bool) {
        self.timing_out.store(timing_out, Ordering::Relaxed);
    }

    pub fn set_connected(&self, id: &str, connected: bool) {
        if let Some(s) = lock(&self.shades).get_mut(&ShadeId::from(id)) {
            s.spec.connected = connected;
        }
    }

    pub fn add_shade(&self, spec: SimShadeSpec) {
        let now = self.clock.now();
        lock(&self.shades).insert(ShadeId::from(spec.id.as_str()), SimShade::new(spec, now));
    }

    pub fn remove_shade(&self, id: &str) -> bool {
        lock(&self.shades).remove(&ShadeId::from(id)).is_some()
    }

    /// Current position without counting as a poll.
    pub fn position(&self, id: &str) -> Option<u16> {
        let now = self.clock.now();
        lock(&self.shades).get_mut(&ShadeId::from(id)).map(|s| {
            s.advance(now);
            s.raw()
        })
    }

    pub fn is_moving(&self, id: &str) -> bool {
        let now = self.clock.now();
        lock(&self.shades)
            .get_mut(&ShadeId::from(id))
            .is_some_and(|s| {
                s.advance(now);
                s.is_moving()
            })
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    fn check_reachable(&self) -> Result<()> {
        if self.offline.load(Ordering::Relaxed) {
            return Err(SimError::Offline);
        }
        if self.timing_out.load(Ordering::Relaxed) {
            return Err(SimError::Timeout);
        }
        Ok(())
    }

    fn write(&self, targets: &[(ShadeId, u16)]) -> Result<HashMap<ShadeId, WriteOutcome>> {
        self.check_reachable()?;
        if targets.len() > MAX_TARGETS_PER_WRITE {
            return Err(SimError::BatchTooLarge(targets.len()));
        }
        self.writes.fetch_add(1, Ordering::Relaxed);
        let now = self.clock.now();
        let mut shades = lock(&self.shades);
        let mut out = HashMap::with_capacity(targets.len());
        for (id, target) in targets {
            let outcome = match shades.get_mut(id) {
                None => WriteOutcome::Failed(SimError::UnknownShade(id.to_string()).to_string()),
                Some(s) if s.spec.reject_writes || !s.spec.connected => {
                    WriteOutcome::Failed("shade rejected the command".to_string())
                }
                Some(s) => {
                    s.advance(now);
                    s.pending = Some((*target, now + s.spec.latency));
                    tracing::trace!(shade = %id, target, from = s.raw(), "sim write accepted");
                    WriteOutcome::Success
                }
            };
            out.insert(id.clone(), outcome);
        }
        Ok(out)
    }
}

impl ShadeController for SimulatedController {
    fn controller_id(&self) -> &str {
        &self.id
    }

    fn get_shade_states(&self) -> std::result::Result<Vec<ShadeSample>, BoxError> {
        self.check_reachable()?;
        let now = self.clock.now();
        let mut shades = lock(&self.shades);
        Ok(shades
            .iter_mut()
            .map(|(id, s)| {
                s.advance(now);
                ShadeSample {
                    id: id.clone(),
                    name: s.spec.name.clone(),
                    raw: Some(s.raw()),
                    status: if s.spec.connected {
                        ConnectionStatus::Connected
                    } else {
                        ConnectionStatus::Disconnected
                    },
                    timestamp: now,
                }
            })
            .collect())
    }

    fn set_shade_states(
        &self,
        targets: &[(ShadeId, u16)],
    ) -> std::result::Result<HashMap<ShadeId, WriteOutcome>, BoxError> {
        Ok(self.write(targets)?)
    }
}
