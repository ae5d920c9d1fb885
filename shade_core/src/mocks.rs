//! Test and helper mocks for shade_core

use shade_traits::clock::{Clock, MonotonicClock};
use shade_traits::{BoxError, ConnectionStatus, ShadeController, ShadeId, ShadeSample, WriteOutcome};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone)]
struct MockShade {
    name: Option<String>,
    raw: Option<u16>,
    status: ConnectionStatus,
}

/// In-memory controller that records every write.
///
/// Positions only change when a test sets them, unless `follow_writes` is
/// enabled, in which case a successful write moves the shade instantly.
pub struct RecordingController {
    id: String,
    clock: Box<dyn Clock + Send + Sync>,
    shades: Mutex<BTreeMap<ShadeId, MockShade>>,
    writes: Mutex<Vec<Vec<(ShadeId, u16)>>>,
    rejected: Mutex<HashMap<ShadeId, String>>,
    omitted: Mutex<HashSet<ShadeId>>,
    write_error: Mutex<Option<String>>,
    poll_error: Mutex<Option<String>>,
    follow_writes: bool,
    polls: AtomicUsize,
}

impl RecordingController {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            clock: Box::new(MonotonicClock::new()),
            shades: Mutex::new(BTreeMap::new()),
            writes: Mutex::new(Vec::new()),
            rejected: Mutex::new(HashMap::new()),
            omitted: Mutex::new(HashSet::new()),
            write_error: Mutex::new(None),
            poll_error: Mutex::new(None),
            follow_writes: false,
            polls: AtomicUsize::new(0),
        }
    }

    /// Stamp samples with this clock instead of the real one.
    #[must_use]
    pub fn with_clock(mut self, clock: impl Clock + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    #[must_use]
    pub fn follow_writes(mut self) -> Self {
        self.follow_writes = true;
        self
    }

    pub fn set_shade(&self, id: &str, raw: Option<u16>) {
        if let Ok(mut shades) = self.shades.lock() {
            shades
                .entry(ShadeId::from(id))
                .and_modify(|s| s.raw = raw)
                .or_insert(MockShade {
                    name: Some(format!("Shade {id}")),
                    raw,
                    status: ConnectionStatus::Connected,
                });
        }
    }

    pub fn set_status(&self, id: &str, status: ConnectionStatus) {
        if let Ok(mut shades) = self.shades.lock()
            && let Some(s) = shades.get_mut(&ShadeId::from(id))
        {
            s.status = status;
        }
    }

    pub fn remove_shade(&self, id: &str) {
        if let Ok(mut shades) = self.shades.lock() {
            shades.remove(&ShadeId::from(id));
        }
    }

    /// Report a per-shade failure for writes to `id`.
    pub fn reject(&self, id: &str, reason: &str) {
        if let Ok(mut r) = self.rejected.lock() {
            r.insert(ShadeId::from(id), reason.to_string());
        }
    }

    /// Leave `id` out of write responses entirely.
    pub fn omit_from_response(&self, id: &str) {
        if let Ok(mut o) = self.omitted.lock() {
            o.insert(ShadeId::from(id));
        }
    }

    /// Fail every write call with `reason`; `None` restores normal writes.
    pub fn fail_writes(&self, reason: Option<&str>) {
        if let Ok(mut e) = self.write_error.lock() {
            *e = reason.map(str::to_string);
        }
    }

    pub fn fail_polls(&self, reason: Option<&str>) {
        if let Ok(mut e) = self.poll_error.lock() {
            *e = reason.map(str::to_string);
        }
    }

    pub fn writes(&self) -> Vec<Vec<(ShadeId, u16)>> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::Relaxed)
    }
}

impl ShadeController for RecordingController {
    fn controller_id(&self) -> &str {
        &self.id
    }

    fn get_shade_states(&self) -> Result<Vec<ShadeSample>, BoxError> {
        self.polls.fetch_add(1, Ordering::Relaxed);
        if let Ok(e) = self.poll_error.lock()
            && let Some(reason) = e.as_ref()
        {
            return Err(reason.clone().into());
        }
        let now = self.clock.now();
        let shades = self.shades.lock().map_err(|_| "mock state poisoned")?;
        Ok(shades
            .iter()
            .map(|(id, s)| ShadeSample {
                id: id.clone(),
                name: s.name.clone(),
                raw: s.raw,
                status: s.status,
                timestamp: now,
            })
            .collect())
    }

    fn set_shade_states(
        &self,
        targets: &[(ShadeId, u16)],
    ) -> Result<HashMap<ShadeId, WriteOutcome>, BoxError> {
        if let Ok(mut w) = self.writes.lock() {
            w.push(targets.to_vec());
        }
        if let Ok(e) = self.write_error.lock()
            && let Some(reason) = e.as_ref()
        {
            return Err(reason.clone().into());
        }
        let rejected = self.rejected.lock().map_err(|_| "mock state poisoned")?;
        let omitted = self.omitted.lock().map_err(|_| "mock state poisoned")?;
        let mut shades = self.shades.lock().map_err(|_| "mock state poisoned")?;
        let mut out = HashMap::new();
        for (id, target) in targets {
            if omitted.contains(id) {
                continue;
            }
            let outcome = match rejected.get(id) {
                Some(reason) => WriteOutcome::Failed(reason.clone()),
                None => {
                    if self.follow_writes
                        && let Some(s) = shades.get_mut(id)
                    {
                        s.raw = Some(*target);
                    }
                    WriteOutcome::Success
                }
            };
            out.insert(id.clone(), outcome);
        }
        Ok(out)
    }
}

/// A controller whose every call fails with the given I/O error kind.
pub struct FailingController {
    id: String,
    kind: std::io::ErrorKind,
}

impl FailingController {
    pub fn new(id: &str, kind: std::io::ErrorKind) -> Self {
        Self {
            id: id.to_string(),
            kind,
        }
    }
}

impl ShadeController for FailingController {
    fn controller_id(&self) -> &str {
        &self.id
    }

    fn get_shade_states(&self) -> Result<Vec<ShadeSample>, BoxError> {
        Err(Box::new(std::io::Error::new(self.kind, "controller unreachable")))
    }

    fn set_shade_states(
        &self,
        _targets: &[(ShadeId, u16)],
    ) -> Result<HashMap<ShadeId, WriteOutcome>, BoxError> {
        Err(Box::new(std::io::Error::new(self.kind, "controller unreachable")))
    }
}
