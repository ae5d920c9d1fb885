//! The shade engine: one controller, its batch worker, poller and learned
//! state behind a single facade.
//!
//! Mutable state lives in [`EngineShared`] behind one mutex per concern.
//! Locks are always taken in the order shades → estimator → cadence →
//! diagnostics, and never held across a controller call.

use crate::batch_worker::{BatchHandle, BatchWorker, FlushReport, ShadeWriteStatus, WriteTicket};
use crate::batcher::CommandKind;
use crate::cadence::{CadenceController, CadenceState};
use crate::calibration::{ASSISTED_PERCENT_EPSILON, largest_gap_target};
use crate::config::EngineCfg;
use crate::diagnostics::{
    AssistedRun, AssistedSkip, CadenceDiagnostics, DiagnosticsLog, DiagnosticsSnapshot,
    GroupDiagnostics, ModelDiagnostics, ShadeDiagnostics,
};
use crate::error::{ShadeError, map_controller_error};
use crate::estimator::Estimator;
use crate::groups::Cohort;
use crate::planner::{StopInput, StopPlan, plan_stop};
use crate::poller::{PollTarget, PollWakeReceiver, PollWaker, Poller};
use crate::settings::SettingsHandle;
use crate::shade::Shade;
use crate::util::duration_ms;
use shade_traits::clock::Clock;
use shade_traits::{ShadeController, ShadeId};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};
use std::time::{Duration, Instant};

pub use crate::builder::ShadeEngineBuilder;

/// Percent used by assisted calibration when a cohort has no anchors to compare.
const ASSISTED_DEFAULT_TARGET: u8 = 50;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Open,
    Close,
    SetPercent(f64),
    Stop,
}

/// Tickets for the writes a command queued, plus any stop plan behind them.
#[derive(Debug)]
pub struct CommandReceipt {
    tickets: Vec<WriteTicket>,
    plan: Option<StopPlan>,
}

impl CommandReceipt {
    pub fn tickets(&self) -> &[WriteTicket] {
        &self.tickets
    }

    pub fn plan(&self) -> Option<&StopPlan> {
        self.plan.as_ref()
    }

    /// Shades left out of a stop because their position was unknown.
    pub fn skipped(&self) -> &[ShadeId] {
        match &self.plan {
            Some(plan) => &plan.skipped,
            None => &[],
        }
    }

    /// The skipped shades as errors, for callers that report them one by one.
    pub fn skip_errors(&self) -> impl Iterator<Item = ShadeError> + '_ {
        self.skipped().iter().cloned().map(ShadeError::SkippedNoPosition)
    }

    /// Wait for every queued write and fold the per-shade results.
    ///
    /// Skipped writes count as neither success nor failure.
    pub fn wait(&self, timeout: Duration) -> Result<(), ShadeError> {
        let deadline = Instant::now() + timeout;
        let mut written = 0usize;
        let mut failed = Vec::new();
        let mut first_reason = None;
        for ticket in &self.tickets {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match ticket.wait(remaining)? {
                ShadeWriteStatus::Written => written += 1,
                ShadeWriteStatus::Failed(reason) => {
                    first_reason.get_or_insert(reason);
                    failed.push(ticket.shade().clone());
                }
                ShadeWriteStatus::Skipped => {}
            }
        }
        match (written, failed.is_empty()) {
            (_, true) => Ok(()),
            (0, false) => Err(ShadeError::AllFailed {
                reason: first_reason.unwrap_or_default(),
            }),
            _ => Err(ShadeError::PartialFailure { failed }),
        }
    }
}

/// What one poll changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub added: Vec<ShadeId>,
    pub moved: Vec<ShadeId>,
    pub removed: Vec<ShadeId>,
}

pub(crate) struct EngineShared {
    pub(crate) controller: Arc<dyn ShadeController>,
    pub(crate) clock: Arc<dyn Clock + Send + Sync>,
    pub(crate) settings: Arc<SettingsHandle>,
    pub(crate) batch: BatchHandle,
    pub(crate) waker: PollWaker,
    shades: Mutex<BTreeMap<ShadeId, Shade>>,
    estimator: Mutex<Estimator>,
    cadence: Mutex<CadenceController>,
    diagnostics: Mutex<DiagnosticsLog>,
    poll_healthy: AtomicBool,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

pub struct ShadeEngine {
    // Field order matters: the poller stops before the worker drains.
    poller: Mutex<Option<Poller>>,
    pending_wake_rx: Mutex<Option<PollWakeReceiver>>,
    _worker: BatchWorker,
    shared: Arc<EngineShared>,
}

impl std::fmt::Debug for ShadeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShadeEngine")
            .field("controller", &self.shared.controller.controller_id())
            .field("poll_healthy", &self.shared.poll_healthy.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ShadeEngine {
    pub fn builder() -> ShadeEngineBuilder<crate::builder::Missing> {
        ShadeEngineBuilder::default()
    }

    pub(crate) fn assemble(
        controller: Arc<dyn ShadeController>,
        clock: Arc<dyn Clock + Send + Sync>,
        cfg: &EngineCfg,
        settings: Arc<SettingsHandle>,
    ) -> Self {
        let (waker, wake_rx) = crate::poller::wake_channel();
        let epoch = clock.now();
        let listener_target: Arc<OnceLock<Weak<EngineShared>>> = Arc::new(OnceLock::new());
        let listener_ref = Arc::clone(&listener_target);
        let worker = BatchWorker::spawn(
            Arc::clone(&controller),
            &cfg.batch,
            Arc::clone(&clock),
            Box::new(move |report: &FlushReport| {
                if let Some(shared) = listener_ref.get().and_then(Weak::upgrade) {
                    shared.on_flush(report);
                }
            }),
        );
        let shared = Arc::new(EngineShared {
            controller,
            clock,
            settings,
            batch: worker.handle(),
            waker,
            shades: Mutex::new(BTreeMap::new()),
            estimator: Mutex::new(Estimator::new(cfg.estimator.clone())),
            cadence: Mutex::new(CadenceController::new(cfg.polling.clone())),
            diagnostics: Mutex::new(DiagnosticsLog::new(epoch, cfg.history)),
            poll_healthy: AtomicBool::new(false),
        });
        let _ = listener_target.set(Arc::downgrade(&shared));
        Self {
            poller: Mutex::new(None),
            pending_wake_rx: Mutex::new(Some(wake_rx)),
            _worker: worker,
            shared,
        }
    }

    pub fn controller_id(&self) -> &str {
        self.shared.controller.controller_id()
    }

    pub fn settings(&self) -> &Arc<SettingsHandle> {
        &self.shared.settings
    }

    pub fn shade(&self, id: &ShadeId) -> Option<Shade> {
        lock(&self.shared.shades).get(id).cloned()
    }

    pub fn shades(&self) -> Vec<Shade> {
        lock(&self.shared.shades).values().cloned().collect()
    }

    pub fn is_available(&self, id: &ShadeId) -> bool {
        let healthy = self.shared.poll_healthy.load(Ordering::Relaxed);
        lock(&self.shared.shades)
            .get(id)
            .is_some_and(|s| s.is_available(healthy))
    }

    pub fn poll_healthy(&self) -> bool {
        self.shared.poll_healthy.load(Ordering::Relaxed)
    }

    pub fn cadence_state(&self) -> CadenceState {
        lock(&self.shared.cadence).state(self.shared.clock.now())
    }

    pub fn poll_interval(&self) -> Duration {
        self.shared.current_interval(self.shared.clock.now())
    }

    /// Apply a user command to one shade.
    ///
    /// `Stop` is scoped to the shade's cohort: the whole visual group (or every
    /// shade when no groups exist) is stopped in one batch.
    pub fn apply_command(&self, shade: &ShadeId, command: Command) -> Result<CommandReceipt, ShadeError> {
        let settings = self.shared.settings.snapshot();
        if !lock(&self.shared.shades).contains_key(shade) {
            return Err(ShadeError::UnknownShade(shade.clone()));
        }
        let percent = match command {
            Command::Stop => {
                let cohort = settings.groups.group_of(shade);
                return self.shared.stop_cohort(&settings, cohort);
            }
            Command::Open => 100.0,
            Command::Close => 0.0,
            Command::SetPercent(p) => p,
        };
        let raw = settings.curve_for(shade).percent_to_raw(percent);
        tracing::debug!(%shade, percent, raw, "move queued");
        let ticket = self.shared.batch.enqueue(shade.clone(), raw, CommandKind::Move)?;
        Ok(CommandReceipt {
            tickets: vec![ticket],
            plan: None,
        })
    }

    pub fn stop_group(&self, group_id: &str) -> Result<CommandReceipt, ShadeError> {
        let settings = self.shared.settings.snapshot();
        if settings.groups.get(group_id).is_none() {
            return Err(ShadeError::UnknownGroup(group_id.to_string()));
        }
        self.shared
            .stop_cohort(&settings, Cohort::Group(group_id.to_string()))
    }

    /// Stop several shades; each cohort they touch gets its own plan.
    pub fn stop_shades(&self, shades: &[ShadeId]) -> Result<Vec<CommandReceipt>, ShadeError> {
        let settings = self.shared.settings.snapshot();
        settings
            .groups
            .partition(shades)
            .into_iter()
            .map(|(cohort, _)| self.shared.stop_cohort(&settings, cohort))
            .collect()
    }

    /// Poll faster for the boost window and refresh right away.
    pub fn boost(&self) {
        lock(&self.shared.cadence).boost(self.shared.clock.now());
        self.shared.waker.refresh();
    }

    pub fn poll_once(&self) -> Result<PollSummary, ShadeError> {
        self.shared.poll_once()
    }

    /// Start the background poller. Calling it again is a no-op.
    pub fn start_polling(&self) {
        let mut poller = lock(&self.poller);
        if poller.is_some() {
            return;
        }
        let Some(wake_rx) = lock(&self.pending_wake_rx).take() else {
            return;
        };
        *poller = Some(Poller::spawn(
            Arc::clone(&self.shared),
            Arc::clone(&self.shared.clock),
            self.shared.waker.clone(),
            wake_rx,
        ));
    }

    pub fn reset_learning(&self, shade: &ShadeId) -> bool {
        let reset = lock(&self.shared.estimator).reset(shade);
        if reset {
            tracing::info!(%shade, "learned model reset");
        }
        reset
    }

    /// Percent to drive a cohort to for the next assisted calibration step.
    pub fn assisted_target(&self, cohort: &Cohort) -> Result<u8, ShadeError> {
        let settings = self.shared.settings.snapshot();
        let members = {
            let shades = lock(&self.shared.shades);
            settings.groups.members_of(cohort, shades.keys())?
        };
        let calibrations: Vec<_> = members
            .iter()
            .map(|id| settings.calibration_for(id))
            .collect();
        let target = largest_gap_target(
            calibrations.iter().map(|c| c.anchors()),
            ASSISTED_PERCENT_EPSILON,
            ASSISTED_DEFAULT_TARGET,
        );
        let inverted = members
            .first()
            .is_some_and(|id| settings.curve_for(id).invert_axis());
        Ok(if inverted { 100 - target } else { target })
    }

    /// Record every member's current position as the anchor for `percent`.
    ///
    /// All successful updates are applied in one settings swap. Members with
    /// no position, or whose new curve would be invalid, are reported as
    /// skipped and keep their old curve.
    pub fn capture_assisted_anchor(&self, cohort: &Cohort, percent: u8) -> Result<AssistedRun, ShadeError> {
        let percent = percent.min(100);
        let now = self.shared.clock.now();
        let settings = self.shared.settings.snapshot();
        let positions: Vec<(ShadeId, Option<u16>)> = {
            let shades = lock(&self.shared.shades);
            settings
                .groups
                .members_of(cohort, shades.keys())?
                .into_iter()
                .map(|id| {
                    let raw = shades.get(&id).and_then(|s| s.raw);
                    (id, raw)
                })
                .collect()
        };

        let mut updates = Vec::new();
        let mut unchanged = Vec::new();
        let mut skipped = Vec::new();
        for (id, raw) in positions {
            let Some(raw) = raw else {
                skipped.push(AssistedSkip {
                    shade: id.to_string(),
                    reason: "no known position".to_string(),
                });
                continue;
            };
            let cal = settings.calibration_for(&id);
            let curve_percent = if cal.curve(settings.invert_default).invert_axis() {
                100 - percent
            } else {
                percent
            };
            match cal.with_assisted_anchor(curve_percent, raw) {
                Ok((next, true)) => updates.push((id, next)),
                Ok((_, false)) => unchanged.push(id.to_string()),
                Err(e) => {
                    tracing::warn!(shade = %id, error = %e, "assisted anchor rejected");
                    skipped.push(AssistedSkip {
                        shade: id.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let saved: Vec<String> = updates.iter().map(|(id, _)| id.to_string()).collect();
        if !updates.is_empty() {
            self.shared.settings.update(|s| {
                for (id, cal) in updates {
                    s.calibrations.insert(id, cal);
                }
                Ok(())
            })?;
        }

        let scope = cohort.to_string();
        tracing::info!(%scope, percent, saved = saved.len(), skipped = skipped.len(), "assisted anchor captured");
        let mut diagnostics = lock(&self.shared.diagnostics);
        let run = AssistedRun {
            at_ms: diagnostics.at_ms(now),
            scope,
            percent,
            saved,
            unchanged,
            skipped,
        };
        diagnostics.record_assisted(run.clone());
        Ok(run)
    }

    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        let shared = &self.shared;
        let now = shared.clock.now();
        let settings = shared.settings.snapshot();
        let healthy = shared.poll_healthy.load(Ordering::Relaxed);

        let shades = lock(&shared.shades);
        let estimator = lock(&shared.estimator);
        let shade_diags = shades
            .values()
            .map(|s| {
                let curve = settings.curve_for(&s.id);
                let model = estimator.model(&s.id).map(|m| ModelDiagnostics {
                    speed: m.speed,
                    covariance: m.covariance,
                    latency_ms: duration_ms(m.latency),
                    speed_samples: m.speed_samples,
                    latency_samples: m.latency_samples,
                });
                let diag = ShadeDiagnostics {
                    name: s.name.clone(),
                    raw: s.raw,
                    percent: s.percent,
                    available: s.is_available(healthy),
                    commanded_raw: s.commanded_raw,
                    write_failed: s.write_failed,
                    cohort: settings.groups.group_of(&s.id).to_string(),
                    invert: curve.invert_axis(),
                    anchors: curve.anchors().iter().map(|a| (a.percent, a.raw)).collect(),
                    model,
                };
                (s.id.to_string(), diag)
            })
            .collect();
        drop(estimator);
        drop(shades);

        let cadence = {
            let c = lock(&shared.cadence);
            let state = c.state(now);
            CadenceDiagnostics {
                state: match state {
                    CadenceState::Idle => "idle",
                    CadenceState::Boost { .. } => "boost",
                },
                interval_ms: duration_ms(c.interval(now)),
                boost_remaining_ms: match state {
                    CadenceState::Idle => 0,
                    CadenceState::Boost { remaining } => duration_ms(remaining),
                },
            }
        };

        let groups = settings
            .groups
            .groups()
            .map(|g| GroupDiagnostics {
                id: g.id.clone(),
                name: g.name.clone(),
                members: g.members.iter().map(ToString::to_string).collect(),
            })
            .collect();

        let diagnostics = lock(&shared.diagnostics);
        DiagnosticsSnapshot {
            controller_id: shared.controller.controller_id().to_string(),
            at_ms: diagnostics.at_ms(now),
            poll_healthy: healthy,
            predictive_enabled: settings.predictive_enabled,
            invert_default: settings.invert_default,
            cadence,
            shades: shade_diags,
            groups,
            recent_stop_outcomes: diagnostics.stops(),
            recent_batch_events: diagnostics.batches(),
            assisted_runs: diagnostics.assisted(),
        }
    }
}

impl EngineShared {
    fn current_interval(&self, now: Instant) -> Duration {
        lock(&self.cadence).interval(now)
    }

    fn stop_cohort(
        &self,
        settings: &crate::settings::Settings,
        cohort: Cohort,
    ) -> Result<CommandReceipt, ShadeError> {
        let now = self.clock.now();
        let plan = {
            let shades = lock(&self.shades);
            let members = settings.groups.members_of(&cohort, shades.keys())?;
            let inputs: Vec<StopInput> = members
                .into_iter()
                .map(|id| {
                    let shade = shades.get(&id);
                    StopInput {
                        last_raw: shade.and_then(|s| s.raw),
                        last_at: shade.and_then(|s| s.last_sample_at),
                        commanded: shade.and_then(|s| s.commanded_raw),
                        shade: id,
                    }
                })
                .collect();
            let estimator = lock(&self.estimator);
            plan_stop(cohort, inputs, &estimator, settings.predictive_enabled, now)
        };

        tracing::debug!(
            scope = %plan.scope,
            targets = plan.targets.len(),
            skipped = plan.skipped.len(),
            "stop plan built"
        );
        lock(&self.diagnostics).record_stop(&plan, settings.groups.display_name(&plan.scope));

        let tickets = if plan.targets.is_empty() {
            Vec::new()
        } else {
            self.batch
                .enqueue_many(plan.batch_targets(), CommandKind::Stop)?
        };
        Ok(CommandReceipt {
            tickets,
            plan: Some(plan),
        })
    }

    fn poll_once(&self) -> Result<PollSummary, ShadeError> {
        let samples = match self.controller.get_shade_states() {
            Ok(samples) => samples,
            Err(e) => {
                let err = map_controller_error(&*e);
                self.poll_healthy.store(false, Ordering::Relaxed);
                tracing::warn!(controller = %self.controller.controller_id(), error = %err, "poll failed");
                return Err(err);
            }
        };
        self.poll_healthy.store(true, Ordering::Relaxed);
        let settings = self.settings.snapshot();
        let mut summary = PollSummary::default();

        {
            let mut shades = lock(&self.shades);
            let mut estimator = lock(&self.estimator);
            let mut seen = HashSet::with_capacity(samples.len());
            for sample in &samples {
                seen.insert(sample.id.clone());
                let percent = sample
                    .raw
                    .map(|raw| settings.curve_for(&sample.id).raw_to_percent(raw));
                let shade = shades.entry(sample.id.clone()).or_insert_with(|| {
                    summary.added.push(sample.id.clone());
                    Shade::from_sample(sample)
                });
                if shade.apply_sample(sample, percent) {
                    summary.moved.push(sample.id.clone());
                }
                if let Some(raw) = sample.raw {
                    let effect = estimator.record_sample(&sample.id, raw, sample.timestamp);
                    tracing::trace!(shade = %sample.id, raw, ?effect, "sample");
                }
            }
            summary.removed = shades
                .keys()
                .filter(|id| !seen.contains(*id))
                .cloned()
                .collect();
            for id in &summary.removed {
                shades.remove(id);
                estimator.forget(id);
                self.batch.forget(id.clone());
                tracing::info!(shade = %id, "shade no longer reported; removed");
            }
        }

        if !summary.moved.is_empty() {
            lock(&self.cadence).boost(self.clock.now());
        }
        tracing::debug!(
            shades = samples.len(),
            added = summary.added.len(),
            moved = summary.moved.len(),
            removed = summary.removed.len(),
            "poll complete"
        );
        Ok(summary)
    }

    fn on_flush(&self, report: &FlushReport) {
        let succeeded: HashSet<&ShadeId> = report.succeeded.iter().collect();
        {
            let mut shades = lock(&self.shades);
            let mut estimator = lock(&self.estimator);
            for t in &report.targets {
                let ok = succeeded.contains(&t.shade);
                if let Some(shade) = shades.get_mut(&t.shade) {
                    shade.write_failed = !ok;
                    if ok {
                        shade.commanded_raw = Some(t.target);
                    }
                }
                if ok {
                    estimator.record_command(&t.shade, t.target, report.started_at);
                }
            }
        }
        if report.outcome.any_succeeded() {
            lock(&self.cadence).boost(self.clock.now());
            self.waker.reschedule();
        }
        lock(&self.diagnostics).record_flush(report);
    }
}

impl PollTarget for EngineShared {
    fn poll(&self) -> bool {
        self.poll_once().is_ok()
    }

    fn interval(&self, now: Instant) -> Duration {
        self.current_interval(now)
    }
}
