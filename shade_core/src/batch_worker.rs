//! Background writer that owns a [`Batcher`] for one controller.
//!
//! Callers talk to the worker through a cloneable [`BatchHandle`]; every
//! enqueue goes over one crossbeam channel, so enqueues are serialized without
//! a lock. The worker waits on that channel with the open batch's remaining
//! window as timeout and flushes inline, so writes for a controller never
//! overlap.
//!
//! Safety: the thread is shut down when the `BatchWorker` is dropped. Any
//! batch still open at that point is flushed before the thread exits.

use crate::batcher::{Batch, Batcher, CommandKind, FlushTrigger, PendingCommand};
use crate::config::BatchCfg;
use crate::error::{ShadeError, map_controller_error};
use crossbeam_channel as xch;
use shade_traits::clock::Clock;
use shade_traits::{ShadeController, ShadeId, WriteOutcome};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Final status of one shade's queued write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShadeWriteStatus {
    Written,
    Failed(String),
    /// Removed from the batch before it was flushed (shade deregistered).
    Skipped,
}

/// Aggregated result of one controller write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    AllSucceeded,
    PartialFailure { failed: Vec<ShadeId> },
    AllFailed { reason: String },
}

impl FlushOutcome {
    pub fn any_succeeded(&self) -> bool {
        !matches!(self, FlushOutcome::AllFailed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushTarget {
    pub shade: ShadeId,
    pub target: u16,
    pub kind: CommandKind,
}

/// Everything the engine needs to know about a finished flush.
#[derive(Debug, Clone)]
pub struct FlushReport {
    pub controller_id: String,
    pub trigger: FlushTrigger,
    pub opened_at: Instant,
    pub started_at: Instant,
    pub elapsed: Duration,
    pub targets: Vec<FlushTarget>,
    pub succeeded: Vec<ShadeId>,
    pub outcome: FlushOutcome,
}

pub type FlushListener = Box<dyn Fn(&FlushReport) + Send>;

/// Resolves once the shade's batch has been flushed (or the shade skipped).
///
/// The status is cached, so waiting again after a resolution returns the
/// same value immediately.
#[derive(Debug)]
pub struct WriteTicket {
    shade: ShadeId,
    rx: xch::Receiver<ShadeWriteStatus>,
    resolved: OnceLock<ShadeWriteStatus>,
}

impl WriteTicket {
    fn new(shade: ShadeId, rx: xch::Receiver<ShadeWriteStatus>) -> Self {
        Self {
            shade,
            rx,
            resolved: OnceLock::new(),
        }
    }

    pub fn shade(&self) -> &ShadeId {
        &self.shade
    }

    pub fn wait(&self, timeout: Duration) -> Result<ShadeWriteStatus, ShadeError> {
        if let Some(status) = self.resolved.get() {
            return Ok(status.clone());
        }
        match self.rx.recv_timeout(timeout) {
            Ok(status) => Ok(self.resolved.get_or_init(|| status).clone()),
            Err(xch::RecvTimeoutError::Timeout) => Err(ShadeError::Timeout),
            Err(xch::RecvTimeoutError::Disconnected) => Err(ShadeError::Shutdown),
        }
    }

    /// Non-blocking check.
    pub fn try_status(&self) -> Option<ShadeWriteStatus> {
        if let Some(status) = self.resolved.get() {
            return Some(status.clone());
        }
        let status = self.rx.try_recv().ok()?;
        Some(self.resolved.get_or_init(|| status).clone())
    }
}

struct Request {
    shade: ShadeId,
    target: u16,
    kind: CommandKind,
    reply: xch::Sender<ShadeWriteStatus>,
}

enum Msg {
    Enqueue(Vec<Request>),
    Forget(ShadeId),
    Shutdown,
}

#[derive(Clone)]
pub struct BatchHandle {
    tx: xch::Sender<Msg>,
    closed: Arc<AtomicBool>,
}

impl std::fmt::Debug for BatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchHandle")
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl BatchHandle {
    pub fn enqueue(&self, shade: ShadeId, target: u16, kind: CommandKind) -> Result<WriteTicket, ShadeError> {
        let mut tickets = self.enqueue_many(vec![(shade, target)], kind)?;
        tickets.pop().ok_or(ShadeError::Shutdown)
    }

    /// Queue several targets in one message so they land in the same window.
    pub fn enqueue_many(
        &self,
        targets: Vec<(ShadeId, u16)>,
        kind: CommandKind,
    ) -> Result<Vec<WriteTicket>, ShadeError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(ShadeError::Shutdown);
        }
        let mut requests = Vec::with_capacity(targets.len());
        let mut tickets = Vec::with_capacity(targets.len());
        for (shade, target) in targets {
            let (reply, rx) = xch::bounded(1);
            tickets.push(WriteTicket::new(shade.clone(), rx));
            requests.push(Request {
                shade,
                target,
                kind,
                reply,
            });
        }
        self.tx
            .send(Msg::Enqueue(requests))
            .map_err(|_| ShadeError::Shutdown)?;
        Ok(tickets)
    }

    /// Drop a shade's queued target; its tickets resolve to `Skipped`.
    pub fn forget(&self, shade: ShadeId) {
        let _ = self.tx.send(Msg::Forget(shade));
    }
}

pub struct BatchWorker {
    handle: BatchHandle,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl BatchWorker {
    pub fn spawn<C: Clock + Send + 'static>(
        controller: Arc<dyn ShadeController>,
        cfg: &BatchCfg,
        clock: C,
        on_flush: FlushListener,
    ) -> Self {
        let (tx, rx) = xch::unbounded();
        let closed = Arc::new(AtomicBool::new(false));
        let batcher = Batcher::new(controller.controller_id(), cfg);
        let mut state = WorkerState {
            controller,
            clock,
            batcher,
            waiters: HashMap::new(),
            on_flush,
        };

        let join_handle = std::thread::spawn(move || {
            state.run(&rx);
            tracing::trace!("batch worker exiting cleanly");
        });

        Self {
            handle: BatchHandle { tx, closed },
            join_handle: Some(join_handle),
        }
    }

    pub fn handle(&self) -> BatchHandle {
        self.handle.clone()
    }
}

impl Drop for BatchWorker {
    fn drop(&mut self) {
        self.handle.closed.store(true, Ordering::Relaxed);
        let _ = self.handle.tx.send(Msg::Shutdown);
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => tracing::trace!("batch worker joined successfully"),
                Err(e) => tracing::warn!(?e, "batch worker panicked during shutdown"),
            }
        }
    }
}

struct WorkerState<C: Clock> {
    controller: Arc<dyn ShadeController>,
    clock: C,
    batcher: Batcher,
    waiters: HashMap<ShadeId, Vec<xch::Sender<ShadeWriteStatus>>>,
    on_flush: FlushListener,
}

impl<C: Clock> WorkerState<C> {
    fn run(&mut self, rx: &xch::Receiver<Msg>) {
        loop {
            let msg = match self.batcher.deadline() {
                Some(deadline) => {
                    let wait = deadline.saturating_duration_since(self.clock.now());
                    if wait.is_zero() {
                        self.flush_due();
                        continue;
                    }
                    match rx.recv_timeout(wait) {
                        Ok(msg) => msg,
                        Err(xch::RecvTimeoutError::Timeout) => {
                            self.flush_due();
                            continue;
                        }
                        Err(xch::RecvTimeoutError::Disconnected) => Msg::Shutdown,
                    }
                }
                None => rx.recv().unwrap_or(Msg::Shutdown),
            };

            match msg {
                Msg::Enqueue(requests) => self.enqueue(requests),
                Msg::Forget(shade) => self.forget(&shade),
                Msg::Shutdown => {
                    tracing::debug!("batch worker received shutdown signal");
                    if let Some(batch) = self.batcher.take() {
                        self.flush(batch, FlushTrigger::Shutdown);
                    }
                    break;
                }
            }
        }
    }

    fn enqueue(&mut self, requests: Vec<Request>) {
        let now = self.clock.now();
        for req in requests {
            let cmd = PendingCommand {
                shade: req.shade.clone(),
                target: req.target,
                enqueued_at: now,
                kind: req.kind,
            };
            self.waiters.entry(req.shade).or_default().push(req.reply);
            let (full, replaced) = self.batcher.enqueue(cmd, now);
            if let Some(prev) = replaced {
                tracing::trace!(shade = %prev.shade, old = prev.target, "queued target replaced");
            }
            if let Some(batch) = full {
                self.flush(batch, FlushTrigger::Cap);
            }
        }
    }

    fn forget(&mut self, shade: &ShadeId) {
        if self.batcher.forget(shade).is_some() {
            tracing::debug!(%shade, "dropped queued target for deregistered shade");
        }
        for reply in self.waiters.remove(shade).unwrap_or_default() {
            let _ = reply.send(ShadeWriteStatus::Skipped);
        }
    }

    fn flush_due(&mut self) {
        if let Some(batch) = self.batcher.take_due(self.clock.now()) {
            self.flush(batch, FlushTrigger::Deadline);
        }
    }

    fn flush(&mut self, batch: Batch, trigger: FlushTrigger) {
        let started_at = self.clock.now();
        let targets = batch.targets();
        let result = self.controller.set_shade_states(&targets);
        let elapsed = self.clock.now().saturating_duration_since(started_at);

        let mut statuses: Vec<(ShadeId, ShadeWriteStatus)> = Vec::with_capacity(targets.len());
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        let outcome = match result {
            Err(e) => {
                let reason = map_controller_error(&*e).to_string();
                for (shade, _) in &targets {
                    statuses.push((shade.clone(), ShadeWriteStatus::Failed(reason.clone())));
                    failed.push(shade.clone());
                }
                FlushOutcome::AllFailed { reason }
            }
            Ok(results) => {
                let mut reasons: Vec<String> = Vec::new();
                for (shade, _) in &targets {
                    let status = match results.get(shade) {
                        Some(WriteOutcome::Success) => ShadeWriteStatus::Written,
                        Some(WriteOutcome::Failed(r)) => ShadeWriteStatus::Failed(r.clone()),
                        None => ShadeWriteStatus::Failed("no result reported".to_string()),
                    };
                    if let ShadeWriteStatus::Failed(r) = &status {
                        if !reasons.contains(r) {
                            reasons.push(r.clone());
                        }
                        failed.push(shade.clone());
                    } else {
                        succeeded.push(shade.clone());
                    }
                    statuses.push((shade.clone(), status));
                }
                if failed.is_empty() {
                    FlushOutcome::AllSucceeded
                } else if succeeded.is_empty() {
                    FlushOutcome::AllFailed {
                        reason: reasons.join("; "),
                    }
                } else {
                    FlushOutcome::PartialFailure {
                        failed: failed.clone(),
                    }
                }
            }
        };

        match &outcome {
            FlushOutcome::AllSucceeded => tracing::debug!(
                controller = %batch.controller_id,
                items = targets.len(),
                ?trigger,
                elapsed_ms = elapsed.as_millis(),
                "batch flushed"
            ),
            FlushOutcome::PartialFailure { failed } => tracing::warn!(
                controller = %batch.controller_id,
                items = targets.len(),
                failed = ?failed,
                "partial shade write failure"
            ),
            FlushOutcome::AllFailed { reason } => tracing::warn!(
                controller = %batch.controller_id,
                items = targets.len(),
                %reason,
                "shade write failed"
            ),
        }

        let report = FlushReport {
            controller_id: batch.controller_id,
            trigger,
            opened_at: batch.opened_at,
            started_at,
            elapsed,
            targets: batch
                .entries
                .into_iter()
                .map(|c| FlushTarget {
                    shade: c.shade,
                    target: c.target,
                    kind: c.kind,
                })
                .collect(),
            succeeded,
            outcome,
        };
        // Listener first, so a resolved ticket implies the engine saw the outcome.
        (self.on_flush)(&report);

        for (shade, status) in statuses {
            for reply in self.waiters.remove(&shade).unwrap_or_default() {
                let _ = reply.send(status.clone());
            }
        }
    }
}
