//! Write coalescing for one controller.
//!
//! The first enqueue into an empty batcher opens a batch with a fixed
//! deadline. Later enqueues inside the window join it; a shade that is already
//! queued keeps its slot but takes the newer target. The batch is handed out
//! either when the window expires (`take_due`) or immediately when it reaches
//! the distinct-shade cap (`enqueue` returns it).
//!
//! This type has no threads or timers of its own; `batch_worker` drives it.

use crate::config::BatchCfg;
use shade_traits::ShadeId;
use std::time::{Duration, Instant};

/// Hard upper bound on shades per controller write.
pub const MAX_BATCH_ITEMS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Move,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommand {
    pub shade: ShadeId,
    pub target: u16,
    pub enqueued_at: Instant,
    pub kind: CommandKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    Deadline,
    Cap,
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct Batch {
    pub controller_id: String,
    pub opened_at: Instant,
    pub deadline: Instant,
    /// One entry per shade, in first-enqueue order.
    pub entries: Vec<PendingCommand>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn targets(&self) -> Vec<(ShadeId, u16)> {
        self.entries
            .iter()
            .map(|c| (c.shade.clone(), c.target))
            .collect()
    }

    pub fn contains(&self, shade: &ShadeId) -> bool {
        self.entries.iter().any(|c| &c.shade == shade)
    }
}

#[derive(Debug)]
pub struct Batcher {
    controller_id: String,
    window: Duration,
    max_items: usize,
    open: Option<Batch>,
}

impl Batcher {
    pub fn new(controller_id: impl Into<String>, cfg: &BatchCfg) -> Self {
        Self {
            controller_id: controller_id.into(),
            window: cfg.window,
            max_items: cfg.max_items.clamp(1, MAX_BATCH_ITEMS),
            open: None,
        }
    }

    /// Queue a command. Returns the batch when this enqueue filled it.
    ///
    /// The second value reports whether an earlier target for the same shade
    /// was replaced.
    pub fn enqueue(&mut self, cmd: PendingCommand, now: Instant) -> (Option<Batch>, Option<PendingCommand>) {
        let window = self.window;
        let controller_id = &self.controller_id;
        let batch = self.open.get_or_insert_with(|| Batch {
            controller_id: controller_id.clone(),
            opened_at: now,
            deadline: now + window,
            entries: Vec::new(),
        });
        let replaced = match batch.entries.iter_mut().find(|c| c.shade == cmd.shade) {
            Some(slot) => Some(std::mem::replace(slot, cmd)),
            None => {
                batch.entries.push(cmd);
                None
            }
        };
        if batch.entries.len() >= self.max_items {
            return (self.open.take(), replaced);
        }
        (None, replaced)
    }

    /// Hand out the open batch if its window has expired.
    pub fn take_due(&mut self, now: Instant) -> Option<Batch> {
        if self.open.as_ref().is_some_and(|b| now >= b.deadline) {
            self.open.take()
        } else {
            None
        }
    }

    /// Hand out the open batch regardless of its deadline.
    pub fn take(&mut self) -> Option<Batch> {
        self.open.take()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.open.as_ref().map(|b| b.deadline)
    }

    pub fn pending(&self) -> usize {
        self.open.as_ref().map_or(0, Batch::len)
    }

    /// Remove a shade from the open batch. An emptied batch is closed.
    pub fn forget(&mut self, shade: &ShadeId) -> Option<PendingCommand> {
        let batch = self.open.as_mut()?;
        let at = batch.entries.iter().position(|c| &c.shade == shade)?;
        let removed = batch.entries.remove(at);
        if batch.entries.is_empty() {
            self.open = None;
        }
        Some(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(shade: &str, target: u16, at: Instant) -> PendingCommand {
        PendingCommand {
            shade: shade.into(),
            target,
            enqueued_at: at,
            kind: CommandKind::Move,
        }
    }

    fn batcher() -> Batcher {
        Batcher::new("main", &BatchCfg::default())
    }

    #[test]
    fn first_enqueue_opens_window() {
        let mut b = batcher();
        let t0 = Instant::now();
        assert!(b.deadline().is_none());
        let (full, replaced) = b.enqueue(cmd("a", 1, t0), t0);
        assert!(full.is_none() && replaced.is_none());
        assert_eq!(b.deadline(), Some(t0 + Duration::from_millis(80)));
        // a later enqueue does not extend the window
        b.enqueue(cmd("b", 2, t0 + Duration::from_millis(50)), t0 + Duration::from_millis(50));
        assert_eq!(b.deadline(), Some(t0 + Duration::from_millis(80)));
    }

    #[test]
    fn same_shade_keeps_slot_and_takes_latest_target() {
        let mut b = batcher();
        let t0 = Instant::now();
        b.enqueue(cmd("a", 100, t0), t0);
        b.enqueue(cmd("b", 200, t0), t0);
        let (_, replaced) = b.enqueue(cmd("a", 300, t0), t0);
        assert_eq!(replaced.map(|c| c.target), Some(100));
        let batch = b.take_due(t0 + Duration::from_millis(80)).unwrap();
        assert_eq!(
            batch.targets(),
            vec![(ShadeId::from("a"), 300), (ShadeId::from("b"), 200)]
        );
    }

    #[test]
    fn not_due_before_deadline() {
        let mut b = batcher();
        let t0 = Instant::now();
        b.enqueue(cmd("a", 1, t0), t0);
        assert!(b.take_due(t0 + Duration::from_millis(79)).is_none());
        assert!(b.take_due(t0 + Duration::from_millis(80)).is_some());
        assert!(b.take_due(t0 + Duration::from_secs(1)).is_none());
    }

    #[test]
    fn cap_flushes_immediately() {
        let mut b = batcher();
        let t0 = Instant::now();
        let mut flushed = Vec::new();
        for i in 0..20u16 {
            if let (Some(batch), _) = b.enqueue(cmd(&format!("s{i}"), i, t0), t0) {
                flushed.push(batch);
            }
        }
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].len(), 16);
        assert_eq!(b.pending(), 4);
    }

    #[test]
    fn configured_cap_is_bounded() {
        let cfg = BatchCfg {
            window: Duration::from_millis(80),
            max_items: 64,
        };
        let mut b = Batcher::new("main", &cfg);
        let t0 = Instant::now();
        let full = (0..16u16)
            .filter_map(|i| b.enqueue(cmd(&format!("s{i}"), i, t0), t0).0)
            .count();
        assert_eq!(full, 1);
    }

    #[test]
    fn forget_removes_and_closes_empty_batch() {
        let mut b = batcher();
        let t0 = Instant::now();
        b.enqueue(cmd("a", 1, t0), t0);
        b.enqueue(cmd("b", 2, t0), t0);
        assert_eq!(b.forget(&"a".into()).map(|c| c.target), Some(1));
        assert!(b.forget(&"a".into()).is_none());
        assert_eq!(b.pending(), 1);
        b.forget(&"b".into());
        assert!(b.deadline().is_none());
    }
}
