//! Engine-side view of one shade.

use shade_traits::{ConnectionStatus, ShadeId, ShadeSample};
use std::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub struct Shade {
    pub id: ShadeId,
    pub name: String,
    pub raw: Option<u16>,
    /// Percent derived from `raw` through the shade's curve at sample time.
    pub percent: Option<f64>,
    pub status: ConnectionStatus,
    /// Last target the controller accepted for this shade.
    pub commanded_raw: Option<u16>,
    pub last_sample_at: Option<Instant>,
    /// Set when the most recent write for this shade failed; cleared by the
    /// next successful write.
    pub write_failed: bool,
}

impl Shade {
    pub fn from_sample(sample: &ShadeSample) -> Self {
        Self {
            id: sample.id.clone(),
            name: sample
                .name
                .clone()
                .unwrap_or_else(|| sample.id.to_string()),
            raw: None,
            percent: None,
            status: sample.status,
            commanded_raw: None,
            last_sample_at: None,
            write_failed: false,
        }
    }

    /// Apply a poll sample. Returns true when the raw position changed.
    pub fn apply_sample(&mut self, sample: &ShadeSample, percent: Option<f64>) -> bool {
        if let Some(name) = &sample.name {
            self.name.clone_from(name);
        }
        self.status = sample.status;
        let changed = sample.raw.is_some() && self.raw.is_some() && sample.raw != self.raw;
        if sample.raw.is_some() {
            self.raw = sample.raw;
            self.percent = percent;
            self.last_sample_at = Some(sample.timestamp);
        }
        changed
    }

    /// Usable for commands: the last poll succeeded and the shade reports as
    /// connected.
    pub fn is_available(&self, poll_healthy: bool) -> bool {
        poll_healthy && self.status.is_connected()
    }
}
