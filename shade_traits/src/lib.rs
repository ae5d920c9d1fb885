//! Boundary types shared between the shade engine and the outside world.
//!
//! Everything the engine consumes from a controller (telemetry samples, write
//! outcomes) and the clock it runs on is defined here so that transports and
//! simulators do not depend on the engine crate.
pub mod clock;

pub use clock::{Clock, ManualClock, MonotonicClock};

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

/// Error type used at controller boundaries.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Highest raw position a controller reports.
pub const RAW_MAX: u16 = u16::MAX;

/// Controller-assigned shade identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShadeId(String);

impl ShadeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShadeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ShadeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ShadeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for ShadeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

impl ConnectionStatus {
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

/// One shade as reported by a telemetry poll.
#[derive(Debug, Clone)]
pub struct ShadeSample {
    pub id: ShadeId,
    /// Display name, when the controller reports one.
    pub name: Option<String>,
    /// Raw position; `None` when the controller has no reading for the shade.
    pub raw: Option<u16>,
    pub status: ConnectionStatus,
    pub timestamp: Instant,
}

/// Per-shade result of a batched write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Success,
    Failed(String),
}

impl WriteOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, WriteOutcome::Success)
    }
}

/// Remote controller exposing position get/set only.
///
/// Implementations are shared between the poller and the batch worker
/// threads, so both calls take `&self`. Each call is expected to enforce its
/// own request timeout and report it as an error.
pub trait ShadeController: Send + Sync {
    /// Identity used in logs and diagnostics.
    fn controller_id(&self) -> &str;

    fn get_shade_states(&self) -> Result<Vec<ShadeSample>, BoxError>;

    /// Write raw targets. Callers never pass more than 16 entries.
    fn set_shade_states(
        &self,
        targets: &[(ShadeId, u16)],
    ) -> Result<HashMap<ShadeId, WriteOutcome>, BoxError>;
}

impl<T: ShadeController + ?Sized> ShadeController for std::sync::Arc<T> {
    fn controller_id(&self) -> &str {
        (**self).controller_id()
    }

    fn get_shade_states(&self) -> Result<Vec<ShadeSample>, BoxError> {
        (**self).get_shade_states()
    }

    fn set_shade_states(
        &self,
        targets: &[(ShadeId, u16)],
    ) -> Result<HashMap<ShadeId, WriteOutcome>, BoxError> {
        (**self).set_shade_states(targets)
    }
}
