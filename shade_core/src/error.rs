use shade_traits::ShadeId;
use thiserror::Error;

/// Why a set of calibration anchors was rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CalibrationError {
    #[error("at least two anchors are required, got {count}")]
    TooFewAnchors { count: usize },
    #[error("first anchor must start at 0% and last anchor must end at 100%")]
    Endpoints,
    #[error("anchor #{index} percent {percent} is outside the 0-100 range")]
    PercentRange { index: usize, percent: i64 },
    #[error("anchor #{index} raw {raw} is outside the valid range")]
    RawRange { index: usize, raw: i64 },
    #[error("anchor percentages must be strictly increasing (anchor #{index})")]
    PercentOrder { index: usize },
    #[error("anchor raw values must be non-decreasing (anchor #{index})")]
    RawDecreasing { index: usize },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShadeError {
    #[error("invalid calibration: {0}")]
    InvalidCalibration(#[from] CalibrationError),
    #[error("no learned model for shade {0}")]
    Uninitialized(ShadeId),
    #[error("write failed for shades: {}", join_ids(.failed))]
    PartialFailure { failed: Vec<ShadeId> },
    #[error("write failed for all shades: {reason}")]
    AllFailed { reason: String },
    #[error("stop skipped for shade {0}: no known position")]
    SkippedNoPosition(ShadeId),
    #[error("unknown shade {0}")]
    UnknownShade(ShadeId),
    #[error("unknown visual group {0}")]
    UnknownGroup(String),
    #[error("shade {shade} is listed in both {first} and {second}")]
    GroupConflict {
        shade: ShadeId,
        first: String,
        second: String,
    },
    #[error("controller error: {0}")]
    Controller(String),
    #[error("timeout waiting for write outcome")]
    Timeout,
    #[error("shade control is shutting down")]
    Shutdown,
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing controller")]
    MissingController,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

fn join_ids(ids: &[ShadeId]) -> String {
    ids.iter()
        .map(ShadeId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Map a controller-boundary error to a typed `ShadeError`.
///
/// Timeouts are recognized by `io::ErrorKind::TimedOut` or by message, so a
/// transport that times out is reported the same way regardless of how it
/// wraps the failure.
pub fn map_controller_error(e: &(dyn std::error::Error + 'static)) -> ShadeError {
    if let Some(io) = e.downcast_ref::<std::io::Error>()
        && io.kind() == std::io::ErrorKind::TimedOut
    {
        return ShadeError::Timeout;
    }
    let s = e.to_string();
    if s.to_lowercase().contains("timed out") || s.to_lowercase().contains("timeout") {
        ShadeError::Timeout
    } else {
        ShadeError::Controller(s)
    }
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
