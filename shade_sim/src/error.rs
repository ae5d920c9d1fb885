use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SimError {
    #[error("controller offline: connection refused")]
    Offline,
    #[error("request timed out")]
    Timeout,
    #[error("unknown shade {0}")]
    UnknownShade(String),
    #[error("batch of {0} targets exceeds the 16-shade limit")]
    BatchTooLarge(usize),
}

pub type Result<T> = std::result::Result<T, SimError>;
