use thiserror::Error;

use tessel_palette::{ConfigError, PrecomputeError};

use crate::task::TaskId;

#[derive(Debug, Error)]
pub enum MeshingError {
    /// A chunk was submitted before the palette was precomputed and acknowledged.
    #[error("palette is not ready")]
    NotReady,
    #[error("task {task} timed out")]
    Timeout { task: TaskId },
    #[error("task {task} failed: {reason}")]
    BackendFailure { task: TaskId, reason: String },
    #[error("palette broadcast was not acknowledged in time")]
    BroadcastTimeout,
    #[error("backend channel disconnected")]
    Disconnected,
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Palette(#[from] PrecomputeError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
