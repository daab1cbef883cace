use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum GpuError {
    #[error("no GPU adapter: {0}")]
    NoAdapter(String),
    #[error("adapter `{0}` cannot run compute shaders")]
    NoComputeSupport(String),
    #[error("device request failed: {0}")]
    RequestDevice(String),
    #[error("no palette uploaded")]
    NoPalette,
    #[error("block array length {0} is not a multiple of 4")]
    BadStride(usize),
    #[error("{what} needs {bytes} bytes, over the device limit of {limit}")]
    TooLarge {
        what: &'static str,
        bytes: u64,
        limit: u64,
    },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("readback failed: {0}")]
    Readback(String),
}
