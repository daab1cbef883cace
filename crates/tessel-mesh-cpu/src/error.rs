use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("no palette installed")]
    NoPalette,
    #[error("block array length {0} is not a multiple of 4")]
    BadStride(usize),
    #[error("not in batch mode")]
    NotInBatch,
}
